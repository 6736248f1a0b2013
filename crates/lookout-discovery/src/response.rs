//! Accepts registries connecting back after a request.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::discovery::Shared;
use crate::error::DiscoveryError;
use crate::pending::PendingWork;
use crate::unicast;

/// Bind an ephemeral port. The port goes into every request packet, so it
/// must be known before the first one is sent.
pub(crate) fn bind() -> Result<(TcpListener, u16), DiscoveryError> {
    let err = |source| DiscoveryError::Bind {
        what: "response listener",
        source,
    };
    let std_listener =
        std::net::TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).map_err(err)?;
    std_listener.set_nonblocking(true).map_err(err)?;
    let port = std_listener.local_addr().map_err(err)?.port();
    let listener = TcpListener::from_std(std_listener).map_err(err)?;
    Ok((listener, port))
}

/// Accept until `stop` fires; dropping the listener closes the port.
pub(crate) async fn run(shared: Arc<Shared>, listener: TcpListener, stop: CancellationToken) {
    tracing::debug!(port = listener.local_addr().map(|a| a.port()).unwrap_or(0), "response listener starting");
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "registrar connected");
                    let conn = shared.next_conn();
                    unicast::dispatch(&shared, PendingWork::Socket { conn, stream, peer });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
    tracing::debug!("response listener stopped");
}
