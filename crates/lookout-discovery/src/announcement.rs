//! Announcement listener.
//!
//! Joins the announcement multicast group on every configured interface and
//! classifies each received announcement:
//!   - unknown registry whose groups we want → resolve its locator
//!   - known registry with new information and different groups → recheck groups
//!   - anything else → liveness refresh only, or ignore
//!
//! Interfaces that fail to join are retried from the same loop on a fixed
//! interval.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use lookout_core::config::DiscoverySettings;
use lookout_core::groups::same_groups;
use lookout_core::MulticastAnnouncement;

use crate::discovery::Shared;
use crate::error::DiscoveryError;
use crate::pending::PendingWork;
use crate::unicast;

/// Receive buffer size. Anything larger is truncated and fails to decode.
const RECV_BUF: usize = 64 * 1024;

pub(crate) struct AnnouncementSocket {
    socket: UdpSocket,
    group: Ipv4Addr,
    /// Interfaces that have not joined the group yet.
    unjoined: Vec<Ipv4Addr>,
}

impl AnnouncementSocket {
    /// Try to join every interface still outstanding. Returns how many joined.
    fn join_pending(&mut self) -> usize {
        let before = self.unjoined.len();
        let socket = &self.socket;
        let group = self.group;
        self.unjoined.retain(|iface| match socket.join_multicast_v4(group, *iface) {
            Ok(()) => {
                tracing::info!(interface = %iface, group = %group, "joined announcement group");
                false
            }
            Err(e) => {
                tracing::warn!(interface = %iface, group = %group, error = %e, "join failed, will retry");
                true
            }
        });
        before - self.unjoined.len()
    }
}

/// Bind the announcement socket and make a first attempt to join every
/// interface.
pub(crate) fn bind(
    settings: &DiscoverySettings,
    interfaces: &[Ipv4Addr],
) -> Result<AnnouncementSocket, DiscoveryError> {
    let std_socket = make_listener_socket(settings.port).map_err(|source| DiscoveryError::Bind {
        what: "announcement listener",
        source,
    })?;
    let socket = UdpSocket::from_std(std_socket).map_err(|source| DiscoveryError::Bind {
        what: "announcement listener",
        source,
    })?;

    let mut bound = AnnouncementSocket {
        socket,
        group: settings.announcement_addr,
        unjoined: interfaces.to_vec(),
    };
    bound.join_pending();
    Ok(bound)
}

fn make_listener_socket(port: u16) -> std::io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&bind_addr.into())?;
    Ok(socket.into())
}

/// Receive and classify announcements until cancelled.
pub(crate) async fn run(shared: Arc<Shared>, mut sock: AnnouncementSocket) {
    let retry_every = shared.settings.interface_retry_interval;
    let mut retry = tokio::time::interval_at(tokio::time::Instant::now() + retry_every, retry_every);
    retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut buf = vec![0u8; RECV_BUF];

    tracing::info!(
        port = shared.settings.port,
        group = %sock.group,
        unjoined = sock.unjoined.len(),
        "announcement listener starting"
    );

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = retry.tick(), if !sock.unjoined.is_empty() => {
                sock.join_pending();
            }
            received = sock.socket.recv_from(&mut buf) => {
                let (len, from) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "announcement recv failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };
                match shared.codec.decode_announcement(&buf[..len], &shared.settings.constraints) {
                    Ok(ann) => handle_announcement(&shared, ann),
                    Err(e) => tracing::debug!(from = %from, bytes = len, error = %e, "dropping undecodable announcement"),
                }
            }
        }
    }
    // Dropping the socket leaves the group and closes it.
    tracing::debug!("announcement listener stopped");
}

/// Classify one decoded announcement.
pub(crate) fn handle_announcement(shared: &Arc<Shared>, ann: MulticastAnnouncement) {
    let id = ann.service_id;
    match shared.table.observe_announcement(&id, ann.sequence, Instant::now()) {
        None => {
            if !shared.lock_groups().overlaps(&ann.groups) {
                tracing::trace!(service_id = %id, groups = ?ann.groups, "announcement for unwanted groups");
                return;
            }
            unicast::dispatch(
                shared,
                PendingWork::Locator {
                    service_id: id,
                    locator: ann.locator,
                },
            );
        }
        Some(false) => {
            tracing::trace!(service_id = %id, sequence = ?ann.sequence, "stale announcement");
        }
        Some(true) => {
            let Some(current) = shared.table.get(&id) else {
                return;
            };
            if same_groups(&current.groups, &ann.groups) {
                return;
            }
            tracing::debug!(
                service_id = %id,
                old = ?current.groups,
                new = ?ann.groups,
                "announced groups differ"
            );
            unicast::dispatch(
                shared,
                PendingWork::GroupRecheck {
                    service_id: id,
                    groups: Some(ann.groups),
                },
            );
        }
    }
}
