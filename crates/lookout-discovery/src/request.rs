//! Requestor: bounded rounds of multicast discovery requests.
//!
//! Each requestor sends `request_max` rounds for its groups and exits. All
//! requestors share one response listener, bound when the first one starts
//! and stopped when the last one finishes.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, PoisonError};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio_util::sync::CancellationToken;

use lookout_core::MulticastRequest;

use crate::discovery::{jitter, Shared};
use crate::error::DiscoveryError;
use crate::response;

/// Requestor bookkeeping, guarded by `Shared::requests`.
#[derive(Default)]
pub(crate) struct RequestState {
    pub active: usize,
    response: Option<ResponseListener>,
}

struct ResponseListener {
    port: u16,
    stop: CancellationToken,
}

impl RequestState {
    pub fn port(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.port)
    }
}

/// Start a requestor for `groups`; an empty list asks for every group.
pub(crate) fn start(shared: &Arc<Shared>, groups: Vec<String>) -> Result<(), DiscoveryError> {
    if shared.is_terminated() {
        return Ok(());
    }
    let port = {
        let mut state = shared.requests.lock().unwrap_or_else(PoisonError::into_inner);
        let port = match &state.response {
            Some(listener) => listener.port,
            None => {
                let (listener, port) = response::bind()?;
                let stop = shared.cancel.child_token();
                shared.spawn_role(response::run(shared.clone(), listener, stop.clone()));
                state.response = Some(ResponseListener { port, stop });
                port
            }
        };
        state.active += 1;
        port
    };

    tracing::info!(groups = ?groups, response_port = port, "requestor starting");
    let task_shared = shared.clone();
    shared.spawn_role(async move {
        let cancel = task_shared.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = rounds(&task_shared, &groups, port) => {
                tracing::info!(groups = ?groups, "requestor finished");
            }
        }
        finish(&task_shared);
    });
    Ok(())
}

/// One requestor exited; stop the response listener if it was the last.
fn finish(shared: &Shared) {
    let mut state = shared.requests.lock().unwrap_or_else(PoisonError::into_inner);
    state.active = state.active.saturating_sub(1);
    if state.active == 0 {
        if let Some(listener) = state.response.take() {
            listener.stop.cancel();
            tracing::debug!(port = listener.port, "no active requestors, response listener stopping");
        }
    }
}

/// Forget every requestor and stop the response listener.
pub(crate) fn reset(shared: &Shared) {
    let mut state = shared.requests.lock().unwrap_or_else(PoisonError::into_inner);
    state.active = 0;
    if let Some(listener) = state.response.take() {
        listener.stop.cancel();
    }
}

async fn rounds(shared: &Arc<Shared>, groups: &[String], response_port: u16) {
    let s = &shared.settings;

    let delay = jitter(s.initial_request_delay_range);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let socket = if s.multicast_enabled {
        match make_request_socket(s.constraints.multicast_ttl) {
            Ok(socket) => Some(socket),
            Err(e) => {
                tracing::warn!(error = %e, "cannot create request socket, requests disabled");
                None
            }
        }
    } else {
        None
    };

    for round in 0..s.request_max {
        if let Some(socket) = &socket {
            send_round(shared, socket, &shared.interfaces, groups, response_port);
        }
        tracing::trace!(round, "request round done");
        let pause = if round + 1 < s.request_max {
            s.request_interval
        } else {
            s.final_request_interval
        };
        tokio::time::sleep(pause).await;
    }
}

/// Encode the request afresh and send it on every interface.
fn send_round(
    shared: &Shared,
    socket: &Socket,
    interfaces: &[Ipv4Addr],
    groups: &[String],
    response_port: u16,
) {
    let s = &shared.settings;
    let request = MulticastRequest {
        response_port,
        groups: groups.to_vec(),
        heard: shared.table.ids(),
    };
    let packets = match shared.codec.encode_request(&request, &s.constraints) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "cannot encode multicast request");
            return;
        }
    };

    let dest = SocketAddrV4::new(s.request_addr, s.port);
    for iface in interfaces {
        if let Err(e) = socket.set_multicast_if_v4(iface) {
            tracing::warn!(interface = %iface, error = %e, "cannot select interface");
            continue;
        }
        for packet in &packets {
            match socket.send_to(packet, &dest.into()) {
                Ok(n) => tracing::trace!(interface = %iface, bytes = n, "request sent"),
                Err(e) => {
                    tracing::warn!(interface = %iface, error = %e, "request send failed");
                    break;
                }
            }
        }
    }
}

fn make_request_socket(ttl: u32) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_multicast_ttl_v4(ttl).context("IP_MULTICAST_TTL")?;
    socket
        .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())
        .context("bind()")?;
    Ok(socket)
}
