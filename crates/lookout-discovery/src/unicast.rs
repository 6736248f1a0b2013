//! Unicast discovery tasks. `dispatch` is the only way work gets queued.
//!
//! Candidates recognised by the listeners and the timer are resolved here,
//! on the bounded task pool, never inline in a receive loop: a registry that
//! died after sending its packet can take a full connect timeout to fail.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use lookout_core::{Locator, ServiceId, UnicastResponse, WireError};

use crate::discovery::{jitter, Shared};
use crate::pending::PendingWork;

/// Queue `work` unless its key is already pending.
///
/// Returns false if it was deduplicated or the engine is terminated.
pub(crate) fn dispatch(shared: &Arc<Shared>, work: PendingWork) -> bool {
    if shared.is_terminated() {
        return false;
    }
    let Some(guard) = shared.pending.claim(work.key()) else {
        tracing::trace!(key = ?work.key(), kind = work.kind(), "already pending");
        return false;
    };
    tracing::trace!(key = ?work.key(), kind = work.kind(), "work queued");

    // Announced registries are contacted after a random delay so a burst of
    // listeners does not hit them at once. The key stays claimed meanwhile.
    let delay = match work {
        PendingWork::Locator { .. } => jitter(shared.settings.unicast_delay_range),
        _ => Duration::ZERO,
    };
    let task_shared = Arc::clone(shared);
    shared.spawn_unicast(delay, async move {
        let _guard = guard;
        let cancel = task_shared.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = run(&task_shared, work) => {}
        }
    });
    true
}

async fn run(shared: &Arc<Shared>, work: PendingWork) {
    match work {
        PendingWork::Socket { stream, peer, .. } => from_socket(shared, stream, peer).await,
        PendingWork::Locator {
            service_id,
            locator,
        } => from_locator(shared, service_id, &locator).await,
        PendingWork::GroupRecheck {
            service_id,
            groups: Some(groups),
        } => shared.apply_groups(&service_id, groups),
        PendingWork::GroupRecheck {
            service_id,
            groups: None,
        } => probe(shared, service_id, false).await,
        PendingWork::Reachability { service_id } => probe(shared, service_id, true).await,
    }
}

/// A registry connected to our response port.
async fn from_socket(shared: &Arc<Shared>, mut stream: TcpStream, peer: SocketAddr) {
    let constraints = &shared.settings.constraints;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::trace!(peer = %peer, error = %e, "set_nodelay failed");
    }
    let result = shared.codec.unicast_discovery(&mut stream, constraints).await;
    drop(stream);
    match result {
        Ok(resp) => {
            shared.add_discovered(resp);
        }
        Err(e) => tracing::warn!(
            peer = %peer,
            error = %e,
            protocol = constraints.protocol_version,
            timeout_ms = constraints.unicast_timeout.as_millis() as u64,
            "unicast discovery failed"
        ),
    }
}

/// An announced registry not yet discovered. Tries every resolved address.
async fn from_locator(shared: &Arc<Shared>, service_id: ServiceId, locator: &Locator) {
    if shared.table.contains(&service_id) {
        return;
    }
    let constraints = &shared.settings.constraints;
    let timeout = constraints.unicast_timeout;

    let lookup = tokio::net::lookup_host((locator.host.as_str(), locator.port));
    let addrs: Vec<SocketAddr> = match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(addrs)) => addrs.collect(),
        Ok(Err(e)) => {
            tracing::warn!(locator = %locator, error = %e, "cannot resolve registrar locator");
            return;
        }
        Err(_) => {
            tracing::warn!(locator = %locator, "registrar locator lookup timed out");
            return;
        }
    };

    for addr in &addrs {
        match attempt(shared, *addr).await {
            Ok(resp) => {
                shared.add_discovered(resp);
                return;
            }
            Err(e) => tracing::debug!(addr = %addr, locator = %locator, error = %e, "unicast attempt failed"),
        }
    }
    tracing::warn!(
        service_id = %service_id,
        locator = %locator,
        addrs = addrs.len(),
        protocol = constraints.protocol_version,
        timeout_ms = timeout.as_millis() as u64,
        "unicast discovery failed on every address"
    );
}

async fn attempt(shared: &Arc<Shared>, addr: SocketAddr) -> Result<UnicastResponse, WireError> {
    let constraints = &shared.settings.constraints;
    let timeout = constraints.unicast_timeout;
    let mut stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| WireError::Timeout(timeout))??;
    stream.set_nodelay(true)?;
    shared.codec.unicast_discovery(&mut stream, constraints).await
}

/// Ask a discovered registry for its groups; discard it if it does not answer.
async fn probe(shared: &Arc<Shared>, service_id: ServiceId, reachability: bool) {
    let Some(registrar) = shared.table.get(&service_id) else {
        return;
    };
    match registrar.handle.member_groups().await {
        Ok(groups) => {
            if reachability {
                shared.table.touch(&service_id, Instant::now());
            }
            shared.apply_groups(&service_id, groups);
        }
        Err(e) => {
            tracing::info!(
                service_id = %service_id,
                locator = %registrar.locator,
                error = %e,
                "registrar unreachable"
            );
            shared.discard(&[service_id]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::LookupDiscovery;
    use crate::event::EventKind;
    use crate::pending::PendingKey;
    use crate::prepare::AcceptAll;
    use crate::testing::{groups, id, settings, RecordingListener, TestRegistry};
    use lookout_core::wire::{self, UnicastBody};
    use lookout_core::{DesiredGroups, WireDiscovery};

    fn engine() -> LookupDiscovery {
        LookupDiscovery::start(
            settings(DesiredGroups::only(["A"])),
            Arc::new(WireDiscovery::new()),
            Arc::new(AcceptAll),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn locator_tries_each_address_and_discovers() {
        let d = engine();
        let listener = RecordingListener::new(false);
        d.add_listener(listener.clone()).unwrap();
        let registry = TestRegistry::spawn(1, &["A"]).await;
        // "localhost" may resolve to ::1 first; the IPv4 address still answers.
        let locator = Locator::new("localhost", registry.locator.port);

        assert!(dispatch(
            d.shared(),
            PendingWork::Locator {
                service_id: id(1),
                locator,
            }
        ));
        listener.wait_for(1).await;
        assert_eq!(listener.kinds(), vec![EventKind::Discovered]);
        d.terminate().await;
    }

    #[tokio::test]
    async fn failed_locator_leaves_no_pending_entry() {
        let d = engine();
        let registry = TestRegistry::spawn(2, &["A"]).await;
        let locator = registry.locator.clone();
        registry.stop().await;

        dispatch(
            d.shared(),
            PendingWork::Locator {
                service_id: id(2),
                locator,
            },
        );
        let key = PendingKey::Registrar(id(2));
        let deadline = Instant::now() + Duration::from_secs(5);
        while d.shared().pending.contains(&key) {
            assert!(Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(d.registrars().unwrap().is_empty());
        d.terminate().await;
    }

    #[tokio::test]
    async fn delayed_locator_does_not_hold_a_pool_slot() {
        let mut s = settings(DesiredGroups::only(["A"]));
        s.max_concurrent_tasks = 1;
        s.unicast_delay_range = Duration::from_secs(60);
        s.final_request_interval = Duration::from_secs(30);
        let d = LookupDiscovery::start(s, Arc::new(WireDiscovery::new()), Arc::new(AcceptAll)).unwrap();
        let listener = RecordingListener::new(false);
        d.add_listener(listener.clone()).unwrap();

        let waiting = TestRegistry::spawn(1, &["A"]).await;
        assert!(dispatch(
            d.shared(),
            PendingWork::Locator {
                service_id: id(1),
                locator: waiting.locator.clone(),
            }
        ));
        let key = PendingKey::Registrar(id(1));
        assert!(d.shared().pending.contains(&key));

        let registry = TestRegistry::spawn(2, &["A"]).await;
        let port = d.response_port().unwrap();
        let body = UnicastBody {
            service_id: id(2),
            locator: registry.locator.clone(),
            groups: groups(&["A"]),
        };
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let _ = wire::serve_unicast(&mut stream, &body).await;

        listener.wait_for(1).await;
        assert_eq!(listener.events(), vec![(EventKind::Discovered, vec![id(2)])]);
        assert!(d.shared().pending.contains(&key));
        d.terminate().await;
    }

    #[tokio::test]
    async fn group_recheck_without_groups_asks_the_registry() {
        let d = engine();
        let listener = RecordingListener::new(true);
        d.add_listener(listener.clone()).unwrap();
        let registry = TestRegistry::spawn(3, &["A"]).await;
        dispatch(
            d.shared(),
            PendingWork::Locator {
                service_id: id(3),
                locator: registry.locator.clone(),
            },
        );
        listener.wait_for(1).await;

        registry.set_groups(&["A", "Z"]);
        dispatch(
            d.shared(),
            PendingWork::GroupRecheck {
                service_id: id(3),
                groups: None,
            },
        );
        listener.wait_for(2).await;
        assert_eq!(listener.kinds(), vec![EventKind::Discovered, EventKind::Changed]);
        assert_eq!(d.registrars().unwrap()[0].groups, groups(&["A", "Z"]));

        registry.stop().await;
        dispatch(d.shared(), PendingWork::Reachability { service_id: id(3) });
        listener.wait_for(3).await;
        assert_eq!(listener.kinds()[2], EventKind::Discarded);
        d.terminate().await;
    }

    #[tokio::test]
    async fn nothing_is_queued_after_terminate() {
        let d = engine();
        d.terminate().await;
        assert!(!dispatch(d.shared(), PendingWork::Reachability { service_id: id(1) }));
        assert_eq!(d.status().pending, 0);
    }
}
