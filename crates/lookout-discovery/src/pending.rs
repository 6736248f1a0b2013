//! Unicast work queued or in flight.
//!
//! Deduplicated by key: a registry is never queued twice for resolution at
//! the same time. A claimed key is released when its `PendingGuard` drops,
//! whichever way the task ends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::net::TcpStream;

use lookout_core::{Locator, ServiceId};

/// Dedup key for a pending work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PendingKey {
    /// An accepted connection; unique per socket.
    Connection(u64),
    /// Any marker about one registry.
    Registrar(ServiceId),
}

/// One unit of unicast work.
#[derive(Debug)]
pub(crate) enum PendingWork {
    /// A registry connected back in response to a multicast request.
    Socket {
        conn: u64,
        stream: TcpStream,
        peer: SocketAddr,
    },
    /// An announcement from a registry not yet discovered.
    Locator {
        service_id: ServiceId,
        locator: Locator,
    },
    /// Membership may have changed. `None` asks the registry directly.
    GroupRecheck {
        service_id: ServiceId,
        groups: Option<Vec<String>>,
    },
    /// Announcements went silent; probe the registry.
    Reachability { service_id: ServiceId },
}

impl PendingWork {
    pub fn key(&self) -> PendingKey {
        match self {
            PendingWork::Socket { conn, .. } => PendingKey::Connection(*conn),
            PendingWork::Locator { service_id, .. }
            | PendingWork::GroupRecheck { service_id, .. }
            | PendingWork::Reachability { service_id } => PendingKey::Registrar(*service_id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PendingWork::Socket { .. } => "socket",
            PendingWork::Locator { .. } => "locator",
            PendingWork::GroupRecheck { .. } => "group_recheck",
            PendingWork::Reachability { .. } => "reachability",
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct PendingSet {
    inner: Arc<DashMap<PendingKey, Instant>>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. Returns `None` if it is already pending.
    pub fn claim(&self, key: PendingKey) -> Option<PendingGuard> {
        match self.inner.entry(key) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Some(PendingGuard {
                    set: self.inner.clone(),
                    key,
                })
            }
        }
    }

    #[cfg(test)]
    pub fn contains(&self, key: &PendingKey) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }
}

/// Releases its key on drop.
pub(crate) struct PendingGuard {
    set: Arc<DashMap<PendingKey, Instant>>,
    key: PendingKey,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive_until_guard_drops() {
        let set = PendingSet::new();
        let key = PendingKey::Registrar(ServiceId([1; 16]));
        let guard = set.claim(key).unwrap();
        assert!(set.claim(key).is_none());
        assert!(set.contains(&key));
        drop(guard);
        assert!(!set.contains(&key));
        assert!(set.claim(key).is_some());
    }

    #[test]
    fn markers_for_one_registry_share_a_key() {
        let id = ServiceId([3; 16]);
        let locator = PendingWork::Locator {
            service_id: id,
            locator: Locator::new("10.0.0.1", 4160),
        };
        let recheck = PendingWork::GroupRecheck {
            service_id: id,
            groups: None,
        };
        let probe = PendingWork::Reachability { service_id: id };
        assert_eq!(locator.key(), recheck.key());
        assert_eq!(recheck.key(), probe.key());
        assert_ne!(locator.key(), PendingKey::Connection(1));
    }

    #[test]
    fn guard_released_on_panic() {
        let set = PendingSet::new();
        let key = PendingKey::Connection(7);
        let s = set.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = s.claim(key).unwrap();
            panic!("task failed");
        }));
        assert!(result.is_err());
        assert_eq!(set.len(), 0);
    }
}
