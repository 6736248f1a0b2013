//! The authoritative set of discovered registries and their liveness.
//!
//! Two concurrent maps keyed by service ID:
//!   - `entries`: the current descriptor of every discovered registry
//!   - `liveness`: when each was last heard from, and the last sequence number
//!
//! Every key in `liveness` is also in `entries`. Inserts add the descriptor
//! first, removals drop the liveness record first, and the liveness record is
//! only ever updated in place, never created on its own.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use lookout_core::{Registrar, ServiceId};

/// Per-registry liveness record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AnnouncementInfo {
    pub last_seen: Instant,
    /// Last accepted sequence number. `None` forces the next announcement
    /// to be inspected.
    pub sequence: Option<u64>,
}

#[derive(Default)]
pub(crate) struct RegistryTable {
    entries: DashMap<ServiceId, Registrar>,
    liveness: DashMap<ServiceId, AnnouncementInfo>,
}

impl RegistryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ServiceId) -> Option<Registrar> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    pub fn contains(&self, id: &ServiceId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn snapshot(&self) -> Vec<Registrar> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn ids(&self) -> Vec<ServiceId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    /// Insert a newly discovered registry.
    ///
    /// Returns false, leaving the table untouched, if the ID is already present.
    pub fn insert_new(&self, registrar: Registrar, now: Instant) -> bool {
        let id = registrar.service_id;
        match self.entries.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(registrar);
                self.liveness.insert(
                    id,
                    AnnouncementInfo {
                        last_seen: now,
                        sequence: None,
                    },
                );
                true
            }
        }
    }

    /// Swap in a new descriptor for a registry that is still present.
    pub fn replace(&self, registrar: Registrar) -> bool {
        match self.entries.get_mut(&registrar.service_id) {
            Some(mut slot) => {
                *slot = registrar;
                true
            }
            None => false,
        }
    }

    /// Remove a registry and its liveness record. No-op if absent.
    pub fn remove(&self, id: &ServiceId) -> Option<Registrar> {
        self.liveness.remove(id);
        self.entries.remove(id).map(|(_, r)| r)
    }

    /// Record an announcement from a discovered registry.
    ///
    /// Returns `None` if the registry is not in the table. Otherwise the
    /// timestamp is refreshed and the result says whether the announcement
    /// carries new information: the stored sequence is unknown, the sender
    /// does not number its announcements, or the number went up.
    pub fn observe_announcement(
        &self,
        id: &ServiceId,
        sequence: Option<u64>,
        now: Instant,
    ) -> Option<bool> {
        let mut info = self.liveness.get_mut(id)?;
        info.last_seen = now;
        let fresh = match (info.sequence, sequence) {
            (Some(old), Some(new)) => new > old,
            _ => true,
        };
        if fresh {
            info.sequence = sequence;
        }
        Some(fresh)
    }

    /// Reset the liveness timestamp after a successful reachability probe.
    pub fn touch(&self, id: &ServiceId, now: Instant) {
        if let Some(mut info) = self.liveness.get_mut(id) {
            info.last_seen = now;
        }
    }

    /// Registries not heard from for longer than `threshold`.
    pub fn silent(&self, threshold: Duration, now: Instant) -> Vec<ServiceId> {
        self.liveness
            .iter()
            .filter(|e| now.saturating_duration_since(e.value().last_seen) > threshold)
            .map(|e| *e.key())
            .collect()
    }

    #[cfg(test)]
    pub fn liveness(&self, id: &ServiceId) -> Option<AnnouncementInfo> {
        self.liveness.get(id).map(|e| *e.value())
    }

    #[cfg(test)]
    pub fn liveness_ids(&self) -> Vec<ServiceId> {
        self.liveness.iter().map(|e| *e.key()).collect()
    }
}
