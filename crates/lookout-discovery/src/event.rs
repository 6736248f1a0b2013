//! Discovery events and the listener trait.

use std::collections::HashMap;

use lookout_core::{Registrar, ServiceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Discovered,
    Discarded,
    Changed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Discovered => "discovered",
            EventKind::Discarded => "discarded",
            EventKind::Changed => "changed",
        }
    }
}

/// A snapshot of the registries an event is about, each carrying the
/// member groups it had when the event was committed.
#[derive(Debug, Clone)]
pub struct DiscoveryEvent {
    pub kind: EventKind,
    pub registrars: Vec<Registrar>,
}

impl DiscoveryEvent {
    pub fn new(kind: EventKind, registrars: Vec<Registrar>) -> Self {
        Self { kind, registrars }
    }

    /// Registry → member groups, as of this event.
    pub fn groups(&self) -> HashMap<ServiceId, Vec<String>> {
        self.registrars
            .iter()
            .map(|r| (r.service_id, r.groups.clone()))
            .collect()
    }

    pub fn service_ids(&self) -> Vec<ServiceId> {
        self.registrars.iter().map(|r| r.service_id).collect()
    }
}

/// Observer of discovery events.
///
/// Called from the single notifier task, one event at a time, in commit
/// order. Implementations should return quickly; a panic is caught and
/// logged and does not affect other listeners.
pub trait DiscoveryListener: Send + Sync {
    fn discovered(&self, event: &DiscoveryEvent);

    fn discarded(&self, event: &DiscoveryEvent);

    /// Only called when `wants_changes` returns true.
    fn changed(&self, _event: &DiscoveryEvent) {}

    /// Opt in to `changed` events.
    fn wants_changes(&self) -> bool {
        false
    }
}
