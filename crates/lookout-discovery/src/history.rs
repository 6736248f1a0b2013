//! A listener that keeps the most recent events.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use lookout_core::ServiceId;

use crate::event::{DiscoveryEvent, DiscoveryListener};

pub const DEFAULT_HISTORY_LEN: usize = 256;

/// One delivered event, flattened for display.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub kind: &'static str,
    /// Service ID → member groups at the time of the event.
    pub registrars: BTreeMap<ServiceId, Vec<String>>,
    pub timestamp_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Bounded ring of recent events. Opts in to `changed`.
#[derive(Clone)]
pub struct EventHistory {
    capacity: usize,
    records: Arc<Mutex<VecDeque<EventRecord>>>,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Oldest first.
    pub fn records(&self) -> Vec<EventRecord> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<EventRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, event: &DiscoveryEvent) {
        let record = EventRecord {
            kind: event.kind.as_str(),
            registrars: event.groups().into_iter().collect(),
            timestamp_ms: now_ms(),
        };
        let mut records = self.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LEN)
    }
}

impl DiscoveryListener for EventHistory {
    fn discovered(&self, event: &DiscoveryEvent) {
        self.push(event);
    }

    fn discarded(&self, event: &DiscoveryEvent) {
        self.push(event);
    }

    fn changed(&self, event: &DiscoveryEvent) {
        self.push(event);
    }

    fn wants_changes(&self) -> bool {
        true
    }
}
