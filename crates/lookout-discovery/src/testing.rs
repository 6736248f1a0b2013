//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use lookout_core::config::DiscoverySettings;
use lookout_core::wire::{self, UnicastBody};
use lookout_core::{DesiredGroups, Locator, Registrar, RegistrarHandle, ServiceId, WireError};

use crate::event::{DiscoveryEvent, DiscoveryListener, EventKind};

pub fn groups(g: &[&str]) -> Vec<String> {
    g.iter().map(|s| s.to_string()).collect()
}

pub fn id(i: u8) -> ServiceId {
    ServiceId([i; 16])
}

/// A registrar with a fake handle; the handle answers with `groups`.
pub fn registrar(i: u8, member: &[&str]) -> Registrar {
    Registrar {
        service_id: id(i),
        locator: Locator::new("127.0.0.1", 4160),
        groups: groups(member),
        handle: FakeHandle::new(Some(groups(member))),
    }
}

/// Settings for engine tests: no multicast, short timers.
pub fn settings(desired: DesiredGroups) -> DiscoverySettings {
    let mut s = DiscoverySettings::default();
    s.groups = desired;
    s.multicast_enabled = false;
    s.request_max = 1;
    s.request_interval = Duration::from_millis(10);
    s.final_request_interval = Duration::from_millis(10);
    s.announcement_interval = Duration::from_secs(3600);
    s.constraints.unicast_timeout = Duration::from_secs(2);
    s.shutdown_grace = Duration::from_millis(500);
    s
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Remote handle whose answers are set by the test. `None` means unreachable.
pub struct FakeHandle {
    groups: Mutex<Option<Vec<String>>>,
}

impl FakeHandle {
    pub fn new(groups: Option<Vec<String>>) -> Arc<Self> {
        Arc::new(Self {
            groups: Mutex::new(groups),
        })
    }

    pub fn set(&self, groups: Option<Vec<String>>) {
        *self.groups.lock().unwrap() = groups;
    }
}

impl RegistrarHandle for FakeHandle {
    fn member_groups(&self) -> BoxFuture<'_, Result<Vec<String>, WireError>> {
        let answer = self.groups.lock().unwrap().clone();
        Box::pin(async move {
            answer.ok_or_else(|| {
                WireError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "fake registry unreachable",
                ))
            })
        })
    }
}

// ── Listener ─────────────────────────────────────────────────────────────────

pub struct RecordingListener {
    wants_changes: bool,
    events: Mutex<Vec<DiscoveryEvent>>,
}

impl RecordingListener {
    pub fn new(wants_changes: bool) -> Arc<Self> {
        Arc::new(Self {
            wants_changes,
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<(EventKind, Vec<ServiceId>)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.kind, e.service_ids()))
            .collect()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    pub fn last(&self) -> Option<DiscoveryEvent> {
        self.events.lock().unwrap().last().cloned()
    }

    /// Wait until at least `n` events have arrived. Panics after five seconds.
    pub async fn wait_for(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.events.lock().unwrap().len() < n {
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "timed out waiting for {n} events, got {:?}",
                    self.events()
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn record(&self, event: &DiscoveryEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

impl DiscoveryListener for RecordingListener {
    fn discovered(&self, event: &DiscoveryEvent) {
        self.record(event);
    }

    fn discarded(&self, event: &DiscoveryEvent) {
        self.record(event);
    }

    fn changed(&self, event: &DiscoveryEvent) {
        self.record(event);
    }

    fn wants_changes(&self) -> bool {
        self.wants_changes
    }
}

// ── Live registry ────────────────────────────────────────────────────────────

/// A registry on 127.0.0.1 that answers unicast discovery until stopped.
pub struct TestRegistry {
    pub service_id: ServiceId,
    pub locator: Locator,
    groups: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl TestRegistry {
    pub async fn spawn(i: u8, member: &[&str]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let service_id = id(i);
        let locator = Locator::new("127.0.0.1", port);
        let groups = Arc::new(Mutex::new(self::groups(member)));

        let task = {
            let groups = groups.clone();
            let locator = locator.clone();
            tokio::spawn(async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    let body = UnicastBody {
                        service_id,
                        locator: locator.clone(),
                        groups: groups.lock().unwrap().clone(),
                    };
                    tokio::spawn(async move {
                        let _ = wire::serve_unicast(&mut stream, &body).await;
                    });
                }
            })
        };

        Self {
            service_id,
            locator,
            groups,
            task,
        }
    }

    pub fn set_groups(&self, member: &[&str]) {
        *self.groups.lock().unwrap() = groups(member);
    }

    /// Close the listening socket; later connects are refused.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}
