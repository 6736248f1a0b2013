//! Lookout integration test harness.
//!
//! Tests run a real discovery engine against simulated registries on the
//! loopback interface. No root or multicast routing is needed: announcements
//! are sent as unicast datagrams to the engine's listener port, and
//! registries dial the engine's response port directly.
//!
//!   cargo test --test integration
//!
//! Tests that cannot bind a socket print SKIP and return.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use lookout_core::wire::{self, UnicastBody};
use lookout_core::{DesiredGroups, DiscoverySettings, Locator, ServiceId, WireDiscovery};
use lookout_discovery::{AcceptAll, DiscoveryError, EventHistory, LookupDiscovery};

mod announcement;
mod lifecycle;
mod liveness;
mod response;

// ── Harness ───────────────────────────────────────────────────────────────────

pub fn names(groups: &[&str]) -> Vec<String> {
    groups.iter().map(|g| g.to_string()).collect()
}

/// Engine settings with multicast off and fast request rounds.
pub fn settings(groups: DesiredGroups) -> DiscoverySettings {
    let mut s = DiscoverySettings::default();
    s.groups = groups;
    s.multicast_enabled = false;
    s.request_max = 3;
    s.request_interval = Duration::from_millis(200);
    s.final_request_interval = Duration::from_secs(5);
    s.constraints.unicast_timeout = Duration::from_secs(2);
    s.shutdown_grace = Duration::from_millis(500);
    s
}

/// Start an engine with an event history attached.
pub fn start(settings: DiscoverySettings) -> Result<(LookupDiscovery, EventHistory), DiscoveryError> {
    let discovery = LookupDiscovery::start(settings, Arc::new(WireDiscovery::new()), Arc::new(AcceptAll))?;
    let history = EventHistory::default();
    discovery.add_listener(Arc::new(history.clone()))?;
    Ok((discovery, history))
}

/// A free UDP port on loopback. Racy, but good enough for tests.
pub fn free_udp_port() -> Result<u16> {
    let probe = std::net::UdpSocket::bind("127.0.0.1:0")?;
    Ok(probe.local_addr()?.port())
}

/// Poll `cond` every 20ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut cond: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Count of events of one kind in the history.
pub fn count_kind(history: &EventHistory, kind: &str) -> usize {
    history.records().iter().filter(|r| r.kind == kind).count()
}

/// A registry simulated on loopback: answers unicast discovery on its own
/// port and can dial an engine's response port.
pub struct SimRegistry {
    pub service_id: ServiceId,
    pub locator: Locator,
    groups: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl SimRegistry {
    pub async fn spawn(member: &[&str]) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let locator = Locator::new("127.0.0.1", listener.local_addr()?.port());
        let service_id = ServiceId::random();
        let groups = Arc::new(Mutex::new(names(member)));

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

        Ok(Self {
            service_id,
            locator,
            groups,
            task,
        })
    }

    pub fn body(&self) -> UnicastBody {
        UnicastBody {
            service_id: self.service_id,
            locator: self.locator.clone(),
            groups: self.groups.lock().unwrap().clone(),
        }
    }

    /// Answer a multicast request the way a registry would: connect to the
    /// requester's response port and serve one exchange.
    pub async fn respond_to(&self, response_port: u16) -> Result<()> {
        let mut stream = TcpStream::connect(("127.0.0.1", response_port)).await?;
        wire::serve_unicast(&mut stream, &self.body()).await?;
        Ok(())
    }

    /// Stop accepting; later connects are refused.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}
