//! LookupDiscovery: lifecycle, public operations and the commit path.
//!
//! All engine state lives in one `Shared` behind an `Arc`; role tasks hold
//! clones of it. The desired-groups mutex doubles as the commit lock: every
//! insert, replace or removal in the registry table, together with the
//! enqueue of its notification, happens while it is held. Remote calls never
//! happen under it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use lookout_core::config::DiscoverySettings;
use lookout_core::groups::same_groups;
use lookout_core::{DesiredGroups, Discovery, Registrar, ServiceId, UnicastResponse};

use crate::announcement;
use crate::error::DiscoveryError;
use crate::event::{DiscoveryEvent, DiscoveryListener, EventKind};
use crate::interfaces::resolve_interfaces;
use crate::notifier::EventNotifier;
use crate::pending::PendingSet;
use crate::prepare::ProxyPreparer;
use crate::registry::RegistryTable;
use crate::request::{self, RequestState};
use crate::timer;

/// Uniform random delay in `0..=range`.
pub(crate) fn jitter(range: Duration) -> Duration {
    let ms = range.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=ms))
}

pub(crate) struct Shared {
    pub settings: DiscoverySettings,
    pub codec: Arc<dyn Discovery>,
    pub preparer: Arc<dyn ProxyPreparer>,
    /// Resolved multicast interfaces. Empty when multicast is disabled.
    pub interfaces: Vec<std::net::Ipv4Addr>,
    pub table: RegistryTable,
    pub pending: PendingSet,
    pub notifier: EventNotifier,
    /// Stops every role and unicast task.
    pub cancel: CancellationToken,
    pub requests: Mutex<RequestState>,
    groups: Mutex<DesiredGroups>,
    terminated: AtomicBool,
    tasks: Mutex<JoinSet<()>>,
    permits: Arc<Semaphore>,
    roles: Mutex<JoinSet<()>>,
    notifier_stop: CancellationToken,
    notifier_task: Mutex<Option<JoinHandle<()>>>,
    next_conn: AtomicU64,
    /// Every event enqueued by a commit, in lock order.
    #[cfg(test)]
    pub commits: Mutex<Vec<(EventKind, Vec<ServiceId>)>>,
}

impl Shared {
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Take the commit lock.
    pub fn lock_groups(&self) -> MutexGuard<'_, DesiredGroups> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn next_conn(&self) -> u64 {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    pub fn spawn_role<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut roles = self.roles.lock().unwrap_or_else(PoisonError::into_inner);
        while roles.try_join_next().is_some() {}
        roles.spawn(fut);
    }

    /// Spawn a unicast task on the bounded pool. The task waits out `delay`
    /// before it takes a pool slot.
    pub fn spawn_unicast<F>(&self, delay: Duration, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        let cancel = self.cancel.clone();
        let task = async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            fut.await;
        };
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(done) = tasks.try_join_next() {
            if let Err(e) = done {
                if e.is_panic() {
                    tracing::error!(error = %e, "unicast task panicked");
                }
            }
        }
        tasks.spawn(task);
    }

    /// Prepare and commit a newly resolved registry.
    ///
    /// Returns true if this call inserted it. Group overlap is re-checked
    /// under the commit lock since the desired set may have moved on while
    /// the handshake ran.
    pub fn add_discovered(&self, resp: UnicastResponse) -> bool {
        let service_id = resp.service_id;
        if self.table.contains(&service_id) {
            tracing::trace!(service_id = %service_id, "already discovered");
            return false;
        }
        let handle = match self.preparer.prepare(&service_id, resp.handle) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(service_id = %service_id, locator = %resp.locator, error = %e, "registrar rejected");
                return false;
            }
        };
        let registrar = Registrar {
            service_id,
            locator: resp.locator,
            groups: resp.groups,
            handle,
        };

        let desired = self.lock_groups();
        if self.is_terminated() {
            return false;
        }
        if !desired.overlaps(&registrar.groups) {
            tracing::debug!(
                service_id = %service_id,
                groups = ?registrar.groups,
                "registrar groups not wanted"
            );
            return false;
        }
        if !self.table.insert_new(registrar.clone(), Instant::now()) {
            tracing::trace!(service_id = %service_id, "lost discovery race");
            return false;
        }
        tracing::info!(
            service_id = %service_id,
            locator = %registrar.locator,
            groups = ?registrar.groups,
            "registrar discovered"
        );
        self.commit(DiscoveryEvent::new(EventKind::Discovered, vec![registrar]));
        true
    }

    /// Reconcile a registry's stored membership with `groups`.
    pub fn apply_groups(&self, service_id: &ServiceId, groups: Vec<String>) {
        let desired = self.lock_groups();
        if self.is_terminated() {
            return;
        }
        let Some(current) = self.table.get(service_id) else {
            return;
        };
        if same_groups(&current.groups, &groups) {
            return;
        }
        let updated = current.with_groups(groups);
        if desired.overlaps(&updated.groups) {
            self.table.replace(updated.clone());
            tracing::debug!(service_id = %service_id, groups = ?updated.groups, "registrar groups changed");
            self.commit(DiscoveryEvent::new(EventKind::Changed, vec![updated]));
        } else {
            self.table.remove(service_id);
            tracing::info!(service_id = %service_id, groups = ?updated.groups, "registrar left desired groups");
            self.commit(DiscoveryEvent::new(EventKind::Discarded, vec![updated]));
        }
    }

    /// Remove registries by ID. Unknown IDs are ignored.
    pub fn discard(&self, ids: &[ServiceId]) -> usize {
        let _commit = self.lock_groups();
        let removed: Vec<Registrar> = ids.iter().filter_map(|id| self.table.remove(id)).collect();
        self.announce_discards(removed)
    }

    /// Drop every registry whose groups no longer overlap `desired`.
    /// The caller holds the commit lock.
    fn discard_unwanted(&self, desired: &DesiredGroups) -> usize {
        let removed: Vec<Registrar> = self
            .table
            .snapshot()
            .into_iter()
            .filter(|r| !desired.overlaps(&r.groups))
            .filter_map(|r| self.table.remove(&r.service_id))
            .collect();
        self.announce_discards(removed)
    }

    fn announce_discards(&self, removed: Vec<Registrar>) -> usize {
        let count = removed.len();
        if count > 0 {
            for r in &removed {
                tracing::info!(service_id = %r.service_id, locator = %r.locator, "registrar discarded");
            }
            self.commit(DiscoveryEvent::new(EventKind::Discarded, removed));
        }
        count
    }

    /// Enqueue the event for a table change. The caller holds the commit lock.
    fn commit(&self, event: DiscoveryEvent) {
        #[cfg(test)]
        self.commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event.kind, event.service_ids()));
        self.notifier.notify(event);
    }
}

/// Point-in-time engine counters.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryStatus {
    pub registrars: usize,
    pub pending: usize,
    pub active_requestors: usize,
    pub response_port: Option<u16>,
    pub listeners: usize,
    pub terminated: bool,
}

/// Multicast lookup discovery.
///
/// Cheap to clone; all clones drive the same engine. Must be started from
/// within a tokio runtime.
#[derive(Clone)]
pub struct LookupDiscovery {
    shared: Arc<Shared>,
}

impl LookupDiscovery {
    /// Bind sockets and start every role.
    pub fn start(
        settings: DiscoverySettings,
        codec: Arc<dyn Discovery>,
        preparer: Arc<dyn ProxyPreparer>,
    ) -> Result<Self, DiscoveryError> {
        let interfaces = if settings.multicast_enabled {
            resolve_interfaces(&settings.interfaces)?
        } else {
            Vec::new()
        };

        let notifier_stop = CancellationToken::new();
        let notifier = EventNotifier::new();
        let notifier_task = notifier.spawn(notifier_stop.clone());

        let shared = Arc::new(Shared {
            groups: Mutex::new(settings.groups.clone()),
            permits: Arc::new(Semaphore::new(settings.max_concurrent_tasks)),
            settings,
            codec,
            preparer,
            interfaces,
            table: RegistryTable::new(),
            pending: PendingSet::new(),
            notifier,
            cancel: CancellationToken::new(),
            requests: Mutex::new(RequestState::default()),
            terminated: AtomicBool::new(false),
            tasks: Mutex::new(JoinSet::new()),
            roles: Mutex::new(JoinSet::new()),
            notifier_stop,
            notifier_task: Mutex::new(notifier_task),
            next_conn: AtomicU64::new(0),
            #[cfg(test)]
            commits: Mutex::new(Vec::new()),
        });

        if let Err(e) = launch(&shared) {
            shared.terminated.store(true, Ordering::SeqCst);
            shared.cancel.cancel();
            shared.notifier_stop.cancel();
            return Err(e);
        }

        tracing::info!(
            groups = ?shared.settings.groups,
            multicast = shared.settings.multicast_enabled,
            interfaces = ?shared.interfaces,
            "lookup discovery started"
        );
        Ok(Self { shared })
    }

    fn ensure_running(&self) -> Result<(), DiscoveryError> {
        if self.shared.is_terminated() {
            return Err(DiscoveryError::Terminated);
        }
        Ok(())
    }

    /// Register a listener. It first receives one `discovered` event with
    /// every registry already known.
    pub fn add_listener(&self, listener: Arc<dyn DiscoveryListener>) -> Result<(), DiscoveryError> {
        self.ensure_running()?;
        let _commit = self.shared.lock_groups();
        self.shared.notifier.add_listener(listener.clone());
        let existing = self.shared.table.snapshot();
        self.shared
            .notifier
            .notify_one(listener, DiscoveryEvent::new(EventKind::Discovered, existing));
        Ok(())
    }

    /// Unregister by identity. Returns false if it was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn DiscoveryListener>) -> bool {
        self.shared.notifier.remove_listener(listener)
    }

    /// Snapshot of the discovered registries.
    pub fn registrars(&self) -> Result<Vec<Registrar>, DiscoveryError> {
        self.ensure_running()?;
        Ok(self.shared.table.snapshot())
    }

    pub fn groups(&self) -> Result<DesiredGroups, DiscoveryError> {
        self.ensure_running()?;
        Ok(self.shared.lock_groups().clone())
    }

    /// Add groups to an explicit desired set and send requests for them.
    pub fn add_groups<I, S>(&self, groups: I) -> Result<(), DiscoveryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_running()?;
        let groups: Vec<String> = groups.into_iter().map(Into::into).collect();
        let added: Vec<String> = {
            let mut desired = self.shared.lock_groups();
            let DesiredGroups::Only(set) = &mut *desired else {
                return Err(DiscoveryError::AllGroupsUnsupported);
            };
            groups.into_iter().filter(|g| set.insert(g.clone())).collect()
        };
        if !added.is_empty() {
            tracing::info!(groups = ?added, "groups added");
            self.request(added);
        }
        Ok(())
    }

    /// Remove groups and discard registries that no longer overlap.
    pub fn remove_groups<I, S>(&self, groups: I) -> Result<(), DiscoveryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_running()?;
        let groups: Vec<String> = groups.into_iter().map(Into::into).collect();
        let mut desired = self.shared.lock_groups();
        let DesiredGroups::Only(set) = &mut *desired else {
            return Err(DiscoveryError::AllGroupsUnsupported);
        };
        let mut changed = false;
        for g in &groups {
            changed |= set.remove(g);
        }
        if changed {
            let discarded = self.shared.discard_unwanted(&desired);
            tracing::info!(groups = ?groups, discarded, "groups removed");
        }
        Ok(())
    }

    /// Replace the desired set, discarding registries outside it and
    /// requesting the groups that are new to it.
    pub fn set_groups(&self, groups: DesiredGroups) -> Result<(), DiscoveryError> {
        self.ensure_running()?;
        let to_request = {
            let mut desired = self.shared.lock_groups();
            let old = std::mem::replace(&mut *desired, groups);
            let discarded = self.shared.discard_unwanted(&desired);
            tracing::info!(groups = ?*desired, discarded, "groups replaced");
            match (old, &*desired) {
                (DesiredGroups::All, DesiredGroups::All) => None,
                // Registries that ignored the wildcard request may still
                // answer one naming their groups.
                (DesiredGroups::All, DesiredGroups::Only(new)) => {
                    (!new.is_empty()).then(|| new.iter().cloned().collect())
                }
                (DesiredGroups::Only(_), DesiredGroups::All) => Some(Vec::new()),
                (DesiredGroups::Only(old), DesiredGroups::Only(new)) => {
                    let added: Vec<String> = new.difference(&old).cloned().collect();
                    (!added.is_empty()).then_some(added)
                }
            }
        };
        if let Some(groups) = to_request {
            self.request(groups);
        }
        Ok(())
    }

    /// Discard a registry. Unknown IDs are a no-op.
    pub fn discard(&self, service_id: &ServiceId) -> Result<bool, DiscoveryError> {
        self.ensure_running()?;
        Ok(self.shared.discard(std::slice::from_ref(service_id)) > 0)
    }

    pub fn status(&self) -> DiscoveryStatus {
        let requests = self
            .shared
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        DiscoveryStatus {
            registrars: self.shared.table.len(),
            pending: self.shared.pending.len(),
            active_requestors: requests.active,
            response_port: requests.port(),
            listeners: self.shared.notifier.listener_count(),
            terminated: self.shared.is_terminated(),
        }
    }

    /// Port registries connect back to, while any requestor is active.
    pub fn response_port(&self) -> Option<u16> {
        self.shared
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .port()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    /// Stop everything. Later operations fail with `Terminated`.
    ///
    /// Unicast and role tasks get the configured grace period to unwind
    /// before they are aborted; queued notifications are delivered last.
    pub async fn terminate(&self) {
        let shared = &self.shared;
        if shared.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("terminating lookup discovery");
        shared.cancel.cancel();
        shared.permits.close();

        let mut tasks = std::mem::take(&mut *shared.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        let mut roles = std::mem::take(&mut *shared.roles.lock().unwrap_or_else(PoisonError::into_inner));
        let drained = tokio::time::timeout(shared.settings.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
            while roles.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                unicast = tasks.len(),
                roles = roles.len(),
                "tasks still running after grace period, aborting"
            );
            tasks.abort_all();
            roles.abort_all();
        }

        shared.pending.clear();
        request::reset(shared);

        shared.notifier_stop.cancel();
        let notifier = shared
            .notifier_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = notifier {
            let _ = handle.await;
        }
        tracing::info!("lookup discovery terminated");
    }

    fn request(&self, groups: Vec<String>) {
        if let Err(e) = request::start(&self.shared, groups) {
            tracing::warn!(error = %e, "could not start requestor");
        }
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

fn launch(shared: &Arc<Shared>) -> Result<(), DiscoveryError> {
    if shared.settings.multicast_enabled {
        let socket = announcement::bind(&shared.settings, &shared.interfaces)?;
        shared.spawn_role(announcement::run(shared.clone(), socket));
    }
    shared.spawn_role(timer::run(shared.clone()));
    let initial = shared.lock_groups().request_groups();
    if let Some(groups) = initial {
        request::start(shared, groups)?;
    }
    Ok(())
}
