//! Serializes listener callbacks onto one task.
//!
//! Producers enqueue a notification (listener snapshot + event) while they
//! hold the commit lock, so the FIFO order of the queue is the commit order
//! of the registry table. A single consumer drains the queue and calls each
//! listener in turn.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::event::{DiscoveryEvent, DiscoveryListener, EventKind};

type Listener = Arc<dyn DiscoveryListener>;

/// One queued delivery: the event plus who should receive it.
pub(crate) struct Notification {
    listeners: Vec<Listener>,
    event: DiscoveryEvent,
}

pub(crate) struct EventNotifier {
    listeners: RwLock<Vec<Listener>>,
    tx: mpsc::UnboundedSender<Notification>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
}

impl EventNotifier {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            listeners: RwLock::new(Vec::new()),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn add_listener(&self, listener: Listener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Remove by identity. Returns false if the listener was not registered.
    pub fn remove_listener(&self, listener: &Listener) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Queue an event for every currently registered listener.
    pub fn notify(&self, event: DiscoveryEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.enqueue(listeners, event);
    }

    /// Queue an event for a single listener.
    pub fn notify_one(&self, listener: Listener, event: DiscoveryEvent) {
        self.enqueue(vec![listener], event);
    }

    fn enqueue(&self, listeners: Vec<Listener>, event: DiscoveryEvent) {
        if listeners.is_empty() || event.registrars.is_empty() {
            return;
        }
        if self.tx.send(Notification { listeners, event }).is_err() {
            tracing::debug!("notifier stopped, dropping event");
        }
    }

    /// Start the consumer. Can only be called once.
    pub fn spawn(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take()?;
        Some(tokio::spawn(run(rx, cancel)))
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Notification>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            next = rx.recv() => match next {
                Some(n) => deliver(&n),
                None => return,
            },
            _ = cancel.cancelled() => break,
        }
    }

    // Producers have stopped; flush what was already committed.
    rx.close();
    let mut drained = 0usize;
    while let Ok(n) = rx.try_recv() {
        deliver(&n);
        drained += 1;
    }
    tracing::debug!(drained, "notifier stopped");
}

fn deliver(n: &Notification) {
    let event = &n.event;
    for listener in &n.listeners {
        if event.kind == EventKind::Changed && !listener.wants_changes() {
            continue;
        }
        let result = catch_unwind(AssertUnwindSafe(|| match event.kind {
            EventKind::Discovered => listener.discovered(event),
            EventKind::Discarded => listener.discarded(event),
            EventKind::Changed => listener.changed(event),
        }));
        if let Err(payload) = result {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(kind = event.kind.as_str(), reason, "discovery listener panicked");
        }
    }
}
