//! lookout-discovery — the lookup-discovery engine.
//!
//! Listens for registry announcements, sends multicast requests, resolves
//! candidates over unicast, tracks liveness, and tells listeners which
//! registries were discovered, changed or discarded.

mod announcement;
mod discovery;
mod error;
mod event;
mod history;
mod interfaces;
mod notifier;
mod pending;
mod prepare;
mod registry;
mod request;
mod response;
mod timer;
mod unicast;

#[cfg(test)]
mod testing;

pub use discovery::{DiscoveryStatus, LookupDiscovery};
pub use error::DiscoveryError;
pub use event::{DiscoveryEvent, DiscoveryListener, EventKind};
pub use history::{EventHistory, EventRecord};
pub use interfaces::resolve_interfaces;
pub use prepare::{AcceptAll, Blocklist, PrepareError, ProxyPreparer};
