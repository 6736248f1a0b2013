//! Registrar descriptors and the remote handle used to talk to a registry.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::wire::{Locator, ServiceId, WireError};

/// Remote operations a discovered registry supports.
///
/// Produced by the codec during unicast discovery and passed through the
/// proxy preparer before it is stored or handed to listeners.
pub trait RegistrarHandle: Send + Sync {
    /// Ask the registry for its current member groups.
    fn member_groups(&self) -> BoxFuture<'_, Result<Vec<String>, WireError>>;
}

/// A fully resolved registry.
///
/// Immutable: a group change produces a new descriptor rather than
/// mutating the stored one.
#[derive(Clone)]
pub struct Registrar {
    pub service_id: ServiceId,
    pub locator: Locator,
    /// Member groups as of the last successful discovery or group check.
    pub groups: Vec<String>,
    pub handle: Arc<dyn RegistrarHandle>,
}

impl Registrar {
    /// Copy of this descriptor with a new member-group list.
    pub fn with_groups(&self, groups: Vec<String>) -> Self {
        Self {
            service_id: self.service_id,
            locator: self.locator.clone(),
            groups,
            handle: self.handle.clone(),
        }
    }
}

impl fmt::Debug for Registrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrar")
            .field("service_id", &self.service_id)
            .field("locator", &self.locator)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}
