//! Proxy preparation, the trust boundary for newly discovered registries.
//!
//! Every handle produced by unicast discovery passes through a preparer
//! exactly once, before it is stored or shown to listeners.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use lookout_core::{RegistrarHandle, ServiceId};

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("registrar {0} is blocked")]
    Blocked(ServiceId),
}

pub trait ProxyPreparer: Send + Sync {
    /// Verify and optionally wrap the handle of a newly discovered registry.
    fn prepare(
        &self,
        service_id: &ServiceId,
        handle: Arc<dyn RegistrarHandle>,
    ) -> Result<Arc<dyn RegistrarHandle>, PrepareError>;
}

/// Accepts every handle unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl ProxyPreparer for AcceptAll {
    fn prepare(
        &self,
        _service_id: &ServiceId,
        handle: Arc<dyn RegistrarHandle>,
    ) -> Result<Arc<dyn RegistrarHandle>, PrepareError> {
        Ok(handle)
    }
}

/// Rejects registries by service ID.
#[derive(Debug, Default, Clone)]
pub struct Blocklist {
    blocked: HashSet<ServiceId>,
}

impl Blocklist {
    pub fn new(blocked: impl IntoIterator<Item = ServiceId>) -> Self {
        Self {
            blocked: blocked.into_iter().collect(),
        }
    }
}

impl ProxyPreparer for Blocklist {
    fn prepare(
        &self,
        service_id: &ServiceId,
        handle: Arc<dyn RegistrarHandle>,
    ) -> Result<Arc<dyn RegistrarHandle>, PrepareError> {
        if self.blocked.contains(service_id) {
            return Err(PrepareError::Blocked(*service_id));
        }
        Ok(handle)
    }
}
