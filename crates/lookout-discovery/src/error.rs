//! Errors surfaced by the public discovery operations.

use thiserror::Error;

use lookout_core::config::ConfigError;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The instance was terminated; no further operations are accepted.
    #[error("discovery has been terminated")]
    Terminated,
    /// Adding or removing individual groups while discovering all groups.
    #[error("cannot add or remove groups while discovering all groups")]
    AllGroupsUnsupported,
    #[error("failed to bind {what}: {source}")]
    Bind {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}
