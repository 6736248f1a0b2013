//! lookout-core — shared types, wire codec, and configuration.
//! All other Lookout crates depend on this one.

pub mod codec;
pub mod config;
pub mod groups;
pub mod registrar;
pub mod wire;

pub use codec::{Constraints, Discovery, UnicastHandle, UnicastResponse, WireDiscovery};
pub use config::{DiscoverySettings, LookoutConfig};
pub use groups::DesiredGroups;
pub use registrar::{Registrar, RegistrarHandle};
pub use wire::{Locator, MulticastAnnouncement, MulticastRequest, ServiceId, WireError};
