//! HTTP API handlers. Exposes engine state as JSON.

pub mod events;
pub mod groups;
pub mod registrars;
pub mod status;

use std::time::Instant;

use axum::http::StatusCode;

use lookout_core::ServiceId;
use lookout_discovery::{DiscoveryError, EventHistory, LookupDiscovery};

#[derive(Clone)]
pub struct ApiState {
    pub discovery: LookupDiscovery,
    /// Recent events, registered on the engine as a listener.
    pub history: EventHistory,
    /// Fires once to stop the daemon.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
    pub started_at: Instant,
}

type ApiError = (StatusCode, String);

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Parse a hex-encoded 16-byte service ID.
fn parse_service_id(hex_str: &str) -> Result<ServiceId, ApiError> {
    ServiceId::from_hex(hex_str).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            "service_id must be 32 hex characters".to_string(),
        )
    })
}

fn discovery_error(e: DiscoveryError) -> ApiError {
    let status = match e {
        DiscoveryError::Terminated => StatusCode::SERVICE_UNAVAILABLE,
        DiscoveryError::AllGroupsUnsupported => StatusCode::CONFLICT,
        DiscoveryError::Bind { .. } | DiscoveryError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

// Re-export handler functions for use in router setup.
pub use events::handle_events;
pub use groups::{handle_groups, handle_groups_add, handle_groups_remove, handle_groups_set};
pub use registrars::{handle_discard, handle_registrars};
pub use status::{handle_shutdown, handle_status};
