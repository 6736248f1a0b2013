//! /registrars handlers: listing and explicit discard.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use lookout_core::Registrar;

use super::{discovery_error, parse_service_id, ApiError, ApiState};

// ── /registrars (GET) ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct RegistrarsResponse {
    pub registrars: Vec<RegistrarInfo>,
}

#[derive(Serialize)]
pub struct RegistrarInfo {
    pub service_id: String,
    pub host: String,
    pub port: u16,
    pub groups: Vec<String>,
}

impl From<&Registrar> for RegistrarInfo {
    fn from(r: &Registrar) -> Self {
        Self {
            service_id: r.service_id.to_string(),
            host: r.locator.host.clone(),
            port: r.locator.port,
            groups: r.groups.clone(),
        }
    }
}

pub async fn handle_registrars(
    State(state): State<ApiState>,
) -> Result<Json<RegistrarsResponse>, ApiError> {
    let mut registrars: Vec<RegistrarInfo> = state
        .discovery
        .registrars()
        .map_err(discovery_error)?
        .iter()
        .map(RegistrarInfo::from)
        .collect();
    registrars.sort_by(|a, b| a.service_id.cmp(&b.service_id));
    Ok(Json(RegistrarsResponse { registrars }))
}

// ── /registrars/:id (DELETE) ──────────────────────────────────────────────────

#[derive(Serialize)]
pub struct DiscardResponse {
    pub service_id: String,
    pub discarded: bool,
}

pub async fn handle_discard(
    State(state): State<ApiState>,
    Path(service_id): Path<String>,
) -> Result<Json<DiscardResponse>, ApiError> {
    let id = parse_service_id(&service_id)?;
    let discarded = state.discovery.discard(&id).map_err(discovery_error)?;

    if discarded {
        tracing::info!(service_id = %id, "registrar discarded via API");
    }

    Ok(Json(DiscardResponse {
        service_id,
        discarded,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;
    use axum::http::StatusCode;
    use lookout_core::DesiredGroups;

    #[tokio::test]
    async fn empty_engine_lists_nothing() {
        let state = test_support::state(DesiredGroups::All);
        let Json(resp) = handle_registrars(State(state.clone())).await.unwrap();
        assert!(resp.registrars.is_empty());
        state.discovery.terminate().await;
    }

    #[tokio::test]
    async fn discard_of_unknown_id_is_not_an_error() {
        let state = test_support::state(DesiredGroups::All);
        let id = "0f".repeat(16);
        let Json(resp) = handle_discard(State(state.clone()), Path(id.clone()))
            .await
            .unwrap();
        assert_eq!(resp.service_id, id);
        assert!(!resp.discarded);
        state.discovery.terminate().await;
    }

    #[tokio::test]
    async fn terminated_engine_is_unavailable() {
        let state = test_support::state(DesiredGroups::All);
        state.discovery.terminate().await;
        let Err((status, _)) = handle_registrars(State(state)).await else {
            panic!("expected an error");
        };
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
