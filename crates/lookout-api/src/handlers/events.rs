//! /events handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use lookout_discovery::EventRecord;

use super::ApiState;

#[derive(Serialize)]
pub struct EventsResponse {
    pub events: Vec<EventRecord>,
}

pub async fn handle_events(State(state): State<ApiState>) -> Json<EventsResponse> {
    Json(EventsResponse {
        events: state.history.records(),
    })
}
