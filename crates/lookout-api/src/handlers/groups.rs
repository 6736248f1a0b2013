//! /groups handlers: view and change the desired group set.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use lookout_core::DesiredGroups;

use super::{discovery_error, ApiError, ApiState};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupsView {
    pub all: bool,
    pub groups: Vec<String>,
}

impl From<&DesiredGroups> for GroupsView {
    fn from(g: &DesiredGroups) -> Self {
        match g.names() {
            None => Self {
                all: true,
                groups: Vec::new(),
            },
            Some(groups) => Self { all: false, groups },
        }
    }
}

fn current(state: &ApiState) -> Result<Json<GroupsView>, ApiError> {
    let groups = state.discovery.groups().map_err(discovery_error)?;
    Ok(Json(GroupsView::from(&groups)))
}

// ── /groups (GET) ─────────────────────────────────────────────────────────────

pub async fn handle_groups(State(state): State<ApiState>) -> Result<Json<GroupsView>, ApiError> {
    current(&state)
}

// ── /groups (PUT) ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SetGroupsRequest {
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub groups: Vec<String>,
}

pub async fn handle_groups_set(
    State(state): State<ApiState>,
    Json(req): Json<SetGroupsRequest>,
) -> Result<Json<GroupsView>, ApiError> {
    let desired = if req.all {
        DesiredGroups::All
    } else {
        DesiredGroups::only(req.groups)
    };
    state
        .discovery
        .set_groups(desired)
        .map_err(discovery_error)?;
    current(&state)
}

// ── /groups/add, /groups/remove (POST) ────────────────────────────────────────

#[derive(Deserialize)]
pub struct GroupsRequest {
    pub groups: Vec<String>,
}

pub async fn handle_groups_add(
    State(state): State<ApiState>,
    Json(req): Json<GroupsRequest>,
) -> Result<Json<GroupsView>, ApiError> {
    state
        .discovery
        .add_groups(req.groups)
        .map_err(discovery_error)?;
    current(&state)
}

pub async fn handle_groups_remove(
    State(state): State<ApiState>,
    Json(req): Json<GroupsRequest>,
) -> Result<Json<GroupsView>, ApiError> {
    state
        .discovery
        .remove_groups(req.groups)
        .map_err(discovery_error)?;
    current(&state)
}
