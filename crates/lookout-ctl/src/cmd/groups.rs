//! Desired group set commands.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::http::{base_url, get_json, post_json_body, put_json_body};

#[derive(Deserialize)]
pub struct GroupsView {
    pub all:    bool,
    pub groups: Vec<String>,
}

impl GroupsView {
    pub fn describe(&self) -> String {
        if self.all {
            "all".to_string()
        } else if self.groups.is_empty() {
            "(none, discovery paused)".to_string()
        } else {
            self.groups.join(", ")
        }
    }
}

#[derive(Serialize)]
struct SetGroupsRequest {
    all:    bool,
    groups: Vec<String>,
}

#[derive(Serialize)]
struct GroupsRequest {
    groups: Vec<String>,
}

fn print_groups(view: &GroupsView) {
    println!("Groups: {}", view.describe());
}

pub async fn cmd_groups(port: u16) -> Result<()> {
    let view: GroupsView = get_json(&format!("{}/groups", base_url(port))).await?;
    print_groups(&view);
    Ok(())
}

pub async fn cmd_groups_add(port: u16, groups: &[&str]) -> Result<()> {
    let req = GroupsRequest {
        groups: groups.iter().map(|g| g.to_string()).collect(),
    };
    let view: GroupsView =
        post_json_body(&format!("{}/groups/add", base_url(port)), &req).await?;
    print_groups(&view);
    Ok(())
}

pub async fn cmd_groups_remove(port: u16, groups: &[&str]) -> Result<()> {
    let req = GroupsRequest {
        groups: groups.iter().map(|g| g.to_string()).collect(),
    };
    let view: GroupsView =
        post_json_body(&format!("{}/groups/remove", base_url(port)), &req).await?;
    print_groups(&view);
    Ok(())
}

/// Replace the desired set. `all` ignores `groups`.
pub async fn cmd_groups_set(port: u16, all: bool, groups: &[&str]) -> Result<()> {
    let req = SetGroupsRequest {
        all,
        groups: groups.iter().map(|g| g.to_string()).collect(),
    };
    let view: GroupsView = put_json_body(&format!("{}/groups", base_url(port)), &req).await?;
    print_groups(&view);
    Ok(())
}
