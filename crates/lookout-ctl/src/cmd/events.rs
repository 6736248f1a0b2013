//! Recent discovery events.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

#[derive(Deserialize)]
struct EventsResponse {
    events: Vec<EventRecord>,
}

#[derive(Deserialize)]
struct EventRecord {
    kind:         String,
    registrars:   BTreeMap<String, Vec<String>>,
    timestamp_ms: u64,
}

pub async fn cmd_events(port: u16) -> Result<()> {
    let resp: EventsResponse = get_json(&format!("{}/events", base_url(port))).await?;

    if resp.events.is_empty() {
        println!("No events recorded.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Events ({})", resp.events.len());
    println!("═══════════════════════════════════════");

    for e in &resp.events {
        println!("  [{}] {}", e.timestamp_ms, e.kind);
        for (id, groups) in &e.registrars {
            println!("    {}  {}", id, groups.join(", "));
        }
    }

    Ok(())
}
