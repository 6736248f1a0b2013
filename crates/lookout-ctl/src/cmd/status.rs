//! Daemon status and shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::groups::GroupsView;
use super::http::{base_url, get_json, post_json};

#[derive(Deserialize)]
struct StatusResponse {
    registrars:        usize,
    pending:           usize,
    active_requestors: usize,
    response_port:     Option<u16>,
    listeners:         usize,
    terminated:        bool,
    groups:            Option<GroupsView>,
    events_recorded:   usize,
    uptime_secs:       u64,
}

#[derive(Deserialize)]
struct ShutdownResponse {
    message: String,
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let s: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Lookout Status");
    println!("═══════════════════════════════════════");
    println!("  Uptime:             {}s", s.uptime_secs);
    println!(
        "  State:              {}",
        if s.terminated { "terminated" } else { "running" }
    );
    match &s.groups {
        Some(g) => println!("  Groups:             {}", g.describe()),
        None => println!("  Groups:             -"),
    }
    println!("  Registrars:         {}", s.registrars);
    println!("  Pending tasks:      {}", s.pending);
    println!("  Active requestors:  {}", s.active_requestors);
    match s.response_port {
        Some(p) => println!("  Response port:      {}", p),
        None => println!("  Response port:      closed"),
    }
    println!("  Listeners:          {}", s.listeners);
    println!("  Events recorded:    {}", s.events_recorded);

    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    let resp: ShutdownResponse =
        post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    println!("{}", resp.message);
    Ok(())
}
