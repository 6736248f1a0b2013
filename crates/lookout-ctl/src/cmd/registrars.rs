//! Registrar listing and discard commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, delete_json, get_json};

#[derive(Deserialize)]
struct RegistrarsResponse {
    registrars: Vec<RegistrarInfo>,
}

#[derive(Deserialize)]
struct RegistrarInfo {
    service_id: String,
    host:       String,
    port:       u16,
    groups:     Vec<String>,
}

#[derive(Deserialize)]
struct DiscardResponse {
    service_id: String,
    discarded:  bool,
}

pub async fn cmd_registrars(port: u16) -> Result<()> {
    let resp: RegistrarsResponse = get_json(&format!("{}/registrars", base_url(port))).await?;

    if resp.registrars.is_empty() {
        println!("No registrars discovered.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Registrars ({})", resp.registrars.len());
    println!("═══════════════════════════════════════");

    for r in &resp.registrars {
        println!("  {}", r.service_id);
        println!("    locator: {}:{}", r.host, r.port);
        if r.groups.is_empty() {
            println!("    groups:  (none)");
        } else {
            println!("    groups:  {}", r.groups.join(", "));
        }
    }

    Ok(())
}

pub async fn cmd_discard(port: u16, service_id: &str) -> Result<()> {
    let resp: DiscardResponse =
        delete_json(&format!("{}/registrars/{}", base_url(port), service_id)).await?;

    if resp.discarded {
        println!("✓ Discarded {}", resp.service_id);
    } else {
        println!("{} was not in the discovered set", resp.service_id);
    }
    Ok(())
}
