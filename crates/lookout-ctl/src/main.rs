//! lookout-ctl — command-line interface for the Lookout daemon.

use anyhow::{Context, Result};

mod cmd;

use cmd::events::cmd_events;
use cmd::groups::{cmd_groups, cmd_groups_add, cmd_groups_remove, cmd_groups_set};
use cmd::registrars::{cmd_discard, cmd_registrars};
use cmd::status::{cmd_shutdown, cmd_status};

const DEFAULT_PORT: u16 = 9101;

fn print_usage() {
    println!("Usage: lookout-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status                      Show engine status");
    println!("  registrars                  List discovered registrars");
    println!("  discard <service-id>        Drop a registrar from the discovered set");
    println!("  groups                      Show the desired group set");
    println!("  groups add <group>...       Add groups to the desired set");
    println!("  groups remove <group>...    Remove groups from the desired set");
    println!("  groups set <group>...       Replace the desired set (no groups pauses discovery)");
    println!("  groups set --all            Discover registrars of every group");
    println!("  events                      Show recent discovery events");
    println!("  shutdown                    Stop the daemon");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {}, or LOOKOUT_API__PORT)", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut port = match std::env::var("LOOKOUT_API__PORT") {
        Ok(v) => v.parse().context("LOOKOUT_API__PORT must be a number")?,
        Err(_) => DEFAULT_PORT,
    };

    // Parse --port option
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | []                      => cmd_status(port).await,
        ["registrars"]                       => cmd_registrars(port).await,
        ["discard", id]                      => cmd_discard(port, id).await,
        ["groups"]                           => cmd_groups(port).await,
        ["groups", "add", names @ ..] if !names.is_empty()    => cmd_groups_add(port, names).await,
        ["groups", "remove", names @ ..] if !names.is_empty() => cmd_groups_remove(port, names).await,
        ["groups", "set", "--all"]           => cmd_groups_set(port, true, &[]).await,
        ["groups", "set", names @ ..]        => cmd_groups_set(port, false, names).await,
        ["events"]                           => cmd_events(port).await,
        ["shutdown"]                         => cmd_shutdown(port).await,
        ["help"] | ["--help"] | ["-h"]       => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
