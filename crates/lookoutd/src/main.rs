//! lookoutd — Lookout discovery daemon.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use lookout_api::ApiState;
use lookout_core::{LookoutConfig, WireDiscovery};
use lookout_discovery::{AcceptAll, Blocklist, EventHistory, LookupDiscovery, ProxyPreparer};

mod log_listener;

use log_listener::LogListener;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = LookoutConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = LookoutConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        LookoutConfig::default()
    });
    let settings = config.resolve().context("invalid configuration")?;

    let blocked = config
        .trust
        .blocked_ids()
        .context("invalid trust configuration")?;
    let preparer: Arc<dyn ProxyPreparer> = if blocked.is_empty() {
        Arc::new(AcceptAll)
    } else {
        tracing::info!(count = blocked.len(), "registrar blocklist loaded");
        Arc::new(Blocklist::new(blocked))
    };

    tracing::info!(
        groups = ?settings.groups,
        multicast = settings.multicast_enabled,
        port = settings.port,
        "lookoutd starting"
    );

    let discovery = LookupDiscovery::start(settings, Arc::new(WireDiscovery::new()), preparer)
        .context("failed to start discovery")?;

    let history = EventHistory::default();
    discovery.add_listener(Arc::new(LogListener))?;
    discovery.add_listener(Arc::new(history.clone()))?;

    // ── Shutdown ─────────────────────────────────────────────────────────────

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let mut shutdown_rx = shutdown_tx.subscribe();
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                let _ = shutdown.send(());
            }
        });
    }

    // ── API server ───────────────────────────────────────────────────────────

    let api_port = config.api.port;
    let api_task = {
        let state = ApiState {
            discovery: discovery.clone(),
            history,
            shutdown_tx: shutdown_tx.clone(),
            started_at: Instant::now(),
        };
        tokio::spawn(async move {
            if let Err(e) = lookout_api::serve(state, api_port).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = api_task           => tracing::error!("API task exited: {:?}", r),
    }

    discovery.terminate().await;
    tracing::info!("lookoutd stopped");
    Ok(())
}
