//! sluiced — fault-injecting TCP proxy daemon.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinSet;

use sluice_core::config::SluiceConfig;
use sluice_core::ToxicRegistry;
use sluice_services::{new_proxy_table, Proxy};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = SluiceConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = SluiceConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        SluiceConfig::default()
    });
    tracing::info!(proxies = config.proxies.len(), "sluiced starting");

    // Shared state
    let registry = Arc::new(ToxicRegistry::with_builtin());
    tracing::info!(toxics = ?registry.names(), "toxic types registered");
    let proxies = new_proxy_table();

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Proxies ──────────────────────────────────────────────────────────────

    let mut proxy_tasks = JoinSet::new();
    for proxy_config in config.proxies.iter().filter(|p| p.enabled) {
        let proxy = match Proxy::from_config(proxy_config, &registry).await {
            Ok(p) => Arc::new(p),
            Err(e) => {
                tracing::error!(proxy = %proxy_config.name, error = %e, "proxy rejected");
                continue;
            }
        };
        let listener = match proxy.bind().await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(proxy = %proxy.name, error = %e, "proxy not started");
                continue;
            }
        };
        proxies.insert(proxy.name.clone(), proxy.clone());
        proxy_tasks.spawn(proxy.run(listener, shutdown_tx.subscribe()));
    }

    // ── Control API ──────────────────────────────────────────────────────────

    let api_task = if config.api.enabled {
        let state = sluice_api::handlers::ApiState {
            proxies: proxies.clone(),
            registry: registry.clone(),
        };
        let listen = config.api.listen.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = sluice_api::serve(state, &listen).await {
                tracing::error!(error = %e, "control API failed");
            }
        }))
    } else {
        tracing::info!("control API disabled");
        None
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = async {
            match api_task {
                Some(task) => task.await,
                None => std::future::pending().await,
            }
        } => tracing::error!("control API exited: {:?}", r),
    }

    while let Some(r) = proxy_tasks.join_next().await {
        match r {
            Ok(Err(e)) => tracing::warn!(error = %e, "proxy exited with error"),
            Err(e) => tracing::warn!(error = %e, "proxy task panicked"),
            Ok(Ok(())) => {}
        }
    }

    Ok(())
}
