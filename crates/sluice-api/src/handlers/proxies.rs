//! /proxies and /reset handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use sluice_core::ToxicConfig;

use super::ApiState;

// ── /proxies ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ProxiesResponse {
    pub proxies: Vec<ProxyInfo>,
}

#[derive(Serialize)]
pub struct ProxyInfo {
    pub name: String,
    pub listen: String,
    pub upstream: String,
    pub connections: usize,
    pub toxics: Vec<ToxicConfig>,
}

pub async fn handle_proxies(State(state): State<ApiState>) -> Json<ProxiesResponse> {
    let mut snapshot: Vec<_> = state.proxies.iter().map(|e| e.value().clone()).collect();
    snapshot.sort_by(|a, b| a.name.cmp(&b.name));

    let mut proxies = Vec::with_capacity(snapshot.len());
    for proxy in snapshot {
        proxies.push(ProxyInfo {
            name: proxy.name.clone(),
            listen: proxy.listen.clone(),
            upstream: proxy.upstream.clone(),
            connections: proxy.toxics.connections().await,
            toxics: proxy
                .toxics
                .list()
                .await
                .iter()
                .map(|t| t.describe())
                .collect(),
        });
    }

    Json(ProxiesResponse { proxies })
}

// ── /reset ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ResetResponse {
    pub proxies_reset: usize,
}

pub async fn handle_reset(State(state): State<ApiState>) -> Json<ResetResponse> {
    let snapshot: Vec<_> = state.proxies.iter().map(|e| e.value().clone()).collect();
    for proxy in &snapshot {
        proxy.toxics.reset().await;
    }
    tracing::info!(proxies = snapshot.len(), "all toxics reset via API");
    Json(ResetResponse {
        proxies_reset: snapshot.len(),
    })
}
