//! /proxies/{proxy}/toxics handlers: list, add, inspect, update, remove.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use sluice_core::{ToxicConfig, ToxicPatch};

use super::{find_proxy, toxic_error, ApiState};

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

// ── /proxies/{proxy}/toxics (GET) ─────────────────────────────────────────────

pub async fn handle_toxic_list(
    State(state): State<ApiState>,
    Path(proxy): Path<String>,
) -> ApiResult<Vec<ToxicConfig>> {
    let proxy = find_proxy(&state, &proxy)?;
    let toxics = proxy.toxics.list().await;
    Ok(Json(toxics.iter().map(|t| t.describe()).collect()))
}

// ── /proxies/{proxy}/toxics (POST) ────────────────────────────────────────────

pub async fn handle_toxic_add(
    State(state): State<ApiState>,
    Path(proxy): Path<String>,
    Json(config): Json<ToxicConfig>,
) -> ApiResult<ToxicConfig> {
    let proxy = find_proxy(&state, &proxy)?;
    let toxic = proxy
        .toxics
        .add(&config, &state.registry)
        .await
        .map_err(toxic_error)?;
    Ok(Json(toxic.describe()))
}

// ── /proxies/{proxy}/toxics/{toxic} (GET) ─────────────────────────────────────

pub async fn handle_toxic_get(
    State(state): State<ApiState>,
    Path((proxy, toxic)): Path<(String, String)>,
) -> ApiResult<ToxicConfig> {
    let proxy = find_proxy(&state, &proxy)?;
    let toxic = proxy
        .toxics
        .get(&toxic)
        .await
        .ok_or((StatusCode::NOT_FOUND, format!("toxic not found: {toxic}")))?;
    Ok(Json(toxic.describe()))
}

// ── /proxies/{proxy}/toxics/{toxic} (POST) ────────────────────────────────────

pub async fn handle_toxic_update(
    State(state): State<ApiState>,
    Path((proxy, toxic)): Path<(String, String)>,
    Json(patch): Json<ToxicPatch>,
) -> ApiResult<ToxicConfig> {
    let proxy = find_proxy(&state, &proxy)?;
    let updated = proxy
        .toxics
        .update(&toxic, &patch, &state.registry)
        .await
        .map_err(toxic_error)?;
    Ok(Json(updated.describe()))
}

// ── /proxies/{proxy}/toxics/{toxic} (DELETE) ──────────────────────────────────

#[derive(Serialize)]
pub struct ToxicRemoveResponse {
    pub name: String,
    pub removed: bool,
}

pub async fn handle_toxic_remove(
    State(state): State<ApiState>,
    Path((proxy, toxic)): Path<(String, String)>,
) -> ApiResult<ToxicRemoveResponse> {
    let proxy = find_proxy(&state, &proxy)?;
    let removed = proxy.toxics.remove(&toxic).await.map_err(toxic_error)?;
    Ok(Json(ToxicRemoveResponse {
        name: removed.name,
        removed: true,
    }))
}
