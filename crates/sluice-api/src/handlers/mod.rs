//! HTTP API handlers: exposes proxies and their toxics as JSON.

mod proxies;
mod toxics;

pub use proxies::*;
pub use toxics::*;

use std::sync::Arc;

use axum::http::StatusCode;

use sluice_core::{ToxicError, ToxicRegistry};
use sluice_services::{Proxy, ProxyTable};

#[derive(Clone)]
pub struct ApiState {
    pub proxies: ProxyTable,
    pub registry: Arc<ToxicRegistry>,
}

/// Clone the proxy out of the table so no map guard is held across awaits.
pub(crate) fn find_proxy(state: &ApiState, name: &str) -> Result<Arc<Proxy>, (StatusCode, String)> {
    state
        .proxies
        .get(name)
        .map(|p| p.value().clone())
        .ok_or((StatusCode::NOT_FOUND, format!("proxy not found: {name}")))
}

pub(crate) fn toxic_error(e: ToxicError) -> (StatusCode, String) {
    let status = match &e {
        ToxicError::NotFound(_) => StatusCode::NOT_FOUND,
        ToxicError::Duplicate(_) => StatusCode::CONFLICT,
        ToxicError::UnknownType(_)
        | ToxicError::InvalidAttributes { .. }
        | ToxicError::InvalidToxicity(_) => StatusCode::BAD_REQUEST,
    };
    (status, e.to_string())
}
