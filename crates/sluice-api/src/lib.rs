//! Control API — HTTP/JSON surface over the proxy table.

pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/proxies", get(handlers::handle_proxies))
        .route(
            "/proxies/{proxy}/toxics",
            get(handlers::handle_toxic_list).post(handlers::handle_toxic_add),
        )
        .route(
            "/proxies/{proxy}/toxics/{toxic}",
            get(handlers::handle_toxic_get)
                .post(handlers::handle_toxic_update)
                .delete(handlers::handle_toxic_remove),
        )
        .route("/reset", post(handlers::handle_reset))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, listen: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    serve_on(state, listener).await
}

/// Serve on an already-bound listener.
pub async fn serve_on(state: ApiState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    tracing::info!(listen = %listener.local_addr()?, "API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
