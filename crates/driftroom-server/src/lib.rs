//! HTTP/WebSocket server for the ephemeral two-party chat service.
//!
//! ```text
//! driftroom-crypto  (AEAD kernel)
//!        ^
//!        |
//! driftroom-core    (domain types, ApiError)
//!        ^
//!        |    \
//! driftroom-db   driftroom-blob
//!        ^           ^
//!        |          /
//!    driftroom-server (this crate: config, auth, registry, lifecycle,
//!                      HTTP routes, WebSocket broker, archival worker)
//! ```

pub mod archival;
pub mod auth;
pub mod broadcast;
pub mod broker;
pub mod config;
pub mod error_response;
mod frame;
mod http;
pub mod lifecycle;
pub mod registry;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Builds the full application router: `/api/v1/*`, the WebSocket endpoint,
/// and a liveness probe.
#[must_use]
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", http_router())
        .route("/ws", get(broker::ws_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn http_router() -> Router<AppState> {
    http::router()
}

async fn healthz() -> &'static str {
    "ok"
}

/// Convenience wrapper for call sites that need the state behind an `Arc`
/// (the archival worker, started before any request has run).
#[must_use]
pub fn shared(state: AppState) -> Arc<AppState> {
    Arc::new(state)
}
