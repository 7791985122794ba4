//! `/api/v1` HTTP JSON surface (§6).

mod rooms;
mod uploads;

use axum::Router;
use axum::http::HeaderMap;
use axum::routing::{get, post};

use crate::state::AppState;

/// Builds the full `/api/v1` router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms", post(rooms::create_room))
        .route("/rooms/{id}/accept", post(rooms::accept_room))
        .route("/rooms/{id}/join", post(rooms::join_room))
        .route("/rooms/{id}/name", post(rooms::set_display_name))
        .route("/rooms/{id}/destroy", post(rooms::destroy_room))
        .route("/rooms/{id}", get(rooms::get_room))
        .route("/uploads/init", post(uploads::init_upload))
        .route("/uploads/complete", post(uploads::complete_upload))
        .route("/uploads/{id}/url", get(uploads::download_url))
}

/// Best-effort client IP extraction from a reverse-proxy header, since this
/// service is expected to sit behind one in production (as the original
/// Flask app does). Absent the header, callers get `None`; IP is
/// advisory-only metadata (§3), never load-bearing.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|first| first.trim().to_owned())
}
