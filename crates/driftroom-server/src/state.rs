//! Shared application state, threaded through every handler via
//! `axum::extract::State` (§9: "explicit singletons... never rely on lazy
//! construction").

use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use driftroom_blob::BlobStore;
use driftroom_crypto::MasterKey;
use driftroom_db::Store;

use crate::broadcast::Broadcaster;
use crate::registry::Registry;

/// Everything a handler needs: the persistence and blob handles (both
/// already internally pooled/thread-safe), the process-global master key,
/// the connection registry, and the derived auth secrets.
#[derive(Clone)]
pub struct AppState {
    /// Room/participant/message/attachment persistence.
    pub store: Arc<dyn Store>,
    /// Attachment and archive object storage.
    pub blob: Arc<dyn BlobStore>,
    /// Process-global key wrapping every room key.
    pub master_key: Arc<MasterKey>,
    /// Live WebSocket session tracking.
    pub registry: Arc<Registry>,
    /// Per-room event fan-out.
    pub broadcaster: Arc<Broadcaster>,
    /// HMAC secret for bearer token signing/verification.
    pub jwt_secret: Arc<Vec<u8>>,
    /// Signing key for the private device-id cookie jar.
    pub cookie_key: Key,
    /// Device-id cookie lifetime, in days.
    pub session_cookie_days: i64,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
