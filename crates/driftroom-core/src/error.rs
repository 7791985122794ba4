use driftroom_crypto::CryptoFailure;
use thiserror::Error;

/// Which HTTP status a [`ApiError::ValidationFailure`] maps to — §7 assigns
/// three distinct codes to this one variant depending on what was rejected,
/// so the cause has to carry its own status rather than being collapsed to
/// one code at the `IntoResponse` boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// Malformed payload shape. Maps to `400`.
    BadRequest,
    /// Upload exceeds the size limit. Maps to `413`.
    PayloadTooLarge,
    /// Disallowed MIME type. Maps to `415`.
    UnsupportedMediaType,
}

/// The single error taxonomy shared by the HTTP surface, the WebSocket
/// broker, and the archival worker.
///
/// Each variant carries a human-readable message for logging; the mapping
/// to HTTP status codes and WebSocket propagation policy lives with the
/// variant's [`ApiError::to_ws_outcome`] and in `driftroom-server`'s
/// `IntoResponse` wiring, not here, since this crate has no HTTP
/// dependency.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing/invalid token, or device id mismatch.
    #[error("auth failure: {0}")]
    AuthFailure(String),
    /// Unknown room, participant, or attachment.
    #[error("not found: {0}")]
    NotFound(String),
    /// The room (or attachment) is in the wrong state for the requested
    /// operation.
    #[error("state conflict: {0}")]
    StateConflict(String),
    /// Room full, or the room-id space was exhausted on create.
    #[error("capacity exhausted: {0}")]
    CapacityExhausted(String),
    /// AEAD open failure.
    #[error("crypto failure: {0}")]
    CryptoFailure(#[from] CryptoFailure),
    /// Database or blob-store I/O failure.
    #[error("storage failure: {0}")]
    StorageFailure(String),
    /// Payload shape, size, or MIME type rejected; `kind` selects the HTTP
    /// status (`400`/`413`/`415`), since §7 never collapses the three.
    #[error("validation failure: {1}")]
    ValidationFailure(ValidationKind, String),
}

impl ApiError {
    /// Builds a [`Self::ValidationFailure`] with [`ValidationKind::BadRequest`],
    /// the common case (malformed shape, not a size/MIME rejection).
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailure(ValidationKind::BadRequest, message.into())
    }
}

/// How a WebSocket handler should react to an [`ApiError`] raised while
/// processing one frame, per §7's socket propagation policy: the socket
/// never receives error details, and only handshake failures close it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsOutcome {
    /// Drop the connection entirely (handshake-time failures only).
    Disconnect,
    /// Swallow the error and keep the socket open; nothing is sent back.
    SwallowSilently,
}

impl ApiError {
    /// Classifies this error for the WebSocket broker. Only [`Self::AuthFailure`]
    /// at handshake time warrants closing the socket; every other error
    /// encountered while handling an inbound frame is swallowed so the
    /// connection survives a single bad frame.
    #[must_use]
    pub const fn to_ws_outcome(&self) -> WsOutcome {
        match self {
            Self::AuthFailure(_) => WsOutcome::Disconnect,
            _ => WsOutcome::SwallowSilently,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_disconnects() {
        let err = ApiError::AuthFailure("bad token".to_owned());
        assert_eq!(err.to_ws_outcome(), WsOutcome::Disconnect);
    }

    #[test]
    fn state_conflict_is_swallowed() {
        let err = ApiError::StateConflict("room not active".to_owned());
        assert_eq!(err.to_ws_outcome(), WsOutcome::SwallowSilently);
    }
}
