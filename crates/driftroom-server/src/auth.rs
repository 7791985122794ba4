//! Bearer token issuance and verification (§4.E/§6), plus the device-id
//! session cookie the broker depends on (§9 "Device-id cookie").

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, Key, SameSite};
use axum_extra::headers::{Authorization, authorization::Bearer};
use chrono::{Duration, Utc};
use driftroom_core::{ApiError, Role};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_response::ApiErrorResponse;
use crate::state::AppState;

/// Token lifetime. Slightly past the 24h room ceiling so a token minted at
/// accept time outlives the room it names.
const TOKEN_TTL: Duration = Duration::hours(25);

const DEVICE_ID_COOKIE: &str = "driftroom_device_id";

/// Claims carried by both host and participant tokens. `participant_id` is
/// absent on a freshly-created (not yet accepted) host token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Room this token is scoped to.
    pub room_id: String,
    /// Host or guest.
    pub role: Role,
    /// The device id bound to this token (I6).
    pub device_id: Uuid,
    /// Present once the holder has a persisted participant row.
    pub participant_id: Option<i64>,
    /// Unix timestamp expiry, enforced by `jsonwebtoken`.
    exp: i64,
}

/// Mints a bearer token for a room's host, before a participant row exists.
#[must_use]
pub fn issue_host_token(secret: &[u8], room_id: &str, device_id: Uuid) -> String {
    encode_claims(
        secret,
        &Claims {
            room_id: room_id.to_owned(),
            role: Role::Host,
            device_id,
            participant_id: None,
            exp: (Utc::now() + TOKEN_TTL).timestamp(),
        },
    )
}

/// Mints a bearer token for a seated participant (host-after-accept or
/// guest-after-join).
#[must_use]
pub fn issue_participant_token(
    secret: &[u8],
    room_id: &str,
    role: Role,
    device_id: Uuid,
    participant_id: i64,
) -> String {
    encode_claims(
        secret,
        &Claims {
            room_id: room_id.to_owned(),
            role,
            device_id,
            participant_id: Some(participant_id),
            exp: (Utc::now() + TOKEN_TTL).timestamp(),
        },
    )
}

fn encode_claims(secret: &[u8], claims: &Claims) -> String {
    // HS256 signing never fails for well-formed claims; the only failure
    // mode is a key import error, which can't happen for raw HMAC bytes.
    encode(&Header::default(), claims, &EncodingKey::from_secret(secret))
        .unwrap_or_else(|_| String::new())
}

/// Verifies and decodes a bearer token.
///
/// # Errors
///
/// Returns [`ApiError::AuthFailure`] on any decode, signature, or expiry
/// failure.
pub fn verify_token(secret: &[u8], token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|err| ApiError::AuthFailure(format!("invalid token: {err}")))
}

/// Extracts and verifies the bearer token from `Authorization: Bearer ...`
/// without checking its role or room scope; route handlers verify that
/// themselves since the required room id is a path parameter, not known to
/// the extractor.
pub struct BearerClaims(pub Claims);

impl FromRequestParts<AppState> for BearerClaims {
    type Rejection = ApiErrorResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::AuthFailure("missing bearer token".to_owned()))?;
        let claims = verify_token(state.jwt_secret.as_slice(), bearer.token())?;
        Ok(Self(claims))
    }
}

/// Reads the device id from the signed session cookie, minting and setting
/// one via `jar` if absent.
#[must_use]
pub fn device_id_from_jar(jar: &PrivateCookieJar, cookie_days: i64) -> (Uuid, PrivateCookieJar) {
    if let Some(cookie) = jar.get(DEVICE_ID_COOKIE) {
        if let Ok(existing) = Uuid::parse_str(cookie.value()) {
            return (existing, jar.clone());
        }
    }
    let fresh = Uuid::new_v4();
    let cookie = Cookie::build((DEVICE_ID_COOKIE, fresh.to_string()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(cookie_days))
        .path("/")
        .build();
    (fresh, jar.clone().add(cookie))
}

/// Builds the signing key for the private cookie jar from the master key
/// bytes, via the `cookie` crate's own HKDF-based key derivation.
#[must_use]
pub fn cookie_key_from_master(master_key_bytes: &[u8]) -> Key {
    Key::derive_from(master_key_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_token_round_trips() {
        let secret = b"test-secret-at-least-this-long";
        let device_id = Uuid::new_v4();
        let token = issue_host_token(secret, "Ab12", device_id);
        let claims = verify_token(secret, &token).unwrap();
        assert_eq!(claims.room_id, "Ab12");
        assert_eq!(claims.role, Role::Host);
        assert_eq!(claims.device_id, device_id);
        assert!(claims.participant_id.is_none());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let secret = b"test-secret-at-least-this-long";
        let token = issue_host_token(secret, "Ab12", Uuid::new_v4());
        let wrong_secret = b"a-completely-different-secret!!";
        assert!(verify_token(wrong_secret, &token).is_err());
    }

    #[test]
    fn participant_token_carries_id() {
        let secret = b"test-secret-at-least-this-long";
        let token = issue_participant_token(secret, "Ab12", Role::Guest, Uuid::new_v4(), 7);
        let claims = verify_token(secret, &token).unwrap();
        assert_eq!(claims.participant_id, Some(7));
    }
}
