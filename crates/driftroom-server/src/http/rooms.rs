use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::PrivateCookieJar;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use driftroom_core::{ApiError, Role};
use driftroom_db::Store;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::client_ip;
use crate::auth::{self, BearerClaims};
use crate::error_response::ApiErrorResponse;
use crate::frame::OutboundEvent;
use crate::lifecycle::{self, JoinError, JoinOutcome};
use crate::state::AppState;

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

impl IntoResponse for JoinError {
    fn into_response(self) -> Response {
        let (status, message): (StatusCode, String) = match self {
            Self::NotFound => (StatusCode::NOT_FOUND, "room not found".to_owned()),
            Self::Expired => (StatusCode::GONE, "room has expired".to_owned()),
            Self::NotJoinable => (StatusCode::BAD_REQUEST, "room is not joinable".to_owned()),
            Self::Full => (StatusCode::CONFLICT, "room is full".to_owned()),
            Self::Api(err) => return ApiErrorResponse(err).into_response(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn require_room_and_role(
    claims: &auth::Claims,
    room_id: &str,
    role: Role,
) -> Result<(), ApiErrorResponse> {
    if claims.room_id != room_id || claims.role != role {
        return Err(ApiError::AuthFailure("token not valid for this room".to_owned()).into());
    }
    Ok(())
}

fn require_room(claims: &auth::Claims, room_id: &str) -> Result<(), ApiErrorResponse> {
    if claims.room_id != room_id {
        return Err(ApiError::AuthFailure("token not valid for this room".to_owned()).into());
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    room_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    room_id: String,
    room_token: String,
    status: String,
}

pub async fn create_room(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Json(body): Json<CreateRoomRequest>,
) -> Result<(PrivateCookieJar, Json<CreateRoomResponse>), ApiErrorResponse> {
    let (device_id, jar) = auth::device_id_from_jar(&jar, state.session_cookie_days);
    let room = lifecycle::create_room(state.store.as_ref(), body.room_id).await?;
    let token = auth::issue_host_token(state.jwt_secret.as_slice(), &room.room_id, device_id);
    Ok((
        jar,
        Json(CreateRoomResponse {
            room_id: room.room_id,
            room_token: token,
            status: room.status.to_string(),
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct AcceptRoomResponse {
    success: bool,
    status: String,
    participant_token: String,
    participant_id: i64,
    room_key_b64: String,
}

pub async fn accept_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    BearerClaims(claims): BearerClaims,
) -> Result<Json<AcceptRoomResponse>, ApiErrorResponse> {
    require_room_and_role(&claims, &room_id, Role::Host)?;

    let outcome = lifecycle::accept_room(
        state.store.as_ref(),
        &state.master_key,
        &room_id,
        claims.device_id,
        None,
    )
    .await?;
    let Some((room, participant, room_key)) = outcome else {
        return Err(ApiError::StateConflict("room is not pending".to_owned()).into());
    };

    let token = auth::issue_participant_token(
        state.jwt_secret.as_slice(),
        &room_id,
        Role::Host,
        claims.device_id,
        participant.id,
    );
    Ok(Json(AcceptRoomResponse {
        success: true,
        status: room.status.to_string(),
        participant_token: token,
        participant_id: participant.id,
        room_key_b64: b64(room_key.as_bytes()),
    }))
}

#[derive(Debug, Serialize)]
pub struct JoinRoomResponse {
    participant_id: i64,
    participant_token: String,
    role: Role,
    room_key_b64: String,
    display_name: Option<String>,
}

pub async fn join_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    headers: axum::http::HeaderMap,
    jar: PrivateCookieJar,
) -> Result<(StatusCode, PrivateCookieJar, Json<JoinRoomResponse>), JoinError> {
    let (device_id, jar) = auth::device_id_from_jar(&jar, state.session_cookie_days);
    let ip = client_ip(&headers);

    let outcome = lifecycle::join_room(
        state.store.as_ref(),
        &state.registry,
        &state.master_key,
        &room_id,
        device_id,
        ip,
    )
    .await?;

    let status = match &outcome {
        JoinOutcome::Reconnect { .. } => StatusCode::OK,
        JoinOutcome::Fresh { .. } => StatusCode::CREATED,
    };
    let participant = outcome.participant().clone();
    let room_key = outcome.room_key().clone();
    let token = auth::issue_participant_token(
        state.jwt_secret.as_slice(),
        &room_id,
        participant.role,
        device_id,
        participant.id,
    );

    Ok((
        status,
        jar,
        Json(JoinRoomResponse {
            participant_id: participant.id,
            participant_token: token,
            role: participant.role,
            room_key_b64: b64(room_key.as_bytes()),
            display_name: participant.display_name,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct SetDisplayNameRequest {
    display_name: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    success: bool,
}

pub async fn set_display_name(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    BearerClaims(claims): BearerClaims,
    Json(body): Json<SetDisplayNameRequest>,
) -> Result<Json<SuccessResponse>, ApiErrorResponse> {
    require_room(&claims, &room_id)?;
    let Some(participant_id) = claims.participant_id else {
        return Err(ApiError::AuthFailure("token has no participant".to_owned()).into());
    };
    if body.display_name.trim().is_empty() {
        return Err(ApiError::validation("display name must not be empty").into());
    }

    let updated = state
        .store
        .set_display_name(participant_id, body.display_name.trim())
        .await?;
    if !updated {
        return Err(ApiError::NotFound("participant not found".to_owned()).into());
    }

    state.broadcaster.publish(
        &room_id,
        &serde_json::to_string(&OutboundEvent::ParticipantNameAnnounced {
            participant_id: Some(participant_id),
            display_name: body.display_name.trim().to_owned(),
            role: claims.role,
        })
        .unwrap_or_default(),
    );

    Ok(Json(SuccessResponse { success: true }))
}

pub async fn destroy_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    BearerClaims(claims): BearerClaims,
) -> Result<Json<SuccessResponse>, ApiErrorResponse> {
    require_room(&claims, &room_id)?;
    let closed = lifecycle::close_room(state.store.as_ref(), &room_id).await?;
    if !closed {
        tracing::error!(room_id = %room_id, "destroy_room: room was not active/locked");
        return Err(ApiError::StorageFailure(format!("failed to destroy room {room_id}")).into());
    }

    state.broadcaster.publish(
        &room_id,
        &serde_json::to_string(&OutboundEvent::RoomClosed {
            reason: "destroyed".to_owned(),
        })
        .unwrap_or_default(),
    );

    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Serialize)]
pub struct RoomDto {
    room_id: String,
    status: String,
    created_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ParticipantDto {
    id: i64,
    role: Role,
    display_name: Option<String>,
    is_connected: bool,
}

#[derive(Debug, Serialize)]
pub struct RoomInfoResponse {
    room: RoomDto,
    participants: Vec<ParticipantDto>,
    participant_count: usize,
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    BearerClaims(claims): BearerClaims,
) -> Result<Json<RoomInfoResponse>, ApiErrorResponse> {
    require_room(&claims, &room_id)?;

    let room = state
        .store
        .get_room(&room_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("room {room_id} not found")))?;
    let participants = state.store.get_room_participants(&room_id).await?;

    let dtos: Vec<ParticipantDto> = participants
        .iter()
        .map(|p| ParticipantDto {
            id: p.id,
            role: p.role,
            display_name: p.display_name.clone(),
            is_connected: state.registry.is_connected(&room_id, p.id),
        })
        .collect();

    Ok(Json(RoomInfoResponse {
        participant_count: dtos.len(),
        participants: dtos,
        room: RoomDto {
            room_id: room.room_id,
            status: room.status.to_string(),
            created_at: room.created_at,
            accepted_at: room.accepted_at,
            expires_at: room.expires_at,
        },
    }))
}
