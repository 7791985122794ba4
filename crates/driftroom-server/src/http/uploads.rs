//! `/uploads/*` attachment routes (§6), grounded in
//! `chitty/routes/uploads.py`'s init/complete/url flow.

use axum::Json;
use axum::extract::{Path, State};
use driftroom_blob::BlobStore;
use driftroom_core::{ALLOWED_MIME_TYPES, ApiError, MAX_UPLOAD_BYTES, ValidationKind};
use driftroom_db::Store;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::BearerClaims;
use crate::error_response::ApiErrorResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InitUploadRequest {
    filename: String,
    file_size: i64,
    mime_type: String,
}

#[derive(Debug, Serialize)]
pub struct InitUploadResponse {
    attachment_id: i64,
    upload_url: String,
    object_key: String,
}

pub async fn init_upload(
    State(state): State<AppState>,
    BearerClaims(claims): BearerClaims,
    Json(body): Json<InitUploadRequest>,
) -> Result<Json<InitUploadResponse>, ApiErrorResponse> {
    let Some(_participant_id) = claims.participant_id else {
        return Err(ApiError::AuthFailure("token has no participant".to_owned()).into());
    };

    if body.file_size > MAX_UPLOAD_BYTES {
        return Err(ApiError::ValidationFailure(
            ValidationKind::PayloadTooLarge,
            format!("file exceeds the {MAX_UPLOAD_BYTES} byte limit"),
        )
        .into());
    }
    if !ALLOWED_MIME_TYPES.contains(&body.mime_type.as_str()) {
        return Err(ApiError::ValidationFailure(
            ValidationKind::UnsupportedMediaType,
            format!("unsupported mime type {}", body.mime_type),
        )
        .into());
    }

    let object_key = format!(
        "{}/{}_{}",
        claims.room_id,
        Uuid::new_v4(),
        sanitize_filename(&body.filename)
    );

    let attachment = state
        .store
        .create_attachment(&claims.room_id, &object_key, &body.mime_type, body.file_size)
        .await?;
    let upload_url = state.blob.presigned_put(&object_key).await?;

    Ok(Json(InitUploadResponse {
        attachment_id: attachment.id,
        upload_url,
        object_key,
    }))
}

/// Strips path separators from a client-supplied filename before it
/// becomes part of an object key.
fn sanitize_filename(filename: &str) -> String {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .to_owned()
}

#[derive(Debug, Deserialize)]
pub struct CompleteUploadRequest {
    attachment_id: i64,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    success: bool,
}

pub async fn complete_upload(
    State(state): State<AppState>,
    BearerClaims(claims): BearerClaims,
    Json(body): Json<CompleteUploadRequest>,
) -> Result<Json<SuccessResponse>, ApiErrorResponse> {
    let attachment = state
        .store
        .get_attachment(body.attachment_id, &claims.room_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("attachment not found".to_owned()))?;
    if attachment.available {
        return Err(ApiError::StateConflict("attachment already complete".to_owned()).into());
    }
    if !state.blob.object_exists(&attachment.object_key).await? {
        return Err(ApiError::NotFound("uploaded object not found".to_owned()).into());
    }

    state.store.mark_attachment_available(attachment.id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Serialize)]
pub struct DownloadUrlResponse {
    download_url: String,
    mime_type: String,
}

pub async fn download_url(
    State(state): State<AppState>,
    Path(attachment_id): Path<i64>,
    BearerClaims(claims): BearerClaims,
) -> Result<Json<DownloadUrlResponse>, ApiErrorResponse> {
    let attachment = state
        .store
        .get_attachment(attachment_id, &claims.room_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("attachment not found".to_owned()))?;
    if !attachment.available {
        return Err(ApiError::NotFound("attachment not found".to_owned()).into());
    }
    let download_url = state.blob.presigned_get(&attachment.object_key).await?;
    Ok(Json(DownloadUrlResponse {
        download_url,
        mime_type: attachment.mime_type,
    }))
}
