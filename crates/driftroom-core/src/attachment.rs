use serde::{Deserialize, Serialize};

/// A user-uploaded file in blob storage, tracked so the server can issue
/// presigned URLs without ever touching the bytes itself.
///
/// Transitions `reserved -> available` when the client confirms the upload
/// landed (`POST /uploads/complete`), and is linked to a [`crate::Message`]
/// when an `image` frame references it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Row id.
    pub id: i64,
    /// The room this attachment belongs to.
    pub room_id: String,
    /// Blob store object key: `{room_id}/{attachment_uuid}_{filename}`.
    pub object_key: String,
    /// One of `image/{jpeg,png,webp,gif}`.
    pub mime_type: String,
    /// Declared size in bytes, checked against the 10 MiB cap at init time.
    pub size_bytes: i64,
    /// Whether the client has confirmed the upload completed.
    pub available: bool,
    /// The message this attachment was linked to, if any.
    pub message_id: Option<i64>,
}

/// MIME types accepted by `POST /uploads/init`.
pub const ALLOWED_MIME_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Maximum accepted upload size: 10 MiB.
pub const MAX_UPLOAD_BYTES: i64 = 10 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_mime_types_match_spec() {
        assert!(ALLOWED_MIME_TYPES.contains(&"image/jpeg"));
        assert!(!ALLOWED_MIME_TYPES.contains(&"image/bmp"));
    }
}
