use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of payload a [`Message`] carries. The server never inspects the
/// plaintext either way; this only selects presentation and whether an
/// attachment may be linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Plain encrypted text.
    Text,
    /// An encrypted caption accompanying a linked [`crate::Attachment`].
    Image,
}

/// An append-only encrypted message. Insertion order is transcript order;
/// `created_at` ties are broken by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Row id, also the tie-breaker for `created_at` ordering.
    pub id: i64,
    /// The room this message belongs to.
    pub room_id: String,
    /// Sender's participant id.
    pub participant_id: i64,
    /// Server-assigned timestamp.
    pub created_at: DateTime<Utc>,
    /// AEAD ciphertext, excluding the tag (`body_ct = seal[..-16]`).
    pub body_ct: Vec<u8>,
    /// 96-bit AEAD nonce.
    pub nonce: Vec<u8>,
    /// 128-bit AEAD tag (`tag = seal[-16:]`).
    pub tag: Vec<u8>,
    /// Text or image.
    pub msg_type: MessageType,
    /// Source IP, retained for abuse triage.
    pub ip_address: Option<String>,
}
