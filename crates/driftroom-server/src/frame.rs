//! Explicit tagged-variant WebSocket frame schema (§4.F, §9 "Dynamic
//! payloads"). Inbound frames that fail to deserialize against this schema
//! are dropped silently — the socket never echoes error details.

use chrono::{DateTime, Utc};
use driftroom_core::{MessageType, Role};
use serde::{Deserialize, Serialize};

/// A frame sent by the client over the socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// A new chat message, already encrypted client-side.
    MessageSend {
        /// Base64 AEAD ciphertext.
        ciphertext: String,
        /// Base64 96-bit nonce.
        nonce: String,
        /// Base64 128-bit tag.
        tag: String,
        /// Text or image.
        msg_type: MessageType,
        /// An attachment row to link to this message, if it carries one.
        attachment_id: Option<i64>,
    },
    /// Either participant may destroy the room outright.
    DestroyRoom,
    /// Broadcasts a chosen display name to the peer.
    AnnounceParticipantName {
        /// The chosen name.
        display_name: String,
        /// The announcer's role, echoed for convenience.
        role: Role,
    },
    /// One participant accepting or rejecting the other (identity check).
    VerifyParticipant {
        /// The participant being judged.
        target_participant_id: i64,
        /// Whether they were accepted.
        accepted: bool,
        /// The verifier's chosen display name.
        verifier_name: String,
    },
    /// Liveness probe.
    Ping,
    /// Idempotent join acknowledgement request.
    JoinRoom,
}

/// A frame emitted by the server, to one participant or broadcast to a
/// room's whole group.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// A participant joined the broadcast group.
    ParticipantConnected {
        /// The newly connected participant.
        participant_id: i64,
        /// Host or guest.
        role: Role,
        /// Their display name, if already chosen.
        display_name: Option<String>,
    },
    /// Present connectivity snapshot, sent after any join or disconnect.
    ConnectionStatusUpdate {
        /// Participants with a live socket right now.
        connected_participants: usize,
        /// Participants persisted for the room.
        total_participants: usize,
        /// Whether both sides are present.
        is_secure: bool,
        /// Per-participant connectivity detail.
        participants: Vec<ParticipantStatus>,
    },
    /// Sent to a newcomer when the room is already at capacity.
    RoomLocked,
    /// Sent to a newcomer so the client can render a countdown.
    TimerUpdate {
        /// Seconds remaining until `expires_at`.
        time_left_seconds: i64,
    },
    /// A persisted chat message, echoed to the whole group.
    Message {
        /// Row id, assigned on persistence.
        message_id: i64,
        /// Sender's participant id.
        participant_id: i64,
        /// Sender's display name, if chosen.
        display_name: Option<String>,
        /// Sender's role.
        role: Role,
        /// Server-assigned timestamp.
        created_at: DateTime<Utc>,
        /// Base64 ciphertext, echoed unchanged.
        ciphertext: String,
        /// Base64 nonce, echoed unchanged.
        nonce: String,
        /// Base64 tag, echoed unchanged.
        tag: String,
        /// Text or image.
        msg_type: MessageType,
        /// The linked attachment, if any.
        attachment_id: Option<i64>,
    },
    /// The room has been sealed; no further frames will be accepted.
    RoomClosed {
        /// Why the room closed.
        reason: String,
    },
    /// A display name chosen by the peer.
    ParticipantNameAnnounced {
        /// Whose name this is.
        participant_id: Option<i64>,
        /// The chosen name.
        display_name: String,
        /// Their role.
        role: Role,
    },
    /// A participant passed the other side's identity check.
    ParticipantVerified {
        /// The accepted participant.
        target_participant_id: i64,
        /// The name the verifier chose for them.
        verifier_name: String,
    },
    /// A participant failed the other side's identity check.
    ParticipantRejected {
        /// The rejected participant.
        target_participant_id: i64,
    },
    /// A participant's socket disconnected.
    ParticipantDisconnected {
        /// The departed participant.
        participant_id: i64,
    },
    /// Reply to `ping`.
    Pong {
        /// Echoed client clock, milliseconds since epoch.
        timestamp_ms: i64,
    },
    /// Reply to `join_room`.
    JoinedRoom {
        /// The room the sender is now confirmed in.
        room_id: String,
    },
}

/// One participant's connectivity detail inside `connection_status_update`.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantStatus {
    /// Row id.
    pub participant_id: i64,
    /// Host or guest.
    pub role: Role,
    /// Chosen display name, if any.
    pub display_name: Option<String>,
    /// Whether this participant currently has a live socket.
    pub is_connected: bool,
}
