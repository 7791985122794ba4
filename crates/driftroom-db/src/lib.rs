//! The `Store` abstraction over rooms, participants, messages and
//! attachments, plus two implementations: [`mem::MemStore`] for tests and
//! [`pg::PgStore`] for production.

mod mem;
mod pg;

pub use mem::MemStore;
pub use pg::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftroom_core::{ApiError, Attachment, Message, MessageType, Participant, Role, Room};
use uuid::Uuid;

/// Durable storage for every entity in the data model (§3/§4.B).
///
/// Implementations must make each method transactional: a caller never
/// observes a partially-applied mutation. `insert_participant_if_room_not_full`
/// is the one operation the lifecycle manager relies on to close the
/// admission race left open by its own conservative dual-count check (§5's
/// "consistency gap").
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Creates a room in `pending` status. If `preferred_id` is `None`,
    /// generates candidate 4-character ids and retries on collision
    /// (bounded; fails with [`ApiError::CapacityExhausted`] if exhausted).
    async fn create_room(&self, preferred_id: Option<String>) -> Result<Room, ApiError>;

    /// Fetches a room by id.
    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, ApiError>;

    /// Transitions a `pending` room to `active`, persists the wrapped room
    /// key, and inserts the host participant, all as one unit. Returns
    /// `None` if the room was not `pending` (P7: a second accept is a
    /// no-op and mints no second key).
    #[allow(clippy::too_many_arguments)]
    async fn accept_room(
        &self,
        room_id: &str,
        now: DateTime<Utc>,
        wrapped_room_key: Vec<u8>,
        host_device_id: Uuid,
        host_ip: Option<String>,
    ) -> Result<Option<(Room, Participant)>, ApiError>;

    /// Conditional `active -> locked` transition.
    async fn lock_room(&self, room_id: &str) -> Result<bool, ApiError>;

    /// Conditional `locked -> active` transition.
    async fn unlock_room(&self, room_id: &str) -> Result<bool, ApiError>;

    /// Conditional `{active,locked} -> closed` transition.
    async fn close_room(&self, room_id: &str, now: DateTime<Utc>) -> Result<bool, ApiError>;

    /// Conditional `closed -> archived` transition, recording the archive
    /// object key.
    async fn archive_room(&self, room_id: &str, archive_key: &str) -> Result<bool, ApiError>;

    /// Ids of rooms in `{active,locked}` whose `expires_at < now`.
    async fn get_expired_rooms(&self, now: DateTime<Utc>) -> Result<Vec<String>, ApiError>;

    /// The wrapped (still-sealed) room key, if one has been persisted.
    async fn get_wrapped_room_key(&self, room_id: &str) -> Result<Option<Vec<u8>>, ApiError>;

    /// Fetches a participant by row id.
    async fn get_participant(&self, participant_id: i64) -> Result<Option<Participant>, ApiError>;

    /// Fetches a participant by `(room_id, device_id)` (I6).
    async fn get_participant_by_device(
        &self,
        room_id: &str,
        device_id: Uuid,
    ) -> Result<Option<Participant>, ApiError>;

    /// Number of participants currently persisted for a room.
    async fn count_participants(&self, room_id: &str) -> Result<u32, ApiError>;

    /// All participants in a room, ordered by `joined_at`.
    async fn get_room_participants(&self, room_id: &str) -> Result<Vec<Participant>, ApiError>;

    /// Sets a participant's display name.
    async fn set_display_name(
        &self,
        participant_id: i64,
        display_name: &str,
    ) -> Result<bool, ApiError>;

    /// Validates that `device_id` is the device bound to `participant_id`
    /// within `room_id`.
    async fn validate_device_access(
        &self,
        room_id: &str,
        participant_id: i64,
        device_id: Uuid,
    ) -> Result<bool, ApiError>;

    /// Removes one participant row (called on socket disconnect, per the
    /// Open Question resolution in `DESIGN.md`).
    async fn remove_participant(&self, participant_id: i64) -> Result<bool, ApiError>;

    /// Deletes every participant of `room_id` not in `keep_ids`. An empty
    /// `keep_ids` removes all participants.
    async fn cleanup_inactive_participants(
        &self,
        room_id: &str,
        keep_ids: &[i64],
    ) -> Result<u64, ApiError>;

    /// Inserts a participant only if the room's persisted count is still
    /// below 2, atomically with the count check. This is the
    /// database-level predicate §5 requires to actually close the
    /// admission race; the lifecycle manager's own dual-count check is
    /// defense in depth on top of this, not a substitute for it.
    async fn insert_participant_if_room_not_full(
        &self,
        room_id: &str,
        role: Role,
        device_id: Uuid,
        ip_address: Option<String>,
    ) -> Result<Option<Participant>, ApiError>;

    /// Appends one message.
    #[allow(clippy::too_many_arguments)]
    async fn create_message(
        &self,
        room_id: &str,
        participant_id: i64,
        body_ct: Vec<u8>,
        nonce: Vec<u8>,
        tag: Vec<u8>,
        msg_type: MessageType,
        ip_address: Option<String>,
    ) -> Result<Message, ApiError>;

    /// Messages for a room in transcript order, most recent `limit` only.
    async fn get_room_messages(&self, room_id: &str, limit: i64) -> Result<Vec<Message>, ApiError>;

    /// Reserves an attachment record (`available = false`).
    async fn create_attachment(
        &self,
        room_id: &str,
        object_key: &str,
        mime_type: &str,
        size_bytes: i64,
    ) -> Result<Attachment, ApiError>;

    /// Fetches an attachment scoped to a room.
    async fn get_attachment(
        &self,
        attachment_id: i64,
        room_id: &str,
    ) -> Result<Option<Attachment>, ApiError>;

    /// Flips `available` to `true`. Returns `false` if already available or
    /// the attachment does not exist.
    async fn mark_attachment_available(&self, attachment_id: i64) -> Result<bool, ApiError>;

    /// Links an available attachment to the message it was sent with.
    async fn link_attachment_to_message(
        &self,
        attachment_id: i64,
        room_id: &str,
        message_id: i64,
    ) -> Result<(), ApiError>;
}
