//! Room lifecycle manager: create / accept / join / close / archive (§4.E).
//!
//! This module owns the conservative `n = max(live_count, persisted_count)`
//! admission check as defense in depth; the actual race is closed one layer
//! down, by [`driftroom_db::Store::insert_participant_if_room_not_full`]'s
//! row-locked conditional insert.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use driftroom_blob::BlobStore;
use driftroom_core::{ApiError, Message, MessageType, Participant, Role, Room, RoomStatus};
use driftroom_crypto::{self, MasterKey, RoomKey, DECRYPTION_FAILED_SENTINEL};
use driftroom_db::Store;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::registry::Registry;

/// Rejections [`join_room`] distinguishes beyond [`ApiError`]'s taxonomy, so
/// the HTTP layer can reproduce §6's exact status codes (`404`, `410`,
/// `400`, `409`) from one call site.
#[derive(Debug, Error)]
pub enum JoinError {
    /// No room with this id.
    #[error("room not found")]
    NotFound,
    /// `expires_at < now`.
    #[error("room expired")]
    Expired,
    /// Status is not `{active, locked}`.
    #[error("room not joinable in its current status")]
    NotJoinable,
    /// Already at two participants.
    #[error("room is full")]
    Full,
    /// Anything else, passed through.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// The room's maximum lifetime after acceptance.
const ROOM_TTL: ChronoDuration = ChronoDuration::hours(24);

/// Outcome of [`join_room`]: either an existing participant reconnecting, or
/// a freshly seated one.
pub enum JoinOutcome {
    /// A participant row already existed for this `(room_id, device_id)`.
    Reconnect {
        /// The existing participant.
        participant: Participant,
        /// The room's unwrapped key.
        room_key: RoomKey,
    },
    /// A new participant row was created.
    Fresh {
        /// The newly created participant.
        participant: Participant,
        /// The room's unwrapped key.
        room_key: RoomKey,
        /// Whether this join was the second and locked the room.
        locked: bool,
    },
}

// `RoomKey` deliberately doesn't derive `Debug` to avoid printing key
// material, so this impl is written by hand and redacts it instead of
// deriving (which would require `RoomKey: Debug`).
impl std::fmt::Debug for JoinOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reconnect { participant, .. } => f
                .debug_struct("Reconnect")
                .field("participant", participant)
                .finish_non_exhaustive(),
            Self::Fresh {
                participant, locked, ..
            } => f
                .debug_struct("Fresh")
                .field("participant", participant)
                .field("locked", locked)
                .finish_non_exhaustive(),
        }
    }
}

impl JoinOutcome {
    /// The participant regardless of which path was taken.
    #[must_use]
    pub const fn participant(&self) -> &Participant {
        match self {
            Self::Reconnect { participant, .. } | Self::Fresh { participant, .. } => participant,
        }
    }

    /// The room key regardless of which path was taken.
    #[must_use]
    pub const fn room_key(&self) -> &RoomKey {
        match self {
            Self::Reconnect { room_key, .. } | Self::Fresh { room_key, .. } => room_key,
        }
    }
}

/// Creates a room in `pending` status (§4.E Create).
///
/// # Errors
///
/// Propagates [`ApiError::CapacityExhausted`] if the id space is exhausted,
/// or [`ApiError::StorageFailure`] on a persistence failure.
pub async fn create_room(store: &dyn Store, preferred_id: Option<String>) -> Result<Room, ApiError> {
    store.create_room(preferred_id).await
}

/// Accepts a `pending` room (§4.E Accept): mints a room key, wraps it,
/// persists the wrapped key and the host participant atomically, and
/// returns the plaintext key to the caller. A second accept on an
/// already-active room is a no-op (P7): returns `Ok(None)`.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the room does not exist, or propagates
/// storage/crypto failures.
pub async fn accept_room(
    store: &dyn Store,
    master_key: &MasterKey,
    room_id: &str,
    host_device_id: Uuid,
    host_ip: Option<String>,
) -> Result<Option<(Room, Participant, RoomKey)>, ApiError> {
    let room = store
        .get_room(room_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("room {room_id} not found")))?;
    if !room.status.can_accept() {
        return Ok(None);
    }

    let room_key = RoomKey::generate();
    let wrapped = driftroom_crypto::wrap(master_key, &room_key)?;
    let now = Utc::now();

    let accepted = store
        .accept_room(room_id, now, wrapped, host_device_id, host_ip)
        .await?;
    Ok(accepted.map(|(room, participant)| (room, participant, room_key)))
}

/// Joins a room (§4.E Join), following either the reconnect or fresh-join
/// path.
///
/// # Errors
///
/// See [`JoinError`] for the distinct rejection reasons and their intended
/// HTTP status codes.
pub async fn join_room(
    store: &dyn Store,
    registry: &Registry,
    master_key: &MasterKey,
    room_id: &str,
    device_id: Uuid,
    ip_address: Option<String>,
) -> Result<JoinOutcome, JoinError> {
    let now = Utc::now();
    let room = store.get_room(room_id).await?.ok_or(JoinError::NotFound)?;

    if room.is_expired_at(now) {
        return Err(JoinError::Expired);
    }
    if !room.status.is_joinable() {
        return Err(JoinError::NotJoinable);
    }

    let wrapped_key = store
        .get_wrapped_room_key(room_id)
        .await?
        .ok_or(JoinError::NotJoinable)?;
    let room_key = driftroom_crypto::unwrap(master_key, &wrapped_key).map_err(ApiError::from)?;

    if let Some(existing) = store.get_participant_by_device(room_id, device_id).await? {
        return Ok(JoinOutcome::Reconnect {
            participant: existing,
            room_key,
        });
    }

    let live_count = registry.count(room_id);
    let persisted_count = store.count_participants(room_id).await?;
    let conservative_count = live_count.max(persisted_count as usize);
    if conservative_count >= 2 {
        return Err(JoinError::Full);
    }

    let role = Role::from_persisted_count(persisted_count);
    let participant = store
        .insert_participant_if_room_not_full(room_id, role, device_id, ip_address)
        .await?
        .ok_or(JoinError::Full)?;

    let new_count = store.count_participants(room_id).await?;
    let locked = if new_count >= 2 {
        store.lock_room(room_id).await?
    } else {
        false
    };

    Ok(JoinOutcome::Fresh {
        participant,
        room_key,
        locked,
    })
}

/// Handles a socket disconnect (§4.F Disconnect): removes the participant
/// row, reconciles the persisted set to the registry's live view, and
/// unlocks the room if it drops below two live participants while locked.
///
/// # Errors
///
/// Propagates storage failures. A disconnect for an already-vanished
/// participant is not an error (idempotent per §5's cancellation model).
pub async fn handle_disconnect(
    store: &dyn Store,
    registry: &Registry,
    room_id: &str,
    participant_id: i64,
) -> Result<bool, ApiError> {
    store.remove_participant(participant_id).await?;

    // The caller removes the departing session from the registry before
    // calling this function, so its remaining keys are exactly the ids
    // `cleanup_inactive_participants` should keep.
    let live_participant_ids = registry.live_participant_ids(room_id);
    store
        .cleanup_inactive_participants(room_id, &live_participant_ids)
        .await?;

    let remaining = registry.count(room_id);
    if remaining < 2 {
        let room = store.get_room(room_id).await?;
        if room.is_some_and(|r| r.status == RoomStatus::Locked) {
            return store.unlock_room(room_id).await;
        }
    }
    Ok(false)
}

/// Closes a room (§4.E Close): conditional `{active,locked} -> closed`.
///
/// # Errors
///
/// Propagates storage failures.
pub async fn close_room(store: &dyn Store, room_id: &str) -> Result<bool, ApiError> {
    store.close_room(room_id, Utc::now()).await
}

#[derive(Debug, Serialize)]
struct ArchiveParticipant {
    id: i64,
    role: Role,
    display_name: Option<String>,
    joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ArchiveMessage {
    id: i64,
    participant_id: i64,
    created_at: DateTime<Utc>,
    msg_type: MessageType,
    plaintext: String,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ArchiveRoom {
    room_id: String,
    created_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct ArchiveDoc {
    room: ArchiveRoom,
    participants: Vec<ArchiveParticipant>,
    messages: Vec<ArchiveMessage>,
    archived_at: DateTime<Utc>,
    message_count: usize,
    participant_count: usize,
}

fn decrypt_for_archive(room_key: &RoomKey, message: &Message) -> (String, Option<String>) {
    match driftroom_crypto::decrypt_message(room_key, &message.body_ct, &message.nonce, &message.tag) {
        Ok(plaintext) => (plaintext, None),
        Err(err) => (DECRYPTION_FAILED_SENTINEL.to_owned(), Some(err.to_string())),
    }
}

/// Builds the archive JSON document for a closed room (§4.E Archive,
/// §6 "Archive object"), decrypting every message with a sentinel on
/// per-message failure so one tampered row never aborts the whole archive.
///
/// # Errors
///
/// Propagates storage failures and [`ApiError::CryptoFailure`] only if the
/// room key itself fails to unwrap (a whole-room failure, not a
/// per-message one).
pub async fn build_archive_doc(
    store: &dyn Store,
    master_key: &MasterKey,
    room: &Room,
) -> Result<Vec<u8>, ApiError> {
    let wrapped_key = store
        .get_wrapped_room_key(&room.room_id)
        .await?
        .ok_or_else(|| ApiError::StateConflict(format!("room {} has no room key", room.room_id)))?;
    let room_key = driftroom_crypto::unwrap(master_key, &wrapped_key)?;

    let participants = store.get_room_participants(&room.room_id).await?;
    let messages = store.get_room_messages(&room.room_id, i64::MAX).await?;

    let archive_participants: Vec<ArchiveParticipant> = participants
        .iter()
        .map(|p| ArchiveParticipant {
            id: p.id,
            role: p.role,
            display_name: p.display_name.clone(),
            joined_at: p.joined_at,
        })
        .collect();

    let archive_messages: Vec<ArchiveMessage> = messages
        .iter()
        .map(|m| {
            let (plaintext, error) = decrypt_for_archive(&room_key, m);
            ArchiveMessage {
                id: m.id,
                participant_id: m.participant_id,
                created_at: m.created_at,
                msg_type: m.msg_type,
                plaintext,
                error,
            }
        })
        .collect();

    let doc = ArchiveDoc {
        room: ArchiveRoom {
            room_id: room.room_id.clone(),
            created_at: room.created_at,
            accepted_at: room.accepted_at,
            closed_at: room.closed_at,
        },
        message_count: archive_messages.len(),
        participant_count: archive_participants.len(),
        participants: archive_participants,
        messages: archive_messages,
        archived_at: Utc::now(),
    };

    serde_json::to_vec(&doc).map_err(|err| ApiError::StorageFailure(format!("archive encode: {err}")))
}

/// The object key an archive of `room_id` at `at` is stored under
/// (§6 "Archive object key").
#[must_use]
pub fn archive_object_key(room_id: &str, at: DateTime<Utc>) -> String {
    format!("archives/{room_id}/{}.json", at.format("%Y%m%d_%H%M%S"))
}

/// Runs the full archive pipeline for one `closed` room (§4.E Archive): build
/// the document, upload it, then flip status to `archived`. If either the
/// upload or the status flip fails, the room is left `closed` for the next
/// archival sweep to retry, per spec.
///
/// # Errors
///
/// Propagates storage/blob failures; the room remains `closed` on failure.
pub async fn archive_room(
    store: &dyn Store,
    blob: &dyn BlobStore,
    master_key: &MasterKey,
    room: &Room,
) -> Result<bool, ApiError> {
    let doc_bytes = build_archive_doc(store, master_key, room).await?;
    let key = archive_object_key(&room.room_id, Utc::now());
    blob.put_archive(&key, doc_bytes).await?;
    store.archive_room(&room.room_id, &key).await
}

/// `expires_at` for a room accepted at `accepted_at` (§4.E Accept: `now +
/// 24h`).
#[must_use]
pub fn compute_expiry(accepted_at: DateTime<Utc>) -> DateTime<Utc> {
    accepted_at + ROOM_TTL
}
