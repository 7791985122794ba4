//! An in-process `Store` used by `driftroom-harness` and unit tests so the
//! full lifecycle manager can be exercised without a live Postgres
//! instance. Mirrors the teacher workspace's `MemoryStorage` pattern:
//! `Arc<Mutex<..>>` state, `clone()` shares it, and every method is
//! synchronous work wrapped in an `async fn` to match the `Store` trait's
//! shape.
#![allow(clippy::unused_async)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftroom_core::{ApiError, Attachment, Message, MessageType, Participant, Role, Room, RoomStatus};
use rand::Rng;
use uuid::Uuid;

use crate::Store;

const ROOM_ID_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ROOM_ID_LEN: usize = 4;
const CREATE_ROOM_MAX_ATTEMPTS: usize = 10;

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, Room>,
    wrapped_room_keys: HashMap<String, Vec<u8>>,
    participants: HashMap<i64, Participant>,
    next_participant_id: i64,
    messages: Vec<Message>,
    next_message_id: i64,
    attachments: HashMap<i64, Attachment>,
    next_attachment_id: i64,
}

/// An in-memory, single-process [`Store`]. Clones share the same
/// underlying state.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemStore {
    /// Builds an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn generate_room_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_ID_LEN)
        .map(|_| ROOM_ID_ALPHABET[rng.gen_range(0..ROOM_ID_ALPHABET.len())] as char)
        .collect()
}

#[async_trait]
impl Store for MemStore {
    async fn create_room(&self, preferred_id: Option<String>) -> Result<Room, ApiError> {
        let mut inner = self.lock();
        if let Some(id) = preferred_id {
            if inner.rooms.contains_key(&id) {
                return Err(ApiError::CapacityExhausted(format!(
                    "room id {id} already exists"
                )));
            }
            let room = Room {
                room_id: id.clone(),
                status: RoomStatus::Pending,
                created_at: Utc::now(),
                accepted_at: None,
                expires_at: None,
                closed_at: None,
                archive_key: None,
            };
            inner.rooms.insert(id, room.clone());
            return Ok(room);
        }

        for _ in 0..CREATE_ROOM_MAX_ATTEMPTS {
            let id = generate_room_id();
            if inner.rooms.contains_key(&id) {
                continue;
            }
            let room = Room {
                room_id: id.clone(),
                status: RoomStatus::Pending,
                created_at: Utc::now(),
                accepted_at: None,
                expires_at: None,
                closed_at: None,
                archive_key: None,
            };
            inner.rooms.insert(id, room.clone());
            return Ok(room);
        }
        Err(ApiError::CapacityExhausted(
            "failed to generate a unique room id after multiple attempts".to_owned(),
        ))
    }

    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, ApiError> {
        Ok(self.lock().rooms.get(room_id).cloned())
    }

    async fn accept_room(
        &self,
        room_id: &str,
        now: DateTime<Utc>,
        wrapped_room_key: Vec<u8>,
        host_device_id: Uuid,
        host_ip: Option<String>,
    ) -> Result<Option<(Room, Participant)>, ApiError> {
        let mut inner = self.lock();
        let Some(room) = inner.rooms.get(room_id).cloned() else {
            return Ok(None);
        };
        if !room.status.can_accept() {
            return Ok(None);
        }

        let participant_id = inner.next_participant_id;
        inner.next_participant_id += 1;
        let participant = Participant {
            id: participant_id,
            room_id: room_id.to_owned(),
            role: Role::Host,
            device_id: host_device_id,
            display_name: None,
            ip_address: host_ip,
            joined_at: now,
        };

        let mut room = room;
        room.status = RoomStatus::Active;
        room.accepted_at = Some(now);
        room.expires_at = Some(now + chrono::Duration::hours(24));

        inner.rooms.insert(room_id.to_owned(), room.clone());
        inner
            .wrapped_room_keys
            .insert(room_id.to_owned(), wrapped_room_key);
        inner.participants.insert(participant_id, participant.clone());

        Ok(Some((room, participant)))
    }

    async fn lock_room(&self, room_id: &str) -> Result<bool, ApiError> {
        let mut inner = self.lock();
        match inner.rooms.get_mut(room_id) {
            Some(room) if room.status.can_lock() => {
                room.status = RoomStatus::Locked;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unlock_room(&self, room_id: &str) -> Result<bool, ApiError> {
        let mut inner = self.lock();
        match inner.rooms.get_mut(room_id) {
            Some(room) if room.status.can_unlock() => {
                room.status = RoomStatus::Active;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn close_room(&self, room_id: &str, now: DateTime<Utc>) -> Result<bool, ApiError> {
        let mut inner = self.lock();
        match inner.rooms.get_mut(room_id) {
            Some(room) if room.status.can_close() => {
                room.status = RoomStatus::Closed;
                room.closed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn archive_room(&self, room_id: &str, archive_key: &str) -> Result<bool, ApiError> {
        let mut inner = self.lock();
        match inner.rooms.get_mut(room_id) {
            Some(room) if room.status.can_archive() => {
                room.status = RoomStatus::Archived;
                room.archive_key = Some(archive_key.to_owned());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_expired_rooms(&self, now: DateTime<Utc>) -> Result<Vec<String>, ApiError> {
        let inner = self.lock();
        Ok(inner
            .rooms
            .values()
            .filter(|room| room.status.is_joinable() && room.is_expired_at(now))
            .map(|room| room.room_id.clone())
            .collect())
    }

    async fn get_wrapped_room_key(&self, room_id: &str) -> Result<Option<Vec<u8>>, ApiError> {
        Ok(self.lock().wrapped_room_keys.get(room_id).cloned())
    }

    async fn get_participant(&self, participant_id: i64) -> Result<Option<Participant>, ApiError> {
        Ok(self.lock().participants.get(&participant_id).cloned())
    }

    async fn get_participant_by_device(
        &self,
        room_id: &str,
        device_id: Uuid,
    ) -> Result<Option<Participant>, ApiError> {
        Ok(self
            .lock()
            .participants
            .values()
            .find(|p| p.room_id == room_id && p.device_id == device_id)
            .cloned())
    }

    async fn count_participants(&self, room_id: &str) -> Result<u32, ApiError> {
        Ok(self
            .lock()
            .participants
            .values()
            .filter(|p| p.room_id == room_id)
            .count() as u32)
    }

    async fn get_room_participants(&self, room_id: &str) -> Result<Vec<Participant>, ApiError> {
        let mut participants: Vec<Participant> = self
            .lock()
            .participants
            .values()
            .filter(|p| p.room_id == room_id)
            .cloned()
            .collect();
        participants.sort_by_key(|p| p.joined_at);
        Ok(participants)
    }

    async fn set_display_name(
        &self,
        participant_id: i64,
        display_name: &str,
    ) -> Result<bool, ApiError> {
        let mut inner = self.lock();
        match inner.participants.get_mut(&participant_id) {
            Some(participant) => {
                participant.display_name = Some(display_name.to_owned());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn validate_device_access(
        &self,
        room_id: &str,
        participant_id: i64,
        device_id: Uuid,
    ) -> Result<bool, ApiError> {
        let inner = self.lock();
        Ok(inner
            .participants
            .get(&participant_id)
            .is_some_and(|p| p.room_id == room_id && p.device_id == device_id))
    }

    async fn remove_participant(&self, participant_id: i64) -> Result<bool, ApiError> {
        Ok(self.lock().participants.remove(&participant_id).is_some())
    }

    async fn cleanup_inactive_participants(
        &self,
        room_id: &str,
        keep_ids: &[i64],
    ) -> Result<u64, ApiError> {
        let mut inner = self.lock();
        let to_remove: Vec<i64> = inner
            .participants
            .values()
            .filter(|p| p.room_id == room_id && !keep_ids.contains(&p.id))
            .map(|p| p.id)
            .collect();
        let removed = to_remove.len() as u64;
        for id in to_remove {
            inner.participants.remove(&id);
        }
        Ok(removed)
    }

    async fn insert_participant_if_room_not_full(
        &self,
        room_id: &str,
        role: Role,
        device_id: Uuid,
        ip_address: Option<String>,
    ) -> Result<Option<Participant>, ApiError> {
        let mut inner = self.lock();
        let current_count = inner
            .participants
            .values()
            .filter(|p| p.room_id == room_id)
            .count();
        if current_count >= 2 {
            return Ok(None);
        }
        let id = inner.next_participant_id;
        inner.next_participant_id += 1;
        let participant = Participant {
            id,
            room_id: room_id.to_owned(),
            role,
            device_id,
            display_name: None,
            ip_address,
            joined_at: Utc::now(),
        };
        inner.participants.insert(id, participant.clone());
        Ok(Some(participant))
    }

    async fn create_message(
        &self,
        room_id: &str,
        participant_id: i64,
        body_ct: Vec<u8>,
        nonce: Vec<u8>,
        tag: Vec<u8>,
        msg_type: MessageType,
        ip_address: Option<String>,
    ) -> Result<Message, ApiError> {
        let mut inner = self.lock();
        let id = inner.next_message_id;
        inner.next_message_id += 1;
        let message = Message {
            id,
            room_id: room_id.to_owned(),
            participant_id,
            created_at: Utc::now(),
            body_ct,
            nonce,
            tag,
            msg_type,
            ip_address,
        };
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn get_room_messages(&self, room_id: &str, limit: i64) -> Result<Vec<Message>, ApiError> {
        let inner = self.lock();
        let mut messages: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        messages.truncate(limit.max(0) as usize);
        Ok(messages)
    }

    async fn create_attachment(
        &self,
        room_id: &str,
        object_key: &str,
        mime_type: &str,
        size_bytes: i64,
    ) -> Result<Attachment, ApiError> {
        let mut inner = self.lock();
        let id = inner.next_attachment_id;
        inner.next_attachment_id += 1;
        let attachment = Attachment {
            id,
            room_id: room_id.to_owned(),
            object_key: object_key.to_owned(),
            mime_type: mime_type.to_owned(),
            size_bytes,
            available: false,
            message_id: None,
        };
        inner.attachments.insert(id, attachment.clone());
        Ok(attachment)
    }

    async fn get_attachment(
        &self,
        attachment_id: i64,
        room_id: &str,
    ) -> Result<Option<Attachment>, ApiError> {
        Ok(self
            .lock()
            .attachments
            .get(&attachment_id)
            .filter(|a| a.room_id == room_id)
            .cloned())
    }

    async fn mark_attachment_available(&self, attachment_id: i64) -> Result<bool, ApiError> {
        let mut inner = self.lock();
        match inner.attachments.get_mut(&attachment_id) {
            Some(attachment) if !attachment.available => {
                attachment.available = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn link_attachment_to_message(
        &self,
        attachment_id: i64,
        room_id: &str,
        message_id: i64,
    ) -> Result<(), ApiError> {
        let mut inner = self.lock();
        if let Some(attachment) = inner
            .attachments
            .get_mut(&attachment_id)
            .filter(|a| a.room_id == room_id && a.available)
        {
            attachment.message_id = Some(message_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_room_assigns_pending_status() {
        let store = MemStore::new();
        let room = store.create_room(None).await.expect("create");
        assert_eq!(room.status, RoomStatus::Pending);
        assert_eq!(room.room_id.len(), ROOM_ID_LEN);
    }

    #[tokio::test]
    async fn create_room_rejects_duplicate_preferred_id() {
        let store = MemStore::new();
        store
            .create_room(Some("Ab12".to_owned()))
            .await
            .expect("first create");
        let err = store.create_room(Some("Ab12".to_owned())).await.unwrap_err();
        assert!(matches!(err, ApiError::CapacityExhausted(_)));
    }

    #[tokio::test]
    async fn accept_room_is_noop_second_time() {
        let store = MemStore::new();
        let room = store.create_room(Some("Ab12".to_owned())).await.unwrap();
        let now = Utc::now();
        let device = Uuid::new_v4();
        let first = store
            .accept_room(&room.room_id, now, vec![1, 2, 3], device, None)
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store
            .accept_room(&room.room_id, now, vec![9, 9, 9], device, None)
            .await
            .unwrap();
        assert!(second.is_none());

        let stored_key = store.get_wrapped_room_key(&room.room_id).await.unwrap();
        assert_eq!(stored_key, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn insert_participant_rejects_third() {
        let store = MemStore::new();
        let room_id = "Ab12";
        store
            .insert_participant_if_room_not_full(room_id, Role::Host, Uuid::new_v4(), None)
            .await
            .unwrap();
        store
            .insert_participant_if_room_not_full(room_id, Role::Guest, Uuid::new_v4(), None)
            .await
            .unwrap();
        let third = store
            .insert_participant_if_room_not_full(room_id, Role::Guest, Uuid::new_v4(), None)
            .await
            .unwrap();
        assert!(third.is_none());
    }

    #[tokio::test]
    async fn cleanup_inactive_participants_removes_unlisted() {
        let store = MemStore::new();
        let room_id = "Ab12";
        let keep = store
            .insert_participant_if_room_not_full(room_id, Role::Host, Uuid::new_v4(), None)
            .await
            .unwrap()
            .unwrap();
        store
            .insert_participant_if_room_not_full(room_id, Role::Guest, Uuid::new_v4(), None)
            .await
            .unwrap();

        let removed = store
            .cleanup_inactive_participants(room_id, &[keep.id])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count_participants(room_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_room_messages_orders_by_created_at_then_id() {
        let store = MemStore::new();
        let room_id = "Ab12";
        for i in 0..3 {
            store
                .create_message(
                    room_id,
                    1,
                    vec![i],
                    vec![0; 12],
                    vec![0; 16],
                    MessageType::Text,
                    None,
                )
                .await
                .unwrap();
        }
        let messages = store.get_room_messages(room_id, 100).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert!(messages.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let store = MemStore::new();
        let clone = store.clone();
        let room = store.create_room(Some("Ab12".to_owned())).await.unwrap();
        let seen = clone.get_room(&room.room_id).await.unwrap();
        assert!(seen.is_some());
    }
}
