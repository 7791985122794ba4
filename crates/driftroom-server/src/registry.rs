//! Process-local connection registry: which participant is live on which
//! socket, right now. Never durable — a restart drops every connection and
//! relies on clients reconnecting, matching `connection_manager.py`'s
//! in-process dictionaries.

use std::collections::HashMap;
use std::sync::Mutex;

use driftroom_core::Role;

/// One live socket's identity, looked up by session id on disconnect.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Room the socket is attached to.
    pub room_id: String,
    /// The participant row this socket speaks for.
    pub participant_id: i64,
    /// Host or guest, cached so disconnect handling doesn't need a DB hit.
    pub role: Role,
}

#[derive(Debug, Default)]
struct Inner {
    by_room: HashMap<String, HashMap<i64, String>>,
    by_session: HashMap<String, ConnectionInfo>,
}

/// In-memory map of live WebSocket sessions, guarded by a single mutex.
///
/// Mirrors the shape of `chitty/services/connection_manager.py`: a
/// room-to-participant-to-session index for broadcast fan-out, and a
/// session-to-info index for O(1) cleanup on disconnect.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session, replacing any prior session the same
    /// participant held (a participant connecting twice keeps only the
    /// newest socket addressable).
    pub fn add(&self, room_id: &str, participant_id: i64, role: Role, session_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner
            .by_room
            .entry(room_id.to_owned())
            .or_default()
            .insert(participant_id, session_id.to_owned());
        inner.by_session.insert(
            session_id.to_owned(),
            ConnectionInfo {
                room_id: room_id.to_owned(),
                participant_id,
                role,
            },
        );
    }

    /// Removes a session, returning the connection it belonged to if it was
    /// still registered (a caller may race another remove for the same
    /// session after a forced disconnect).
    pub fn remove(&self, session_id: &str) -> Option<ConnectionInfo> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let info = inner.by_session.remove(session_id)?;
        if let Some(participants) = inner.by_room.get_mut(&info.room_id) {
            participants.retain(|_, sid| sid != session_id);
            if participants.is_empty() {
                inner.by_room.remove(&info.room_id);
            }
        }
        Some(info)
    }

    /// Number of live connections in a room.
    #[must_use]
    pub fn count(&self, room_id: &str) -> usize {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.by_room.get(room_id).map_or(0, HashMap::len)
    }

    /// Whether a specific participant currently has a live socket.
    #[must_use]
    pub fn is_connected(&self, room_id: &str, participant_id: i64) -> bool {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner
            .by_room
            .get(room_id)
            .is_some_and(|participants| participants.contains_key(&participant_id))
    }

    /// Participant ids with a live connection in a room, used to reconcile
    /// persistence after a disconnect.
    #[must_use]
    pub fn live_participant_ids(&self, room_id: &str) -> Vec<i64> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner
            .by_room
            .get(room_id)
            .map(|participants| participants.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Session ids of every live connection in a room, for broadcast.
    #[must_use]
    pub fn room_sessions(&self, room_id: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner
            .by_room
            .get(room_id)
            .map(|participants| participants.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The session id of a specific participant's socket, if connected.
    #[must_use]
    pub fn session_for(&self, room_id: &str, participant_id: i64) -> Option<String> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner
            .by_room
            .get(room_id)
            .and_then(|participants| participants.get(&participant_id))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_count_reflects_connection() {
        let registry = Registry::new();
        registry.add("Ab12", 1, Role::Host, "sess-1");
        assert_eq!(registry.count("Ab12"), 1);
        assert!(registry.is_connected("Ab12", 1));
        assert!(!registry.is_connected("Ab12", 2));
    }

    #[test]
    fn remove_clears_both_indices() {
        let registry = Registry::new();
        registry.add("Ab12", 1, Role::Host, "sess-1");
        let info = registry.remove("sess-1").expect("was registered");
        assert_eq!(info.participant_id, 1);
        assert_eq!(registry.count("Ab12"), 0);
    }

    #[test]
    fn second_connection_for_same_participant_replaces_session() {
        let registry = Registry::new();
        registry.add("Ab12", 1, Role::Host, "sess-1");
        registry.add("Ab12", 1, Role::Host, "sess-2");
        assert_eq!(registry.count("Ab12"), 1);
        assert_eq!(registry.session_for("Ab12", 1), Some("sess-2".to_owned()));
    }

    #[test]
    fn remove_unknown_session_is_noop() {
        let registry = Registry::new();
        assert!(registry.remove("ghost").is_none());
    }
}
