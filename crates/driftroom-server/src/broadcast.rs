//! Per-room fan-out for [`OutboundEvent`](crate::frame::OutboundEvent)s.
//!
//! One `tokio::sync::broadcast` channel per room, created lazily on first
//! subscribe and dropped once its last subscriber (and the registry's last
//! live session) goes away. This is the transport the HTTP `destroy` route
//! and the archival worker use to reach live sockets without holding a
//! handle to the broker's per-connection tasks.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// A broadcast payload, tagged with the originating session so a receiver
/// can skip re-delivering a frame to its own sender when the frame's
/// semantics call for `include_self = false` (§4.F
/// `participant_name_announced`).
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The session that triggered this publish, if any.
    pub origin_session_id: Option<String>,
    /// The serialized frame.
    pub payload: String,
}

/// Lazily-created per-room broadcast channels.
#[derive(Default)]
pub struct Broadcaster {
    channels: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
}

impl Broadcaster {
    /// Builds an empty broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a room's channel, creating it if this is the first
    /// subscriber.
    pub fn subscribe(&self, room_id: &str) -> broadcast::Receiver<Envelope> {
        let mut channels = self.channels.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        channels
            .entry(room_id.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publishes a pre-serialized frame to every live subscriber of a room.
    /// A room with no subscribers (or no channel at all) silently drops the
    /// send, matching "outbound frames after the socket dies are silently
    /// discarded" (§5).
    pub fn publish(&self, room_id: &str, payload: &str) {
        self.publish_excluding(room_id, payload, None);
    }

    /// Publishes a frame, tagging it so `origin_session_id` can skip
    /// forwarding it back to itself.
    pub fn publish_excluding(&self, room_id: &str, payload: &str, origin_session_id: Option<&str>) {
        let channels = self.channels.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(sender) = channels.get(room_id) {
            let _ = sender.send(Envelope {
                origin_session_id: origin_session_id.map(str::to_owned),
                payload: payload.to_owned(),
            });
        }
    }

    /// Drops a room's channel once it has no more live participants.
    pub fn retire(&self, room_id: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        channels.remove(room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_payload() {
        let broadcaster = Broadcaster::new();
        let mut rx = broadcaster.subscribe("Ab12");
        broadcaster.publish("Ab12", "{\"type\":\"ping\"}");
        let received = rx.recv().await.unwrap();
        assert_eq!(received.payload, "{\"type\":\"ping\"}");
        assert!(received.origin_session_id.is_none());
    }

    #[tokio::test]
    async fn publish_excluding_tags_the_origin() {
        let broadcaster = Broadcaster::new();
        let mut rx = broadcaster.subscribe("Ab12");
        broadcaster.publish_excluding("Ab12", "payload", Some("sess-1"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.origin_session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn publish_to_unknown_room_is_noop() {
        let broadcaster = Broadcaster::new();
        broadcaster.publish("ghost", "ignored");
    }
}
