use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a [`Room`].
///
/// Transitions:
///
/// ```text
/// pending --accept--> active --(2nd join)--> locked
///                        ^  \_____________       |
///                        |                \      |
///                   (join leaves to 1)      \     |
///                        |                    v    v
///                        +---- unlock ---- close <- expire/destroy/reject
///                                             |
///                                             +-- archive --> archived
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Created, awaiting the host's accept.
    Pending,
    /// Accepted, fewer than 2 live-or-persisted participants.
    Active,
    /// Accepted, exactly 2 participants; admission is closed.
    Locked,
    /// Sealed; awaiting archival.
    Closed,
    /// Transcript offloaded to blob storage; terminal.
    Archived,
}

impl RoomStatus {
    /// Whether `accept_room` may act on a room in this status.
    #[must_use]
    pub const fn can_accept(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Whether a room in this status is joinable at all (join still has its
    /// own capacity check on top of this).
    #[must_use]
    pub const fn is_joinable(self) -> bool {
        matches!(self, Self::Active | Self::Locked)
    }

    /// Whether `lock_room` may act on a room in this status.
    #[must_use]
    pub const fn can_lock(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether `unlock_room` may act on a room in this status.
    #[must_use]
    pub const fn can_unlock(self) -> bool {
        matches!(self, Self::Locked)
    }

    /// Whether `close_room` may act on a room in this status.
    #[must_use]
    pub const fn can_close(self) -> bool {
        matches!(self, Self::Active | Self::Locked)
    }

    /// Whether `archive_room` may act on a room in this status.
    #[must_use]
    pub const fn can_archive(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Locked => "locked",
            Self::Closed => "closed",
            Self::Archived => "archived",
        };
        f.write_str(s)
    }
}

/// A two-party ephemeral conversation, identified by a 4-character code
/// drawn from `[A-Za-z0-9]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    /// The 4-character room code.
    pub room_id: String,
    /// Current lifecycle status.
    pub status: RoomStatus,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Set when the host accepts.
    pub accepted_at: Option<DateTime<Utc>>,
    /// `accepted_at + 24h`, set on accept.
    pub expires_at: Option<DateTime<Utc>>,
    /// Set on close.
    pub closed_at: Option<DateTime<Utc>>,
    /// Object key of the archive, set iff `status == Archived` (I4).
    pub archive_key: Option<String>,
}

impl Room {
    /// I3: `closed_at >= accepted_at >= created_at` whenever both are set.
    #[must_use]
    pub fn respects_timestamp_ordering(&self) -> bool {
        if let Some(accepted) = self.accepted_at {
            if accepted < self.created_at {
                return false;
            }
        }
        if let (Some(closed), Some(accepted)) = (self.closed_at, self.accepted_at) {
            if closed < accepted {
                return false;
            }
        }
        true
    }

    /// I4: `archive_key` is set iff `status == Archived`.
    #[must_use]
    pub fn archive_key_consistent(&self) -> bool {
        self.archive_key.is_some() == (self.status == RoomStatus::Archived)
    }

    /// Whether `now` is past this room's expiry, if one is set.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_room() -> Room {
        Room {
            room_id: "Ab12".to_owned(),
            status: RoomStatus::Pending,
            created_at: Utc::now(),
            accepted_at: None,
            expires_at: None,
            closed_at: None,
            archive_key: None,
        }
    }

    #[test]
    fn pending_allows_accept_only() {
        assert!(RoomStatus::Pending.can_accept());
        assert!(!RoomStatus::Pending.can_lock());
        assert!(!RoomStatus::Pending.can_close());
    }

    #[test]
    fn active_and_locked_are_joinable() {
        assert!(RoomStatus::Active.is_joinable());
        assert!(RoomStatus::Locked.is_joinable());
        assert!(!RoomStatus::Closed.is_joinable());
        assert!(!RoomStatus::Pending.is_joinable());
    }

    #[test]
    fn archive_key_invariant_holds_for_fresh_room() {
        let room = base_room();
        assert!(room.archive_key_consistent());
    }

    #[test]
    fn archive_key_invariant_detects_violation() {
        let mut room = base_room();
        room.archive_key = Some("archives/Ab12/x.json".to_owned());
        assert!(!room.archive_key_consistent());
    }

    #[test]
    fn expiry_check_respects_missing_deadline() {
        let room = base_room();
        assert!(!room.is_expired_at(Utc::now()));
    }
}
