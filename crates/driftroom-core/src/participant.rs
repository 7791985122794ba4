use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of the conversation a participant occupies.
///
/// Assigned by arrival order: the first participant in a room is always
/// `Host`, the second always `Guest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The participant who created and accepted the room.
    Host,
    /// The participant who joined second.
    Guest,
}

impl Role {
    /// Assigns a role from the number of participants already persisted in
    /// the room, per §4.E: `host` if none exist yet, else `guest`.
    #[must_use]
    pub const fn from_persisted_count(persisted_count: u32) -> Self {
        if persisted_count == 0 {
            Self::Host
        } else {
            Self::Guest
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Host => "host",
            Self::Guest => "guest",
        })
    }
}

/// One end of a conversation, pinned to a device id (I6: unique per room).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Row id, assigned by the persistence layer.
    pub id: i64,
    /// The room this participant belongs to.
    pub room_id: String,
    /// Host or guest.
    pub role: Role,
    /// Opaque per-browser device identifier; unique within `room_id`.
    pub device_id: Uuid,
    /// Client-chosen display name, unset until `POST /rooms/{id}/name` or a
    /// socket name announcement.
    pub display_name: Option<String>,
    /// Source IP, retained for abuse triage; never returned over the public
    /// API (`GET /rooms/{id}` strips it).
    pub ip_address: Option<String>,
    /// Row creation time.
    pub joined_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_participant_is_host() {
        assert_eq!(Role::from_persisted_count(0), Role::Host);
    }

    #[test]
    fn second_participant_is_guest() {
        assert_eq!(Role::from_persisted_count(1), Role::Guest);
    }
}
