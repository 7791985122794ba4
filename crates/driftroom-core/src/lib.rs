//! Domain model and error taxonomy shared by every `driftroom` crate.
//!
//! ```text
//! driftroom-crypto  (AEAD kernel, no knowledge of rooms)
//!        |
//!        v
//! driftroom-core    (this crate: entities, state machine, ApiError)
//!        |
//!   +----+----+
//!   v         v
//! driftroom-db   driftroom-blob
//!   |              |
//!   +------+-------+
//!          v
//!   driftroom-server (HTTP, WS, registry, lifecycle, archival)
//! ```
//!
//! Nothing in this crate touches I/O; it exists so `driftroom-db`,
//! `driftroom-blob` and `driftroom-server` all agree on what a `Room` is and
//! how errors are classified, without any of them depending on each other.

mod attachment;
mod error;
mod message;
mod participant;
mod room;

pub use attachment::{ALLOWED_MIME_TYPES, Attachment, MAX_UPLOAD_BYTES};
pub use error::{ApiError, ValidationKind, WsOutcome};
pub use message::{Message, MessageType};
pub use participant::{Participant, Role};
pub use room::{Room, RoomStatus};
