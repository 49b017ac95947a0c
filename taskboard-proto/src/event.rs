//! Events published by the server to connected clients.
//!
//! Task events mirror committed store mutations and are fanned out to the
//! owning team's room. Presence events fire only on a user's zero-to-one and
//! one-to-zero live-connection transitions for a room. Typing, cursor, and
//! status events are best-effort and carry no durability guarantee.

use serde::{Deserialize, Serialize};

use crate::task::{Comment, Partition, Task, TaskId};
use crate::user::UserSummary;

/// An outbound event from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// Authentication succeeded; the session is live.
    Connected {
        /// Authenticated user id.
        user_id: String,
        /// Authenticated display name.
        username: String,
    },
    /// Authentication failed; the server closes the connection after this.
    AuthRejected {
        /// Human-readable rejection reason.
        reason: String,
    },
    /// A task was created in one of the team's columns.
    TaskCreated {
        /// The newly created task.
        task: Task,
    },
    /// A task's carried fields changed (title, assignees, status, ...).
    TaskUpdated {
        /// The task after the update.
        task: Task,
    },
    /// A task moved within or across columns.
    TaskMoved {
        /// The task that moved.
        task_id: TaskId,
        /// Partition the task moved from.
        from: Partition,
        /// Partition the task now belongs to.
        to: Partition,
        /// The task's new position within `to`.
        position: u32,
    },
    /// A task was deleted; trailing positions in the partition compacted.
    TaskDeleted {
        /// The deleted task.
        task_id: TaskId,
        /// Partition the task was deleted from.
        partition: Partition,
    },
    /// A comment was added to a task.
    CommentAdded {
        /// Task the comment belongs to.
        task_id: TaskId,
        /// The new comment.
        comment: Comment,
    },
    /// A user became present in the room (first live connection).
    PresenceJoined {
        /// Room the user joined.
        team_id: String,
        /// The joining user.
        user: UserSummary,
    },
    /// A user fully departed the room (last live connection gone).
    PresenceLeft {
        /// Room the user left.
        team_id: String,
        /// The departed user.
        user_id: String,
    },
    /// Snapshot of all users currently present in a room, sent to a client
    /// on join for initial-state seeding.
    PresenceSnapshot {
        /// Room the snapshot describes.
        team_id: String,
        /// Distinct present users (deduplicated across connections).
        members: Vec<UserSummary>,
    },
    /// Relayed typing indicator.
    Typing {
        /// Room the indicator applies to.
        team_id: String,
        /// Task being edited.
        task_id: String,
        /// User who is typing (or stopped).
        user_id: String,
        /// Whether the user is currently typing.
        is_typing: bool,
    },
    /// Relayed cursor position.
    Cursor {
        /// Room the cursor update applies to.
        team_id: String,
        /// Task being edited.
        task_id: String,
        /// User whose cursor moved.
        user_id: String,
        /// Opaque cursor position within the task editor.
        position: u32,
    },
    /// A user's presence status label changed.
    StatusChanged {
        /// Room being notified.
        team_id: String,
        /// User whose status changed.
        user_id: String,
        /// New status label.
        status: String,
    },
    /// A request-scoped error; the session stays open.
    Error {
        /// Human-readable error reason.
        reason: String,
    },
}

/// Encodes a [`ServerEvent`] into bytes using postcard.
///
/// # Errors
///
/// Returns an error string if serialization fails.
pub fn encode(event: &ServerEvent) -> Result<Vec<u8>, String> {
    postcard::to_allocvec(event).map_err(|e| format!("event encode error: {e}"))
}

/// Decodes a [`ServerEvent`] from bytes using postcard.
///
/// # Errors
///
/// Returns an error string if deserialization fails.
pub fn decode(bytes: &[u8]) -> Result<ServerEvent, String> {
    postcard::from_bytes(bytes).map_err(|e| format!("event decode error: {e}"))
}
