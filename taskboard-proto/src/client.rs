//! Messages sent from a client to the collaboration server.
//!
//! The first frame on a new connection must be [`ClientMessage::Authenticate`];
//! everything else is rejected until the session is authenticated. Task
//! mutations do not travel over this channel — they go through the server's
//! task API and arrive back as broadcast events.

use serde::{Deserialize, Serialize};

/// An inbound protocol message from a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Present a credential token; must be the first message on the
    /// connection.
    Authenticate {
        /// Opaque credential token verified by the credential collaborator.
        token: String,
    },
    /// Join a team room. Requires team membership.
    JoinTeam {
        /// Team to join.
        team_id: String,
    },
    /// Leave a team room.
    LeaveTeam {
        /// Team to leave.
        team_id: String,
    },
    /// Ephemeral typing indicator, relayed to the room without persistence.
    Typing {
        /// Room the indicator applies to.
        team_id: String,
        /// Task being edited.
        task_id: String,
        /// Whether the user is currently typing.
        is_typing: bool,
    },
    /// Ephemeral cursor position for collaborative editing, relayed without
    /// persistence.
    Cursor {
        /// Room the cursor update applies to.
        team_id: String,
        /// Task being edited.
        task_id: String,
        /// Opaque cursor position within the task editor.
        position: u32,
    },
    /// Update the user's presence status label (e.g. "away").
    Status {
        /// New status label.
        status: String,
    },
}

/// Encodes a [`ClientMessage`] into bytes using postcard.
///
/// # Errors
///
/// Returns an error string if serialization fails.
pub fn encode(msg: &ClientMessage) -> Result<Vec<u8>, String> {
    postcard::to_allocvec(msg).map_err(|e| format!("client message encode error: {e}"))
}

/// Decodes a [`ClientMessage`] from bytes using postcard.
///
/// # Errors
///
/// Returns an error string if deserialization fails.
pub fn decode(bytes: &[u8]) -> Result<ClientMessage, String> {
    postcard::from_bytes(bytes).map_err(|e| format!("client message decode error: {e}"))
}
