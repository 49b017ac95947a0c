//! User identity summary carried in presence events and snapshots.

use serde::{Deserialize, Serialize};

/// Minimal description of a user, enough for clients to render presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    /// Opaque user identifier.
    pub user_id: String,
    /// Display name.
    pub username: String,
    /// Optional avatar image URL.
    pub avatar_url: Option<String>,
}

impl UserSummary {
    /// Creates a summary with no avatar.
    #[must_use]
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            avatar_url: None,
        }
    }
}
