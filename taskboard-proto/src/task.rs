//! Task data model for the collaborative board.
//!
//! Tasks live in a partition (team + column) and carry a dense, zero-based
//! `position` that is unique within the partition. Position values are owned
//! by the server's ordering engine; clients treat them as opaque display
//! order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 200;

/// Maximum allowed task description length in characters.
pub const MAX_TASK_DESCRIPTION_LENGTH: usize = 2000;

/// Maximum allowed comment length in characters.
pub const MAX_COMMENT_LENGTH: usize = 1000;

/// Unique identifier for a task, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new time-ordered task identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `TaskId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a task comment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommentId(Uuid);

impl CommentId {
    /// Creates a new time-ordered comment identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for CommentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The (team, column) key space within which task ordering is dense and
/// unique.
///
/// `Ord` is derived so that multi-partition operations can acquire locks in
/// a canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Partition {
    /// Owning team identifier; also the broadcast room for the partition.
    pub team_id: String,
    /// Column identifier within the team board.
    pub column_id: String,
}

impl Partition {
    /// Creates a partition key from team and column identifiers.
    #[must_use]
    pub fn new(team_id: impl Into<String>, column_id: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            column_id: column_id.into(),
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.team_id, self.column_id)
    }
}

/// Priority of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    /// Low priority.
    Low,
    /// Medium priority (default).
    Medium,
    /// High priority.
    High,
    /// Urgent, needs immediate attention.
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Task is active on the board.
    Active,
    /// Task has been completed.
    Completed,
    /// Task has been archived off the board.
    Archived,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

/// A comment attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Unique comment identifier.
    pub id: CommentId,
    /// User who wrote the comment.
    pub user_id: String,
    /// Comment body.
    pub content: String,
    /// When the comment was created (milliseconds since epoch).
    pub created_at: u64,
    /// When the comment was last edited, if ever.
    pub edited_at: Option<u64>,
}

/// A task on the board.
///
/// `position` is maintained by the server's ordering engine: within each
/// partition the positions of all tasks are exactly `{0, 1, ..., n-1}`.
/// The remaining fields are carried along by mutations but play no part in
/// ordering invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier (UUID v7, time-ordered).
    pub id: TaskId,
    /// Partition (team + column) this task belongs to.
    pub partition: Partition,
    /// Dense zero-based position within the partition.
    pub position: u32,
    /// Task title.
    pub title: String,
    /// Longer free-form description.
    pub description: String,
    /// User ids of the assignees.
    pub assignees: Vec<String>,
    /// Task priority.
    pub priority: Priority,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Optional due date (milliseconds since epoch).
    pub due_date: Option<u64>,
    /// Comments attached to this task, oldest first.
    pub comments: Vec<Comment>,
    /// User who created the task.
    pub created_by: String,
    /// When the task was created (milliseconds since epoch).
    pub created_at: u64,
    /// When the task was completed, if it has been.
    pub completed_at: Option<u64>,
}
