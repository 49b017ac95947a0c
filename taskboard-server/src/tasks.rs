//! Task lifecycle operations over the dense-position ordering engine.
//!
//! [`TaskOrderingService`] is the only writer of task records. Every
//! mutation follows the same shape: acquire the per-partition lock, read an
//! ordered snapshot, apply the change through [`OrderedList`], and commit
//! the minimal write batch under the snapshot's version token. A version
//! conflict (another process wrote the partition) retries the whole
//! operation with exponential backoff.
//!
//! Cross-partition moves lock both partitions in canonical [`Partition`]
//! order so two opposing moves cannot deadlock, and commit one atomic batch
//! covering both version tokens.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use taskboard_proto::event::ServerEvent;
use taskboard_proto::task::{
    Comment, CommentId, MAX_COMMENT_LENGTH, MAX_TASK_DESCRIPTION_LENGTH, MAX_TASK_TITLE_LENGTH,
    Partition, Priority, Task, TaskId, TaskStatus,
};
use tracing::debug;

use crate::broadcast::BroadcastRouter;
use crate::ordering::{OrderedList, OrderingError};
use crate::store::{StoreError, TaskStore, WriteBatch};

/// How many times an operation retries after a version conflict.
const MAX_CONFLICT_RETRIES: u32 = 3;
/// Backoff before the first retry; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(25);

/// Errors from task operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskServiceError {
    /// No task with this id exists.
    #[error("task {0} not found")]
    NotFound(TaskId),
    /// A requested position was out of range.
    #[error("position {position} out of range for partition of size {len}")]
    InvalidPosition {
        /// The requested position.
        position: usize,
        /// The partition size at the time of the request.
        len: usize,
    },
    /// The store rejected the write after exhausting retries.
    #[error("version conflict on partition {0}")]
    Conflict(Partition),
    /// Task titles must contain at least one non-whitespace character.
    #[error("task title must not be empty")]
    TitleEmpty,
    /// Task titles are capped at [`MAX_TASK_TITLE_LENGTH`] characters.
    #[error("task title exceeds {MAX_TASK_TITLE_LENGTH} characters")]
    TitleTooLong,
    /// Descriptions are capped at [`MAX_TASK_DESCRIPTION_LENGTH`] characters.
    #[error("task description exceeds {MAX_TASK_DESCRIPTION_LENGTH} characters")]
    DescriptionTooLong,
    /// Comments must contain at least one non-whitespace character.
    #[error("comment must not be empty")]
    CommentEmpty,
    /// Comments are capped at [`MAX_COMMENT_LENGTH`] characters.
    #[error("comment exceeds {MAX_COMMENT_LENGTH} characters")]
    CommentTooLong,
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for TaskServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(partition) => Self::Conflict(partition),
            StoreError::Unavailable(reason) => Self::Unavailable(reason),
        }
    }
}

/// Fields supplied when creating a task. Position is always assigned by the
/// service (end of the target partition), never by the caller.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    /// Partition the task is created in.
    pub partition: Partition,
    /// Task title.
    pub title: String,
    /// Task description (may be empty).
    pub description: String,
    /// Assigned user ids.
    pub assignees: Vec<String>,
    /// Task priority.
    pub priority: Priority,
    /// Optional due date, milliseconds since the Unix epoch.
    pub due_date: Option<u64>,
    /// User id of the creator.
    pub created_by: String,
}

/// A partial update to a task's carried fields. `None` leaves the field
/// unchanged; `due_date` uses a nested option so it can be cleared.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New assignee list.
    pub assignees: Option<Vec<String>>,
    /// New priority.
    pub priority: Option<Priority>,
    /// New status. Moving to `Completed` stamps `completed_at`; moving back
    /// to `Active` clears it.
    pub status: Option<TaskStatus>,
    /// New due date (`Some(None)` clears it).
    pub due_date: Option<Option<u64>>,
}

/// One async mutex per partition, created on first use.
///
/// Writers in this process serialize per partition, so the version token
/// only ever trips when an external writer shares the store.
#[derive(Default)]
struct PartitionLocks {
    map: Mutex<HashMap<Partition, Arc<tokio::sync::Mutex<()>>>>,
}

impl PartitionLocks {
    fn handle(&self, partition: &Partition) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.map.lock();
        Arc::clone(map.entry(partition.clone()).or_default())
    }
}

/// Task write path: validation, dense-position maintenance, and event
/// publication, generic over the store backend.
pub struct TaskOrderingService<S> {
    store: S,
    locks: PartitionLocks,
    router: Arc<BroadcastRouter>,
}

impl<S: TaskStore> TaskOrderingService<S> {
    /// Creates a service over a store, publishing events through `router`.
    pub fn new(store: S, router: Arc<BroadcastRouter>) -> Self {
        Self {
            store,
            locks: PartitionLocks::default(),
            router,
        }
    }

    /// Creates a task at the end of its partition.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty or oversized title or an
    /// oversized description, or a store error.
    pub async fn create_task(&self, draft: TaskDraft) -> Result<Task, TaskServiceError> {
        validate_title(&draft.title)?;
        validate_description(&draft.description)?;
        retry_conflicts("create_task", || self.create_once(&draft)).await
    }

    async fn create_once(&self, draft: &TaskDraft) -> Result<Task, TaskServiceError> {
        let lock = self.locks.handle(&draft.partition);
        let _guard = lock.lock().await;

        let snapshot = self.store.read_partition(&draft.partition).await?;
        let task = Task {
            id: TaskId::new(),
            partition: draft.partition.clone(),
            position: wire_position(snapshot.tasks.len()),
            title: draft.title.clone(),
            description: draft.description.clone(),
            assignees: draft.assignees.clone(),
            priority: draft.priority,
            status: TaskStatus::Active,
            due_date: draft.due_date,
            comments: Vec::new(),
            created_by: draft.created_by.clone(),
            created_at: now_ms(),
            completed_at: None,
        };

        let mut batch = WriteBatch::new();
        batch.expect(draft.partition.clone(), snapshot.version);
        batch.upsert(task.clone());
        self.store.commit(batch).await?;

        self.router
            .publish(
                &draft.partition.team_id,
                &ServerEvent::TaskCreated { task: task.clone() },
                None,
            )
            .await;
        Ok(task)
    }

    /// Moves a task to `target` within `dest`, relocating it across
    /// partitions first if it currently lives elsewhere.
    ///
    /// `target` is clamped into the destination's valid range, so "move to
    /// the end" requests that race with a concurrent delete still land.
    ///
    /// # Errors
    ///
    /// Returns [`TaskServiceError::NotFound`] for an unknown task, or a
    /// store error.
    pub async fn move_task(
        &self,
        id: &TaskId,
        dest: Partition,
        target: usize,
    ) -> Result<Task, TaskServiceError> {
        retry_conflicts("move_task", || self.move_once(id, &dest, target)).await
    }

    async fn move_once(
        &self,
        id: &TaskId,
        dest: &Partition,
        target: usize,
    ) -> Result<Task, TaskServiceError> {
        let task = self
            .store
            .read_task(id)
            .await?
            .ok_or_else(|| TaskServiceError::NotFound(id.clone()))?;
        let source = task.partition.clone();
        if source == *dest {
            self.move_within(id, &source, target).await
        } else {
            self.move_across(id, &source, dest, target).await
        }
    }

    async fn move_within(
        &self,
        id: &TaskId,
        partition: &Partition,
        target: usize,
    ) -> Result<Task, TaskServiceError> {
        let lock = self.locks.handle(partition);
        let _guard = lock.lock().await;

        let snapshot = self.store.read_partition(partition).await?;
        let mut list = OrderedList::from_sorted(snapshot.tasks.iter().map(|t| t.id.clone()).collect());
        if list.position_of(id).is_none() {
            // The task moved partitions between the lookup and the lock.
            return Err(TaskServiceError::Conflict(partition.clone()));
        }
        let clamped = clamp_move_target(target, list.len());
        let changed = list
            .move_to(id, clamped)
            .map_err(|e| ordering_to_service(e, partition))?;

        let by_id: HashMap<&TaskId, &Task> = snapshot.tasks.iter().map(|t| (&t.id, t)).collect();
        let mut moved = by_id
            .get(id)
            .map(|t| (*t).clone())
            .ok_or_else(|| TaskServiceError::NotFound(id.clone()))?;

        if changed.is_empty() {
            // Already at the target position.
            return Ok(moved);
        }

        let mut batch = WriteBatch::new();
        batch.expect(partition.clone(), snapshot.version);
        for (task_id, position) in &changed {
            if let Some(task) = by_id.get(task_id) {
                let mut task = (*task).clone();
                task.position = wire_position(*position);
                if task.id == *id {
                    moved = task.clone();
                }
                batch.upsert(task);
            }
        }
        self.store.commit(batch).await?;

        self.router
            .publish(
                &partition.team_id,
                &ServerEvent::TaskMoved {
                    task_id: id.clone(),
                    from: partition.clone(),
                    to: partition.clone(),
                    position: moved.position,
                },
                None,
            )
            .await;
        Ok(moved)
    }

    async fn move_across(
        &self,
        id: &TaskId,
        source: &Partition,
        dest: &Partition,
        target: usize,
    ) -> Result<Task, TaskServiceError> {
        // Canonical lock order prevents deadlock with the opposing move.
        let (first, second) = if source <= dest {
            (source.clone(), dest.clone())
        } else {
            (dest.clone(), source.clone())
        };
        let first_lock = self.locks.handle(&first);
        let second_lock = self.locks.handle(&second);
        let _g1 = first_lock.lock().await;
        let _g2 = second_lock.lock().await;

        let source_snapshot = self.store.read_partition(source).await?;
        let dest_snapshot = self.store.read_partition(dest).await?;

        let mut source_list =
            OrderedList::from_sorted(source_snapshot.tasks.iter().map(|t| t.id.clone()).collect());
        let (_, shifted) = match source_list.remove(id) {
            Ok(result) => result,
            // The task moved partitions between the lookup and the locks.
            Err(OrderingError::NotFound) => {
                return Err(TaskServiceError::Conflict(source.clone()));
            }
            Err(e) => return Err(ordering_to_service(e, source)),
        };

        // Source is compacted first; the target is evaluated against the
        // destination as it stands, clamped to an append.
        let mut dest_list =
            OrderedList::from_sorted(dest_snapshot.tasks.iter().map(|t| t.id.clone()).collect());
        let clamped = target.min(dest_list.len());
        let dest_changed = dest_list
            .insert_at(id.clone(), clamped)
            .map_err(|e| ordering_to_service(e, dest))?;

        let source_by_id: HashMap<&TaskId, &Task> =
            source_snapshot.tasks.iter().map(|t| (&t.id, t)).collect();
        let dest_by_id: HashMap<&TaskId, &Task> =
            dest_snapshot.tasks.iter().map(|t| (&t.id, t)).collect();

        let mut moved = source_by_id
            .get(id)
            .map(|t| (*t).clone())
            .ok_or_else(|| TaskServiceError::NotFound(id.clone()))?;
        moved.partition = dest.clone();
        moved.position = wire_position(clamped);

        let mut batch = WriteBatch::new();
        batch.expect(source.clone(), source_snapshot.version);
        batch.expect(dest.clone(), dest_snapshot.version);
        for (task_id, position) in &shifted {
            if let Some(task) = source_by_id.get(task_id) {
                let mut task = (*task).clone();
                task.position = wire_position(*position);
                batch.upsert(task);
            }
        }
        for (task_id, position) in &dest_changed {
            if task_id == id {
                continue;
            }
            if let Some(task) = dest_by_id.get(task_id) {
                let mut task = (*task).clone();
                task.position = wire_position(*position);
                batch.upsert(task);
            }
        }
        batch.upsert(moved.clone());
        self.store.commit(batch).await?;

        let event = ServerEvent::TaskMoved {
            task_id: id.clone(),
            from: source.clone(),
            to: dest.clone(),
            position: moved.position,
        };
        self.router.publish(&source.team_id, &event, None).await;
        if dest.team_id != source.team_id {
            self.router.publish(&dest.team_id, &event, None).await;
        }
        Ok(moved)
    }

    /// Deletes a task and compacts the positions after it.
    ///
    /// # Errors
    ///
    /// Returns [`TaskServiceError::NotFound`] for an unknown task, or a
    /// store error.
    pub async fn delete_task(&self, id: &TaskId) -> Result<(), TaskServiceError> {
        retry_conflicts("delete_task", || self.delete_once(id)).await
    }

    async fn delete_once(&self, id: &TaskId) -> Result<(), TaskServiceError> {
        let task = self
            .store
            .read_task(id)
            .await?
            .ok_or_else(|| TaskServiceError::NotFound(id.clone()))?;
        let partition = task.partition.clone();

        let lock = self.locks.handle(&partition);
        let _guard = lock.lock().await;

        let snapshot = self.store.read_partition(&partition).await?;
        let mut list = OrderedList::from_sorted(snapshot.tasks.iter().map(|t| t.id.clone()).collect());
        let (_, shifted) = match list.remove(id) {
            Ok(result) => result,
            Err(OrderingError::NotFound) => {
                return Err(TaskServiceError::Conflict(partition.clone()));
            }
            Err(e) => return Err(ordering_to_service(e, &partition)),
        };

        let by_id: HashMap<&TaskId, &Task> = snapshot.tasks.iter().map(|t| (&t.id, t)).collect();
        let mut batch = WriteBatch::new();
        batch.expect(partition.clone(), snapshot.version);
        batch.delete(id.clone());
        for (task_id, position) in &shifted {
            if let Some(task) = by_id.get(task_id) {
                let mut task = (*task).clone();
                task.position = wire_position(*position);
                batch.upsert(task);
            }
        }
        self.store.commit(batch).await?;

        self.router
            .publish(
                &partition.team_id,
                &ServerEvent::TaskDeleted {
                    task_id: id.clone(),
                    partition: partition.clone(),
                },
                None,
            )
            .await;
        Ok(())
    }

    /// Applies a partial update to a task's carried fields. Position and
    /// partition are never touched here; those change only via
    /// [`move_task`](Self::move_task).
    ///
    /// # Errors
    ///
    /// Returns a validation error for a patched title or description that
    /// breaks the length rules, [`TaskServiceError::NotFound`] for an
    /// unknown task, or a store error.
    pub async fn update_task(
        &self,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<Task, TaskServiceError> {
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        if let Some(description) = &patch.description {
            validate_description(description)?;
        }
        retry_conflicts("update_task", || self.update_once(id, &patch)).await
    }

    async fn update_once(
        &self,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<Task, TaskServiceError> {
        let current = self
            .store
            .read_task(id)
            .await?
            .ok_or_else(|| TaskServiceError::NotFound(id.clone()))?;
        let partition = current.partition.clone();

        let lock = self.locks.handle(&partition);
        let _guard = lock.lock().await;

        let snapshot = self.store.read_partition(&partition).await?;
        let mut task = self
            .store
            .read_task(id)
            .await?
            .ok_or_else(|| TaskServiceError::NotFound(id.clone()))?;

        if let Some(title) = &patch.title {
            task.title = title.clone();
        }
        if let Some(description) = &patch.description {
            task.description = description.clone();
        }
        if let Some(assignees) = &patch.assignees {
            task.assignees = assignees.clone();
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(status) = patch.status {
            if status != task.status {
                match status {
                    TaskStatus::Completed => task.completed_at = Some(now_ms()),
                    TaskStatus::Active => task.completed_at = None,
                    TaskStatus::Archived => {}
                }
                task.status = status;
            }
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = due_date;
        }

        let mut batch = WriteBatch::new();
        batch.expect(partition.clone(), snapshot.version);
        batch.upsert(task.clone());
        self.store.commit(batch).await?;

        self.router
            .publish(
                &partition.team_id,
                &ServerEvent::TaskUpdated { task: task.clone() },
                None,
            )
            .await;
        Ok(task)
    }

    /// Appends a comment to a task.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty or oversized comment,
    /// [`TaskServiceError::NotFound`] for an unknown task, or a store error.
    pub async fn add_comment(
        &self,
        id: &TaskId,
        user_id: &str,
        content: &str,
    ) -> Result<Comment, TaskServiceError> {
        if content.trim().is_empty() {
            return Err(TaskServiceError::CommentEmpty);
        }
        if content.chars().count() > MAX_COMMENT_LENGTH {
            return Err(TaskServiceError::CommentTooLong);
        }
        retry_conflicts("add_comment", || self.comment_once(id, user_id, content)).await
    }

    async fn comment_once(
        &self,
        id: &TaskId,
        user_id: &str,
        content: &str,
    ) -> Result<Comment, TaskServiceError> {
        let current = self
            .store
            .read_task(id)
            .await?
            .ok_or_else(|| TaskServiceError::NotFound(id.clone()))?;
        let partition = current.partition.clone();

        let lock = self.locks.handle(&partition);
        let _guard = lock.lock().await;

        let snapshot = self.store.read_partition(&partition).await?;
        let mut task = self
            .store
            .read_task(id)
            .await?
            .ok_or_else(|| TaskServiceError::NotFound(id.clone()))?;

        let comment = Comment {
            id: CommentId::new(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            created_at: now_ms(),
            edited_at: None,
        };
        task.comments.push(comment.clone());

        let mut batch = WriteBatch::new();
        batch.expect(partition.clone(), snapshot.version);
        batch.upsert(task);
        self.store.commit(batch).await?;

        self.router
            .publish(
                &partition.team_id,
                &ServerEvent::CommentAdded {
                    task_id: id.clone(),
                    comment: comment.clone(),
                },
                None,
            )
            .await;
        Ok(comment)
    }

    /// The tasks of one partition, ordered by position.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub async fn tasks_in_partition(
        &self,
        partition: &Partition,
    ) -> Result<Vec<Task>, TaskServiceError> {
        Ok(self.store.read_partition(partition).await?.tasks)
    }
}

/// Retries `make` on version conflicts with exponential backoff, up to
/// [`MAX_CONFLICT_RETRIES`] times.
async fn retry_conflicts<T, Fut>(
    op: &str,
    make: impl Fn() -> Fut,
) -> Result<T, TaskServiceError>
where
    Fut: std::future::Future<Output = Result<T, TaskServiceError>>,
{
    let mut attempt = 0u32;
    loop {
        match make().await {
            Err(TaskServiceError::Conflict(partition)) if attempt < MAX_CONFLICT_RETRIES => {
                attempt += 1;
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                debug!(op, %partition, attempt, ?delay, "version conflict, retrying");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

fn validate_title(title: &str) -> Result<(), TaskServiceError> {
    if title.trim().is_empty() {
        return Err(TaskServiceError::TitleEmpty);
    }
    if title.chars().count() > MAX_TASK_TITLE_LENGTH {
        return Err(TaskServiceError::TitleTooLong);
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<(), TaskServiceError> {
    if description.chars().count() > MAX_TASK_DESCRIPTION_LENGTH {
        return Err(TaskServiceError::DescriptionTooLong);
    }
    Ok(())
}

/// For moves within a partition, any target at or beyond the end means
/// "last position".
fn clamp_move_target(target: usize, len: usize) -> usize {
    target.min(len.saturating_sub(1))
}

fn ordering_to_service(e: OrderingError, partition: &Partition) -> TaskServiceError {
    match e {
        OrderingError::NotFound => TaskServiceError::Conflict(partition.clone()),
        OrderingError::InvalidPosition { position, len } => {
            TaskServiceError::InvalidPosition { position, len }
        }
    }
}

fn wire_position(position: usize) -> u32 {
    u32::try_from(position).unwrap_or(u32::MAX)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
