//! Durable task store seam and the in-process implementation.
//!
//! [`TaskStore`] is the contract the ordering service consumes: partition
//! reads return an ordered snapshot plus a version token, and commits are
//! all-or-nothing batches guarded by the version tokens of every partition
//! they touch. A token mismatch fails the whole batch with
//! [`StoreError::Conflict`] and the caller retries.
//!
//! [`MemoryStore`] backs the shipped single-node binary and the test suite.
//! Persistent backends live outside this crate.

use std::collections::HashMap;

use taskboard_proto::task::{Partition, Task, TaskId};
use tokio::sync::RwLock;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A version token in the batch did not match the partition's current
    /// version; nothing was written.
    #[error("version conflict on partition {0}")]
    Conflict(Partition),
    /// The store could not be reached or failed internally.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// An ordered read of one partition.
#[derive(Debug, Clone)]
pub struct PartitionSnapshot {
    /// Tasks sorted by position (dense, zero-based).
    pub tasks: Vec<Task>,
    /// Version token to present in a subsequent [`WriteBatch`].
    pub version: u64,
}

/// An all-or-nothing set of task writes.
///
/// Every partition the batch touches must be declared via [`WriteBatch::expect`]
/// with the version token from the read that produced the writes; commit
/// bumps the version of each declared partition.
#[derive(Debug, Default)]
pub struct WriteBatch {
    expected: Vec<(Partition, u64)>,
    upserts: Vec<Task>,
    deletes: Vec<TaskId>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a touched partition and the version token it was read at.
    pub fn expect(&mut self, partition: Partition, version: u64) {
        self.expected.push((partition, version));
    }

    /// Adds a task record to insert or replace.
    pub fn upsert(&mut self, task: Task) {
        self.upserts.push(task);
    }

    /// Adds a task id to delete.
    pub fn delete(&mut self, id: TaskId) {
        self.deletes.push(id);
    }
}

/// Contract for the durable task store collaborator.
///
/// Implementations must make [`commit`](TaskStore::commit) atomic: either
/// every write in the batch lands, or none do.
pub trait TaskStore: Send + Sync {
    /// Reads a partition's tasks ordered by position, with its version token.
    ///
    /// An unknown partition is an empty snapshot at version 0, not an error.
    fn read_partition(
        &self,
        partition: &Partition,
    ) -> impl std::future::Future<Output = Result<PartitionSnapshot, StoreError>> + Send;

    /// Reads a single task by id.
    fn read_task(
        &self,
        id: &TaskId,
    ) -> impl std::future::Future<Output = Result<Option<Task>, StoreError>> + Send;

    /// Commits a batch, or fails it wholesale on a version conflict.
    fn commit(
        &self,
        batch: WriteBatch,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Default)]
struct MemoryInner {
    tasks: HashMap<TaskId, Task>,
    versions: HashMap<Partition, u64>,
}

/// In-memory [`TaskStore`] with per-partition version counters.
///
/// A single [`RwLock`] makes commits atomic; version checks and writes
/// happen under one write guard.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryStore {
    async fn read_partition(
        &self,
        partition: &Partition,
    ) -> Result<PartitionSnapshot, StoreError> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| &t.partition == partition)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.position);
        Ok(PartitionSnapshot {
            tasks,
            version: inner.versions.get(partition).copied().unwrap_or(0),
        })
    }

    async fn read_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.tasks.get(id).cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        for (partition, expected) in &batch.expected {
            let current = inner.versions.get(partition).copied().unwrap_or(0);
            if current != *expected {
                return Err(StoreError::Conflict(partition.clone()));
            }
        }
        for task in batch.upserts {
            inner.tasks.insert(task.id.clone(), task);
        }
        for id in &batch.deletes {
            inner.tasks.remove(id);
        }
        for (partition, _) in batch.expected {
            *inner.versions.entry(partition).or_insert(0) += 1;
        }
        Ok(())
    }
}
