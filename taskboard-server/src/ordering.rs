//! Dense-position ordering engine for tasks within a partition.
//!
//! [`OrderedList`] keeps the task ids of one partition in display order; a
//! task's position is its index. Every mutation reports exactly the set of
//! `(id, new_position)` pairs that changed, so callers can translate an
//! operation into a minimal batch of store writes.
//!
//! Invariant: after every operation the positions of the tasks in the list
//! are exactly `{0, 1, ..., n-1}` — no gaps, no duplicates. This holds by
//! construction (index = position) as long as ids are unique, which
//! [`OrderedList::from_sorted`] and the insert operations preserve.
//!
//! This layer is strict about ranges: an out-of-range target is an
//! [`OrderingError::InvalidPosition`]. Clamping of wire-level requests
//! happens one layer up, in the task service.

use taskboard_proto::task::TaskId;

/// Errors from pure ordering operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OrderingError {
    /// The task id is not in this partition's list.
    #[error("task is not in this partition")]
    NotFound,
    /// The target position is outside the valid range.
    #[error("position {position} out of range for partition of size {len}")]
    InvalidPosition {
        /// The requested position.
        position: usize,
        /// The partition size at the time of the request.
        len: usize,
    },
}

/// The ordered task ids of one partition. Index = position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedList {
    ids: Vec<TaskId>,
}

impl OrderedList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Builds a list from ids already sorted by position.
    ///
    /// Callers read tasks from the store ordered by position; the resulting
    /// indices are the dense positions.
    #[must_use]
    pub fn from_sorted(ids: Vec<TaskId>) -> Self {
        Self { ids }
    }

    /// Number of tasks in the partition.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the partition is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The ids in position order.
    #[must_use]
    pub fn ids(&self) -> &[TaskId] {
        &self.ids
    }

    /// Current position of a task, if present.
    #[must_use]
    pub fn position_of(&self, id: &TaskId) -> Option<usize> {
        self.ids.iter().position(|t| t == id)
    }

    /// Appends a task at the end of the partition, returning its position.
    ///
    /// No other task's position changes, so there is nothing to report.
    pub fn push_end(&mut self, id: TaskId) -> usize {
        self.ids.push(id);
        self.ids.len() - 1
    }

    /// Inserts a task at `position`, opening a slot by shifting every task
    /// at or after `position` up by one.
    ///
    /// Valid positions are `0..=len` (inserting at `len` is an append).
    /// Returns every `(id, new_position)` pair that changed, including the
    /// inserted task.
    ///
    /// # Errors
    ///
    /// Returns [`OrderingError::InvalidPosition`] if `position > len`.
    pub fn insert_at(
        &mut self,
        id: TaskId,
        position: usize,
    ) -> Result<Vec<(TaskId, usize)>, OrderingError> {
        if position > self.ids.len() {
            return Err(OrderingError::InvalidPosition {
                position,
                len: self.ids.len(),
            });
        }
        self.ids.insert(position, id);
        Ok(self.changed_range(position, self.ids.len() - 1))
    }

    /// Moves a task to `target`, shifting the tasks between its old and new
    /// positions by one in the opposite direction.
    ///
    /// Moving a task to its current position is a no-op and returns an empty
    /// change set.
    ///
    /// # Errors
    ///
    /// Returns [`OrderingError::NotFound`] if the task is not in the list,
    /// or [`OrderingError::InvalidPosition`] if `target >= len`.
    pub fn move_to(
        &mut self,
        id: &TaskId,
        target: usize,
    ) -> Result<Vec<(TaskId, usize)>, OrderingError> {
        let old = self.position_of(id).ok_or(OrderingError::NotFound)?;
        if target >= self.ids.len() {
            return Err(OrderingError::InvalidPosition {
                position: target,
                len: self.ids.len(),
            });
        }
        if target == old {
            return Ok(Vec::new());
        }
        let moved = self.ids.remove(old);
        self.ids.insert(target, moved);
        Ok(self.changed_range(old.min(target), old.max(target)))
    }

    /// Removes a task, closing the gap by shifting every later task down by
    /// one.
    ///
    /// Returns the removed task's old position and the `(id, new_position)`
    /// pairs of the shifted tasks.
    ///
    /// # Errors
    ///
    /// Returns [`OrderingError::NotFound`] if the task is not in the list.
    pub fn remove(
        &mut self,
        id: &TaskId,
    ) -> Result<(usize, Vec<(TaskId, usize)>), OrderingError> {
        let old = self.position_of(id).ok_or(OrderingError::NotFound)?;
        self.ids.remove(old);
        let shifted = if old < self.ids.len() {
            self.changed_range(old, self.ids.len() - 1)
        } else {
            Vec::new()
        };
        Ok((old, shifted))
    }

    /// The `(id, position)` pairs for an inclusive index range.
    fn changed_range(&self, from: usize, to: usize) -> Vec<(TaskId, usize)> {
        (from..=to).map(|i| (self.ids[i].clone(), i)).collect()
    }
}
