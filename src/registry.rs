//! # Task Registry
//!
//! The collection of registered periodic tasks, keyed by [`TaskId`] and kept
//! in insertion order. Every component reaches it through a single
//! `Mutex<TaskRegistry>`; the registry itself does no locking.
//!
//! Insertion order carries no priority meaning. The dispatcher imposes RM
//! order itself when it scans [`TaskRegistry::for_each_ready`].

use crate::error::SchedError;
use crate::task::{PeriodicTask, TaskId, TaskState};

/// Registered tasks in insertion order.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<PeriodicTask>,
}

impl TaskRegistry {
    pub const fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Add a task.
    ///
    /// # Errors
    /// - `DuplicateRegistration` if the id is already present.
    /// - `OutOfMemory` if the backing storage cannot grow.
    ///
    /// On error the registry is unchanged and the task is handed back to
    /// the caller's drop.
    pub fn insert(&mut self, task: PeriodicTask) -> Result<(), SchedError> {
        if self.contains(task.id) {
            return Err(SchedError::DuplicateRegistration(task.id));
        }
        self.tasks
            .try_reserve(1)
            .map_err(|_| SchedError::OutOfMemory)?;
        self.tasks.push(task);
        Ok(())
    }

    /// Remove and return the task with `id`, preserving the order of the
    /// remaining entries.
    pub fn remove(&mut self, id: TaskId) -> Result<PeriodicTask, SchedError> {
        let index = self.position(id).ok_or(SchedError::UnknownIdentifier(id))?;
        Ok(self.tasks.remove(index))
    }

    pub fn find(&self, id: TaskId) -> Result<&PeriodicTask, SchedError> {
        self.tasks
            .iter()
            .find(|t| t.id == id)
            .ok_or(SchedError::UnknownIdentifier(id))
    }

    pub fn find_mut(&mut self, id: TaskId) -> Result<&mut PeriodicTask, SchedError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(SchedError::UnknownIdentifier(id))
    }

    #[inline]
    pub fn contains(&self, id: TaskId) -> bool {
        self.position(id).is_some()
    }

    /// Lazy traversal of `Ready` tasks in insertion order. Calling it again
    /// restarts from the first entry.
    pub fn for_each_ready(&self) -> impl Iterator<Item = &PeriodicTask> + '_ {
        self.tasks.iter().filter(|t| t.state == TaskState::Ready)
    }

    /// All tasks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &PeriodicTask> + '_ {
        self.tasks.iter()
    }

    /// Remove every task, in insertion order. Used on shutdown.
    pub fn drain(&mut self) -> Vec<PeriodicTask> {
        std::mem::take(&mut self.tasks)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of tasks currently `Running`. The dispatcher keeps this at
    /// zero or one.
    pub fn running_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Running)
            .count()
    }

    fn position(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }
}
