//! Scheduler error kinds.

use std::io;

use thiserror::Error;

use crate::task::TaskId;

/// Errors returned by registry, admission and kernel operations.
///
/// None of these are fatal: a failed `register` leaves no trace in the
/// registry, and a failed `yield`/`unregister` is a no-op.
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("task {0} is already registered")]
    DuplicateRegistration(TaskId),

    /// The candidate would push the scaled utilization above the bound.
    #[error("task {id} rejected: utilization would reach {utilization}/1000")]
    AdmissionRejected { id: TaskId, utilization: u64 },

    /// No registered task (or no resolvable thread) with this id.
    #[error("unknown task {0}")]
    UnknownIdentifier(TaskId),

    #[error("malformed request: {0:?}")]
    MalformedRequest(String),

    /// Zero period, zero computation time, or computation longer than the
    /// period.
    #[error("invalid contract: period {period_ms} ms, computation {computation_ms} ms")]
    InvalidContract { period_ms: u64, computation_ms: u64 },

    #[error("out of memory while growing the task registry")]
    OutOfMemory,

    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(#[from] io::Error),
}
