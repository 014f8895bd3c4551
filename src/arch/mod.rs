//! # Thread Control Layer
//!
//! The boundary between the scheduling core and whatever actually runs the
//! managed threads. The dispatcher never touches an OS scheduler directly;
//! it calls a [`ThreadControl`] implementation to resolve ids, change
//! priorities and wake or suspend threads.
//!
//! Two backends ship with the crate:
//! - [`host::HostThreads`]: gates real in-process threads.
//! - [`recording::RecordingControl`]: records every call for assertions
//!   and dry runs.

pub mod host;
pub mod recording;

use crate::task::TaskId;

/// Scheduling tier a managed thread is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Ordinary time-sharing class. Threads not currently dispatched live
    /// here.
    Normal,
    /// Fixed real-time class at the given level. Only the dispatched task
    /// holds it.
    RealTime(u8),
}

/// Capability to manipulate the real scheduling of managed threads.
///
/// Implementations must not call back into the kernel: `resolve`,
/// `set_priority`, `wake` and `suspend` may be invoked with the registry
/// lock held.
pub trait ThreadControl: Send + Sync {
    /// Whether `id` names a live thread that can be scheduled.
    fn resolve(&self, id: TaskId) -> bool;

    /// Move `id` into the given priority tier.
    fn set_priority(&self, id: TaskId, priority: Priority);

    /// Make `id` runnable and let it take the CPU.
    fn wake(&self, id: TaskId);

    /// Take `id` off the CPU until it is woken again.
    fn suspend(&self, id: TaskId);

    /// Called once on the dispatcher thread before its first decision, so
    /// a backend can lift the dispatcher above every managed thread.
    fn prepare_dispatcher(&self) {}
}
