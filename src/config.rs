//! # rmsched Configuration
//!
//! Compile-time constants governing admission control and dispatch, plus the
//! small runtime [`SchedulerConfig`] that a [`Kernel`](crate::kernel::Kernel)
//! is started with.

/// Fixed-point scale used for utilization arithmetic. A task's utilization
/// `C / T` is represented as `C * UTILIZATION_SCALE / T`, so `1000` means the
/// task would occupy the whole CPU.
pub const UTILIZATION_SCALE: u64 = 1000;

/// Default admission threshold, `ln 2 ≈ 0.693` scaled by
/// `UTILIZATION_SCALE`. This is the asymptotic Liu-and-Layland bound for
/// Rate-Monotonic scheduling.
pub const DEFAULT_ADMISSION_BOUND: u64 = 693;

/// Default real-time priority level given to the dispatched task.
/// Matches the highest user-visible FIFO level on Linux.
pub const DEFAULT_RT_LEVEL: u8 = 99;

/// Name of the dispatcher thread.
pub const DISPATCHER_THREAD_NAME: &str = "rmsched-dispatch";

/// Prefix of the per-task release timer threads. The task id is appended.
pub const TIMER_THREAD_PREFIX: &str = "rmsched-timer-";

/// Runtime scheduler configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Admission threshold in `UTILIZATION_SCALE` units. A candidate is
    /// admitted iff the scaled utilization sum stays at or below this value.
    pub admission_bound_milli: u64,

    /// Real-time level passed to `ThreadControl::set_priority` when a task
    /// is promoted.
    pub realtime_level: u8,
}

impl SchedulerConfig {
    /// Override the admission bound.
    pub const fn with_admission_bound(mut self, bound_milli: u64) -> Self {
        self.admission_bound_milli = bound_milli;
        self
    }

    /// Override the real-time level.
    pub const fn with_realtime_level(mut self, level: u8) -> Self {
        self.realtime_level = level;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            admission_bound_milli: DEFAULT_ADMISSION_BOUND,
            realtime_level: DEFAULT_RT_LEVEL,
        }
    }
}
