//! # Periodic Task Record
//!
//! Defines the scheduling record for each registered periodic task: its
//! `(period, computation)` contract, its position in the RM state machine,
//! and the release timer that wakes it at the start of each period.
//!
//! The record never touches the task body. It only tracks what the
//! dispatcher needs to decide who runs next.

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::SchedError;
use crate::timer::ReleaseTimer;

// ---------------------------------------------------------------------------
// Task identity
// ---------------------------------------------------------------------------

/// Opaque handle of the thread being scheduled. On the control plane this
/// is the decimal pid/tid of the registering thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Scheduling state of a registered task.
///
/// ```text
///   register ──► ┌──────────┐   timer expiry   ┌─────────┐
///                │ Sleeping │ ───────────────► │  Ready  │
///                └──────────┘                  └─────────┘
///                     ▲                          │    ▲
///                     │ yield (boundary ahead)   │    │ preempted
///                     │                dispatch  ▼    │
///                     │                        ┌─────────┐
///                     └─────────────────────── │ Running │
///                                              └─────────┘
/// ```
///
/// Unregistration removes the task from any state; it is not a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not eligible to run; waiting for its next release.
    Sleeping,
    /// Released and waiting for the dispatcher.
    Ready,
    /// Currently holds the CPU. At most one task is in this state.
    Running,
}

impl TaskState {
    /// Whether the dispatcher may consider this task.
    #[inline]
    pub fn is_eligible(self) -> bool {
        matches!(self, TaskState::Ready | TaskState::Running)
    }
}

// ---------------------------------------------------------------------------
// Task contract (immutable after registration)
// ---------------------------------------------------------------------------

/// The `(period, computation)` contract a task registers with, both in
/// whole milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskParams {
    pub period_ms: u64,
    pub computation_ms: u64,
}

impl TaskParams {
    /// Validate and build a contract. Both values must be positive and the
    /// computation time must fit inside the period.
    pub fn new(period_ms: u64, computation_ms: u64) -> Result<Self, SchedError> {
        if period_ms == 0 || computation_ms == 0 || computation_ms > period_ms {
            return Err(SchedError::InvalidContract { period_ms, computation_ms });
        }
        Ok(Self { period_ms, computation_ms })
    }

    #[inline]
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    #[inline]
    pub fn computation(&self) -> Duration {
        Duration::from_millis(self.computation_ms)
    }
}

// ---------------------------------------------------------------------------
// Yield outcome
// ---------------------------------------------------------------------------

/// What a `yield` did to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldOutcome {
    /// First yield: the release phase was recorded, nothing else changed.
    PhaseEstablished,
    /// The next period boundary is ahead; the task sleeps until `until`.
    Sleep { until: Instant },
    /// The boundary already passed; the task stays eligible.
    Overrun,
}

// ---------------------------------------------------------------------------
// PeriodicTask
// ---------------------------------------------------------------------------

/// Scheduling record for one registered task. Owned by the
/// [`TaskRegistry`](crate::registry::TaskRegistry).
pub struct PeriodicTask {
    pub id: TaskId,
    pub params: TaskParams,
    pub state: TaskState,

    /// Last period boundary observed for this task. `None` until the first
    /// yield.
    pub previous_release: Option<Instant>,

    /// Registration serial. Timer callbacks carry the epoch they were built
    /// for and ignore entries with a different one.
    pub epoch: u64,

    /// Release timer. Absent only for records built without a timer
    /// thread (registry and state-machine tests).
    release_timer: Option<ReleaseTimer>,
}

impl PeriodicTask {
    /// A freshly registered task: `Sleeping`, no phase, no timer.
    pub fn new(id: TaskId, params: TaskParams, epoch: u64) -> Self {
        Self {
            id,
            params,
            state: TaskState::Sleeping,
            previous_release: None,
            epoch,
            release_timer: None,
        }
    }

    /// Attach the release timer that `arm_release` will drive.
    pub fn with_timer(mut self, timer: ReleaseTimer) -> Self {
        self.release_timer = Some(timer);
        self
    }

    #[inline]
    pub fn period_ms(&self) -> u64 {
        self.params.period_ms
    }

    #[inline]
    pub fn computation_ms(&self) -> u64 {
        self.params.computation_ms
    }

    /// Apply a `yield` observed at `now`.
    ///
    /// The first yield only records the phase. Afterwards each yield either
    /// puts the task to sleep until the next boundary or, if the task has
    /// overrun that boundary, leaves it eligible. `previous_release` advances
    /// by exactly one period per yield in both cases.
    ///
    /// Arming the timer is left to the caller so this stays free of side
    /// effects beyond the record itself.
    pub fn on_yield(&mut self, now: Instant) -> YieldOutcome {
        let Some(previous) = self.previous_release else {
            self.previous_release = Some(now);
            return YieldOutcome::PhaseEstablished;
        };

        let boundary = boundary_after(previous, self.params.period());
        self.previous_release = Some(boundary);

        if now < boundary {
            self.state = TaskState::Sleeping;
            YieldOutcome::Sleep { until: boundary }
        } else {
            if self.state == TaskState::Sleeping {
                self.state = TaskState::Ready;
            }
            YieldOutcome::Overrun
        }
    }

    /// Timer expiry: `Sleeping → Ready`. Returns whether a transition
    /// happened.
    pub fn release(&mut self) -> bool {
        if self.state == TaskState::Sleeping {
            self.state = TaskState::Ready;
            true
        } else {
            false
        }
    }

    /// Arm the release timer for `at`. No-op for timerless records.
    pub fn arm_release(&self, at: Instant) {
        if let Some(timer) = &self.release_timer {
            timer.arm_at(at);
        }
    }

    /// Whether the release timer is currently armed.
    pub fn release_armed(&self) -> bool {
        self.release_timer.as_ref().is_some_and(ReleaseTimer::is_armed)
    }

    /// Disarm the timer and wait for any in-flight expiry to finish.
    ///
    /// Must be called without the registry lock held: the expiry callback
    /// takes that lock.
    pub fn cancel_release(&self) {
        if let Some(timer) = &self.release_timer {
            timer.cancel_sync();
        }
    }
}

impl fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("id", &self.id)
            .field("params", &self.params)
            .field("state", &self.state)
            .field("previous_release", &self.previous_release)
            .field("epoch", &self.epoch)
            .field("release_armed", &self.release_armed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

/// `previous + period`, clamped to the furthest representable instant when
/// the period does not fit.
fn boundary_after(previous: Instant, period: Duration) -> Instant {
    let mut step = period;
    loop {
        if let Some(at) = previous.checked_add(step) {
            return at;
        }
        step /= 2;
    }
}
