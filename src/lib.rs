//! # rmsched: Rate-Monotonic Scheduler
//!
//! A fixed-priority scheduler for periodic threads. Each thread registers a
//! `(period, computation)` contract; the scheduler admits it only if the
//! task set stays under the Rate-Monotonic utilization bound, then decides
//! at runtime which registered thread holds the CPU: always the eligible
//! one with the shortest period.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │              Periodic application threads               │
//! ├────────────────────────────────────────────────────────┤
//! │        Control Plane (control.rs)   R / D / Y / status  │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │      start() · register() · yield_task() · unregister() │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Dispatcher  │   Admission        │  Release Timers   │
//! │  scheduler.rs│   admission.rs     │  timer.rs         │
//! │  ─ step()    │   ─ should_admit() │  ─ arm_at()       │
//! │  ─ run loop  │   ─ utilization    │  ─ cancel_sync()  │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │        Task Registry (registry.rs) · Task (task.rs)     │
//! │             one Mutex · Signal (sync.rs)                │
//! ├────────────────────────────────────────────────────────┤
//! │           Thread Control (arch/), injected              │
//! │     resolve · set_priority · wake · suspend             │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Task Lifecycle
//!
//! 1. `register` runs admission, resolves the thread and inserts the task
//!    as `Sleeping`.
//! 2. The first `yield` records the release phase; the first job runs
//!    unmanaged.
//! 3. Each later `yield` either sleeps the task until its next period
//!    boundary (arming its release timer) or, after an overrun, leaves it
//!    eligible.
//! 4. Timer expiry makes the task `Ready` and wakes the dispatcher, which
//!    promotes the shortest-period eligible task to real-time priority.
//! 5. `unregister` cancels the timer synchronously and removes the task.
//!
//! ## Admission
//!
//! `Σ Cᵢ·1000/Tᵢ ≤ 693`, i.e. the Liu-and-Layland bound `ln 2` in integer
//! thousandths. Checked once per registration; a task that later overruns
//! its declared computation time is not re-examined.
//!
//! ## Concurrency Model
//!
//! - **One lock**: the registry mutex serializes the dispatcher, timers and
//!   API callers.
//! - **Two halves**: timer callbacks only flip state and raise the
//!   dispatcher's signal.
//! - **No globals**: every [`Kernel`](kernel::Kernel) owns its own state.

pub mod admission;
pub mod arch;
pub mod config;
pub mod control;
pub mod error;
pub mod kernel;
pub mod registry;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod timer;

pub use arch::{Priority, ThreadControl};
pub use config::SchedulerConfig;
pub use error::SchedError;
pub use kernel::{Kernel, TaskInfo};
pub use task::{TaskId, TaskState, YieldOutcome};
