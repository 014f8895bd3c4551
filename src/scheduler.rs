//! # Dispatcher
//!
//! Rate-Monotonic dispatch: among the tasks eligible to run, the one with
//! the shortest period holds the CPU.
//!
//! ## Dispatch Algorithm
//!
//! The dispatcher thread sleeps on the shared [`Signal`] until a yield, an
//! unregistration or a timer expiry raises it. On each wake, with the
//! registry locked:
//! 1. **Pick a candidate**: the `Ready` task with the smallest period, first
//!    found in registry order on ties.
//! 2. **Compare with the running task**: the running task keeps the CPU
//!    unless the candidate's period is strictly shorter.
//! 3. **Switch**: demote the previous task to `Priority::Normal` (and back to
//!    `Ready` if it was still `Running`), promote the candidate to
//!    `Priority::RealTime`, mark it `Running` and wake it.
//! 4. **Idle** when nothing is eligible. A previous task that has gone to
//!    sleep is demoted and forgotten.
//!
//! Because the whole step runs under the registry lock, a promotion always
//! sees the registry as of this wake.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, trace};

use crate::arch::{Priority, ThreadControl};
use crate::config::DISPATCHER_THREAD_NAME;
use crate::registry::TaskRegistry;
use crate::sync::{lock, Signal};
use crate::task::{PeriodicTask, TaskId, TaskState};

// ---------------------------------------------------------------------------
// Shared scheduler state
// ---------------------------------------------------------------------------

/// State shared by the kernel API, the release timers and the dispatcher.
/// The registry mutex is the only lock guarding scheduling data.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub registry: Mutex<TaskRegistry>,
    pub wakeup: Signal,
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Highest-RM-priority `Ready` task: smallest period, first found on ties.
pub fn select_next(registry: &TaskRegistry) -> Option<&PeriodicTask> {
    registry.for_each_ready().fold(None, |best: Option<&PeriodicTask>, task| match best {
        Some(b) if b.period_ms() <= task.period_ms() => Some(b),
        _ => Some(task),
    })
}

/// Outcome of one dispatch step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing eligible.
    Idle,
    /// The running task keeps the CPU.
    Keep(TaskId),
    /// The CPU moves to `to`. `from` is the task that was dispatched before,
    /// if it is still registered.
    Switch { from: Option<TaskId>, to: TaskId },
}

/// Dispatcher-private bookkeeping: which task was last promoted.
#[derive(Debug)]
pub struct DispatchState {
    current: Option<TaskId>,
    realtime_level: u8,
}

impl DispatchState {
    pub fn new(realtime_level: u8) -> Self {
        Self {
            current: None,
            realtime_level,
        }
    }

    /// Task last promoted by this dispatcher, if any.
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    /// Run one dispatch decision against a locked registry.
    pub fn step(&mut self, registry: &mut TaskRegistry, control: &dyn ThreadControl) -> Decision {
        let running = registry
            .iter()
            .find(|t| t.state == TaskState::Running)
            .map(|t| (t.id, t.period_ms()));
        let candidate = select_next(registry).map(|t| (t.id, t.period_ms()));

        let Some((next, next_period)) = candidate else {
            return match running {
                Some((id, _)) => {
                    self.current = Some(id);
                    Decision::Keep(id)
                }
                None => {
                    if let Some(prev) = self.current.take() {
                        demote(registry, control, prev);
                    }
                    Decision::Idle
                }
            };
        };

        if let Some((id, period)) = running {
            if period <= next_period {
                self.current = Some(id);
                return Decision::Keep(id);
            }
        }

        let from = self.current.take().filter(|&prev| demote(registry, control, prev));
        if let Some((id, _)) = running {
            if from != Some(id) {
                demote(registry, control, id);
            }
        }

        if let Ok(task) = registry.find_mut(next) {
            task.state = TaskState::Running;
        }
        control.set_priority(next, Priority::RealTime(self.realtime_level));
        control.wake(next);
        self.current = Some(next);

        Decision::Switch { from, to: next }
    }
}

/// Drop `id` to the normal tier, turning `Running` back into `Ready`.
/// Returns whether `id` is still registered.
fn demote(registry: &mut TaskRegistry, control: &dyn ThreadControl, id: TaskId) -> bool {
    let Ok(task) = registry.find_mut(id) else {
        return false;
    };
    if task.state == TaskState::Running {
        task.state = TaskState::Ready;
    }
    control.set_priority(id, Priority::Normal);
    true
}

// ---------------------------------------------------------------------------
// Dispatcher thread
// ---------------------------------------------------------------------------

/// Handle to the running dispatcher thread. Dropping it stops the thread.
pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn(
        shared: Arc<Shared>,
        control: Arc<dyn ThreadControl>,
        realtime_level: u8,
    ) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(DISPATCHER_THREAD_NAME.into())
                .spawn(move || run(&shared, control.as_ref(), &stop, realtime_level))?
        };
        Ok(Self {
            shared,
            stop,
            handle: Some(handle),
        })
    }

    /// Set the stop flag, wake the loop one last time and join it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.shared.wakeup.raise();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: &Shared, control: &dyn ThreadControl, stop: &AtomicBool, realtime_level: u8) {
    control.prepare_dispatcher();
    let mut state = DispatchState::new(realtime_level);
    debug!("dispatcher started");

    loop {
        shared.wakeup.wait();
        if stop.load(Ordering::Acquire) {
            break;
        }

        let decision = {
            let mut registry = lock(&shared.registry);
            state.step(&mut registry, control)
        };

        match decision {
            Decision::Switch { from, to } => debug!("dispatch: {:?} -> {}", from, to),
            Decision::Keep(id) => trace!("dispatch: keep {}", id),
            Decision::Idle => trace!("dispatch: idle"),
        }
    }

    debug!("dispatcher stopped");
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::recording::{ControlCall, RecordingControl};
    use crate::task::TaskParams;
    use proptest::prelude::*;

    const RT: Priority = Priority::RealTime(99);

    fn registry_with(periods: &[(u32, u64)]) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        for &(id, period) in periods {
            registry
                .insert(PeriodicTask::new(TaskId(id), TaskParams::new(period, 1).unwrap(), 0))
                .unwrap();
        }
        registry
    }

    fn set(registry: &mut TaskRegistry, id: u32, state: TaskState) {
        registry.find_mut(TaskId(id)).unwrap().state = state;
    }

    fn state_of(registry: &TaskRegistry, id: u32) -> TaskState {
        registry.find(TaskId(id)).unwrap().state
    }

    #[test]
    fn test_select_prefers_shorter_period() {
        let mut registry = registry_with(&[(1, 200), (2, 100)]);
        set(&mut registry, 1, TaskState::Ready);
        set(&mut registry, 2, TaskState::Ready);
        assert_eq!(select_next(&registry).unwrap().id, TaskId(2));
    }

    #[test]
    fn test_select_ties_go_to_first_registered() {
        let mut registry = registry_with(&[(1, 300), (2, 100), (3, 100)]);
        for id in 1..=3 {
            set(&mut registry, id, TaskState::Ready);
        }
        assert_eq!(select_next(&registry).unwrap().id, TaskId(2));
    }

    #[test]
    fn test_select_ignores_sleeping_and_running() {
        let mut registry = registry_with(&[(1, 10), (2, 20), (3, 30)]);
        set(&mut registry, 2, TaskState::Running);
        set(&mut registry, 3, TaskState::Ready);
        assert_eq!(select_next(&registry).unwrap().id, TaskId(3));
    }

    #[test]
    fn test_idle_when_nothing_ready() {
        let mut registry = registry_with(&[(1, 100)]);
        let control = RecordingControl::permissive();
        let mut state = DispatchState::new(99);

        assert_eq!(state.step(&mut registry, &control), Decision::Idle);
        assert!(control.calls().is_empty());
    }

    #[test]
    fn test_first_dispatch_promotes_and_wakes() {
        let mut registry = registry_with(&[(1, 200), (2, 100)]);
        set(&mut registry, 1, TaskState::Ready);
        set(&mut registry, 2, TaskState::Ready);
        let control = RecordingControl::permissive();
        let mut state = DispatchState::new(99);

        let decision = state.step(&mut registry, &control);
        assert_eq!(decision, Decision::Switch { from: None, to: TaskId(2) });
        assert_eq!(state_of(&registry, 2), TaskState::Running);
        assert_eq!(state_of(&registry, 1), TaskState::Ready);
        assert_eq!(
            control.calls(),
            vec![
                ControlCall::SetPriority(TaskId(2), RT),
                ControlCall::Wake(TaskId(2)),
            ]
        );
    }

    #[test]
    fn test_shorter_period_preempts_running_task() {
        let mut registry = registry_with(&[(1, 200), (2, 100)]);
        set(&mut registry, 1, TaskState::Ready);
        let control = RecordingControl::permissive();
        let mut state = DispatchState::new(99);
        state.step(&mut registry, &control);
        control.take_calls();

        set(&mut registry, 2, TaskState::Ready);
        let decision = state.step(&mut registry, &control);
        assert_eq!(decision, Decision::Switch { from: Some(TaskId(1)), to: TaskId(2) });
        assert_eq!(state_of(&registry, 1), TaskState::Ready);
        assert_eq!(state_of(&registry, 2), TaskState::Running);
        assert_eq!(control.priority_of(TaskId(1)), Some(Priority::Normal));
        assert_eq!(control.priority_of(TaskId(2)), Some(RT));
    }

    #[test]
    fn test_longer_period_does_not_preempt() {
        let mut registry = registry_with(&[(1, 100), (2, 200)]);
        set(&mut registry, 1, TaskState::Ready);
        let control = RecordingControl::permissive();
        let mut state = DispatchState::new(99);
        state.step(&mut registry, &control);
        control.take_calls();

        set(&mut registry, 2, TaskState::Ready);
        assert_eq!(state.step(&mut registry, &control), Decision::Keep(TaskId(1)));
        assert!(control.calls().is_empty());
        assert_eq!(state_of(&registry, 2), TaskState::Ready);
    }

    #[test]
    fn test_sleeping_previous_is_not_marked_ready() {
        let mut registry = registry_with(&[(1, 100), (2, 200)]);
        set(&mut registry, 1, TaskState::Ready);
        let control = RecordingControl::permissive();
        let mut state = DispatchState::new(99);
        state.step(&mut registry, &control);

        // Task 1 yields and sleeps; task 2 is released.
        set(&mut registry, 1, TaskState::Sleeping);
        set(&mut registry, 2, TaskState::Ready);
        let decision = state.step(&mut registry, &control);

        assert_eq!(decision, Decision::Switch { from: Some(TaskId(1)), to: TaskId(2) });
        assert_eq!(state_of(&registry, 1), TaskState::Sleeping);
        assert_eq!(control.priority_of(TaskId(1)), Some(Priority::Normal));
    }

    #[test]
    fn test_sleeping_previous_is_forgotten_when_idle() {
        let mut registry = registry_with(&[(1, 100)]);
        set(&mut registry, 1, TaskState::Ready);
        let control = RecordingControl::permissive();
        let mut state = DispatchState::new(99);
        state.step(&mut registry, &control);

        set(&mut registry, 1, TaskState::Sleeping);
        assert_eq!(state.step(&mut registry, &control), Decision::Idle);
        assert_eq!(state.current(), None);
        assert_eq!(control.priority_of(TaskId(1)), Some(Priority::Normal));
    }

    #[test]
    fn test_unregistered_previous_is_skipped() {
        let mut registry = registry_with(&[(1, 100), (2, 200)]);
        set(&mut registry, 1, TaskState::Ready);
        let control = RecordingControl::permissive();
        let mut state = DispatchState::new(99);
        state.step(&mut registry, &control);
        control.take_calls();

        registry.remove(TaskId(1)).unwrap();
        set(&mut registry, 2, TaskState::Ready);
        let decision = state.step(&mut registry, &control);
        assert_eq!(decision, Decision::Switch { from: None, to: TaskId(2) });
        assert!(!control
            .calls()
            .contains(&ControlCall::SetPriority(TaskId(1), Priority::Normal)));
    }

    #[derive(Debug, Clone)]
    enum Event {
        Release(usize),
        Sleep(usize),
        Remove(usize),
        Dispatch,
    }

    fn event() -> impl Strategy<Value = Event> {
        prop_oneof![
            (0usize..6).prop_map(Event::Release),
            (0usize..6).prop_map(Event::Sleep),
            (0usize..6).prop_map(Event::Remove),
            Just(Event::Dispatch),
        ]
    }

    proptest! {
        #[test]
        fn prop_single_runner_with_rm_order(
            periods in proptest::collection::vec(1u64..500, 6),
            events in proptest::collection::vec(event(), 1..80),
        ) {
            let mut registry = TaskRegistry::new();
            for (i, &p) in periods.iter().enumerate() {
                registry
                    .insert(PeriodicTask::new(TaskId(i as u32), TaskParams::new(p, 1).unwrap(), 0))
                    .unwrap();
            }
            let control = RecordingControl::permissive();
            let mut state = DispatchState::new(99);

            for ev in events {
                match ev {
                    Event::Release(i) => {
                        if let Ok(t) = registry.find_mut(TaskId(i as u32)) {
                            t.release();
                        }
                    }
                    Event::Sleep(i) => {
                        if let Ok(t) = registry.find_mut(TaskId(i as u32)) {
                            t.state = TaskState::Sleeping;
                        }
                    }
                    Event::Remove(i) => {
                        let _ = registry.remove(TaskId(i as u32));
                    }
                    Event::Dispatch => {
                        state.step(&mut registry, &control);
                        let min_eligible = registry
                            .iter()
                            .filter(|t| t.state.is_eligible())
                            .map(|t| t.period_ms())
                            .min();
                        let running = registry.iter().find(|t| t.state == TaskState::Running);
                        match (min_eligible, running) {
                            (Some(min), Some(r)) => prop_assert_eq!(r.period_ms(), min),
                            (None, None) => {}
                            (a, b) => prop_assert!(false, "eligible {:?} running {:?}", a, b),
                        }
                    }
                }
                prop_assert!(registry.running_count() <= 1);
            }
        }
    }
}
