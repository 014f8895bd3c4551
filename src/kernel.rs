//! # Kernel
//!
//! Owned scheduler instance and its public API.
//!
//! A [`Kernel`] bundles the task registry, the dispatcher thread and the
//! thread-control backend. It replaces a process-wide scheduler singleton:
//! any number of kernels can run side by side, each with its own registry.
//!
//! ## Lifecycle
//!
//! ```text
//! Kernel::start(config, control)
//!   ├─► spawn dispatcher thread
//!   ├─► register(id, period, computation)   ← admission + timer
//!   ├─► yield_task(id)                      ← phase / sleep / overrun
//!   ├─► unregister(id)                      ← cancel timer, remove
//!   └─► shutdown() / drop                   ← stop dispatcher, destroy all
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use log::{debug, info, trace, warn};

use crate::admission;
use crate::arch::{Priority, ThreadControl};
use crate::config::{SchedulerConfig, TIMER_THREAD_PREFIX};
use crate::error::SchedError;
use crate::scheduler::{Dispatcher, Shared};
use crate::sync::lock;
use crate::task::{PeriodicTask, TaskId, TaskParams, TaskState, YieldOutcome};
use crate::timer::ReleaseTimer;

/// Point-in-time view of one registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub period_ms: u64,
    pub computation_ms: u64,
    pub state: TaskState,
    pub release_armed: bool,
}

/// A running Rate-Monotonic scheduler.
pub struct Kernel {
    shared: Arc<Shared>,
    control: Arc<dyn ThreadControl>,
    config: SchedulerConfig,
    next_epoch: AtomicU64,
    dispatcher: Option<Dispatcher>,
}

impl Kernel {
    /// Start a scheduler with an empty registry.
    ///
    /// # Errors
    /// `Spawn` if the dispatcher thread cannot be created.
    pub fn start(
        config: SchedulerConfig,
        control: Arc<dyn ThreadControl>,
    ) -> Result<Self, SchedError> {
        let shared = Arc::new(Shared::default());
        let dispatcher =
            Dispatcher::spawn(Arc::clone(&shared), Arc::clone(&control), config.realtime_level)?;

        info!(
            "rate-monotonic scheduler started (bound {}/1000, rt level {})",
            config.admission_bound_milli, config.realtime_level
        );

        Ok(Self {
            shared,
            control,
            config,
            next_epoch: AtomicU64::new(1),
            dispatcher: Some(dispatcher),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Admit a periodic task.
    ///
    /// Duplicate check, admission test, thread resolution and insertion all
    /// happen in one critical section, so a failure leaves the registry
    /// untouched and two concurrent registrations cannot both squeeze under
    /// the bound.
    ///
    /// # Errors
    /// `InvalidContract`, `DuplicateRegistration`, `AdmissionRejected`,
    /// `UnknownIdentifier` (thread did not resolve), `Spawn` (timer thread),
    /// `OutOfMemory`.
    pub fn register(
        &self,
        id: TaskId,
        period_ms: u64,
        computation_ms: u64,
    ) -> Result<(), SchedError> {
        let params = TaskParams::new(period_ms, computation_ms)?;
        let mut registry = lock(&self.shared.registry);

        if registry.contains(id) {
            warn!("register {}: already registered", id);
            return Err(SchedError::DuplicateRegistration(id));
        }

        let utilization = admission::utilization_with(&params, &registry);
        if !admission::should_admit(&params, &registry, self.config.admission_bound_milli) {
            warn!(
                "register {}: rejected, utilization would be {}/1000",
                id, utilization
            );
            return Err(SchedError::AdmissionRejected { id, utilization });
        }

        if !self.control.resolve(id) {
            warn!("register {}: no thread with this id", id);
            return Err(SchedError::UnknownIdentifier(id));
        }

        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let timer = ReleaseTimer::spawn(
            format!("{TIMER_THREAD_PREFIX}{id}"),
            expiry_handler(Arc::downgrade(&self.shared), id, epoch),
        )?;
        registry.insert(PeriodicTask::new(id, params, epoch).with_timer(timer))?;

        info!(
            "registered task {} (period {} ms, computation {} ms, utilization {}/1000)",
            id, period_ms, computation_ms, utilization
        );
        Ok(())
    }

    /// Remove a task from any state.
    ///
    /// The record is taken out and its thread demoted under the lock, so a
    /// later registration of the same id never sees the demotion. The timer
    /// is then cancelled synchronously with the lock released, so an
    /// in-flight expiry can finish (and find nothing) before the record is
    /// freed.
    pub fn unregister(&self, id: TaskId) -> Result<(), SchedError> {
        let task = {
            let mut registry = lock(&self.shared.registry);
            let task = registry.remove(id).map_err(|err| {
                warn!("unregister {}: not registered", id);
                err
            })?;
            self.control.set_priority(id, Priority::Normal);
            task
        };

        task.cancel_release();
        drop(task);

        self.shared.wakeup.raise();
        info!("unregistered task {}", id);
        Ok(())
    }

    /// Announce the end of the calling task's current job.
    pub fn yield_task(&self, id: TaskId) -> Result<YieldOutcome, SchedError> {
        self.yield_at(id, Instant::now())
    }

    pub(crate) fn yield_at(&self, id: TaskId, now: Instant) -> Result<YieldOutcome, SchedError> {
        let outcome = {
            let mut registry = lock(&self.shared.registry);
            let task = registry.find_mut(id).map_err(|err| {
                warn!("yield {}: not registered", id);
                err
            })?;

            let outcome = task.on_yield(now);
            if let YieldOutcome::Sleep { until } = outcome {
                task.arm_release(until);
                self.control.suspend(id);
            }
            outcome
        };

        match outcome {
            YieldOutcome::PhaseEstablished => debug!("task {} established its phase", id),
            YieldOutcome::Sleep { until } => {
                trace!("task {} sleeps for {:?}", id, until.saturating_duration_since(now))
            }
            YieldOutcome::Overrun => debug!("task {} overran its period", id),
        }

        self.shared.wakeup.raise();
        Ok(outcome)
    }

    /// Snapshot of every registered task in registry order.
    pub fn snapshot(&self) -> Vec<TaskInfo> {
        let registry = lock(&self.shared.registry);
        registry
            .iter()
            .map(|t| TaskInfo {
                id: t.id,
                period_ms: t.period_ms(),
                computation_ms: t.computation_ms(),
                state: t.state,
                release_armed: t.release_armed(),
            })
            .collect()
    }

    /// Snapshot of one task.
    pub fn task(&self, id: TaskId) -> Result<TaskInfo, SchedError> {
        self.snapshot()
            .into_iter()
            .find(|t| t.id == id)
            .ok_or(SchedError::UnknownIdentifier(id))
    }

    pub fn is_registered(&self, id: TaskId) -> bool {
        lock(&self.shared.registry).contains(id)
    }

    /// Scaled utilization of the admitted task set.
    pub fn utilization_milli(&self) -> u64 {
        admission::utilization_milli(&lock(&self.shared.registry))
    }

    /// Stop the dispatcher and destroy every task through the unregister
    /// path. Also run on drop.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(mut dispatcher) = self.dispatcher.take() else {
            return;
        };
        dispatcher.stop();

        let tasks = {
            let mut registry = lock(&self.shared.registry);
            let tasks = registry.drain();
            for task in &tasks {
                self.control.set_priority(task.id, Priority::Normal);
            }
            tasks
        };
        for task in tasks {
            info!("destroying task {}", task.id);
            task.cancel_release();
        }
        info!("rate-monotonic scheduler stopped");
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Build the expiry callback for the task registered as `(id, epoch)`.
///
/// Holds only a weak reference so a timer never keeps a dropped kernel's
/// state alive.
fn expiry_handler(shared: Weak<Shared>, id: TaskId, epoch: u64) -> Box<dyn Fn() + Send> {
    Box::new(move || {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let released = {
            let mut registry = lock(&shared.registry);
            match registry.find_mut(id) {
                Ok(task) if task.epoch == epoch => task.release(),
                _ => false,
            }
        };
        if released {
            trace!("task {} released", id);
            shared.wakeup.raise();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::recording::{ControlCall, RecordingControl};
    use std::sync::{Mutex, OnceLock};
    use std::thread;
    use std::time::Duration;

    /// Records, for every demotion, whether the registry lock was held.
    #[derive(Default)]
    struct LockProbingControl {
        shared: OnceLock<Weak<Shared>>,
        demotions: Mutex<Vec<(TaskId, bool)>>,
    }

    impl ThreadControl for LockProbingControl {
        fn resolve(&self, _id: TaskId) -> bool {
            true
        }

        fn set_priority(&self, id: TaskId, priority: Priority) {
            if priority != Priority::Normal {
                return;
            }
            let held = match self.shared.get().and_then(Weak::upgrade) {
                Some(shared) => {
                    let attempt = shared.registry.try_lock();
                    attempt.is_err()
                }
                None => false,
            };
            lock(&self.demotions).push((id, held));
        }

        fn wake(&self, _id: TaskId) {}

        fn suspend(&self, _id: TaskId) {}
    }

    fn start() -> (Kernel, Arc<RecordingControl>) {
        let control = Arc::new(RecordingControl::permissive());
        let kernel = Kernel::start(SchedulerConfig::default(), control.clone()).unwrap();
        (kernel, control)
    }

    fn wait_for_state(kernel: &Kernel, id: TaskId, wanted: &[TaskState], within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if kernel.task(id).map(|t| wanted.contains(&t.state)).unwrap_or(false) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_admission_scenario() {
        let (kernel, _) = start();

        kernel.register(TaskId(1), 100, 20).unwrap();
        assert_eq!(kernel.utilization_milli(), 200);

        let err = kernel.register(TaskId(2), 150, 80).unwrap_err();
        assert!(matches!(
            err,
            SchedError::AdmissionRejected { id: TaskId(2), utilization: 733 }
        ));
        assert!(!kernel.is_registered(TaskId(2)));

        kernel.unregister(TaskId(1)).unwrap();
        assert!(kernel.snapshot().is_empty());
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let (kernel, _) = start();
        kernel.register(TaskId(5), 100, 10).unwrap();

        let err = kernel.register(TaskId(5), 200, 10).unwrap_err();
        assert!(matches!(err, SchedError::DuplicateRegistration(TaskId(5))));

        let snapshot = kernel.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].period_ms, 100);
    }

    #[test]
    fn test_unresolved_thread_is_rejected() {
        let control = Arc::new(RecordingControl::with_known([TaskId(1)]));
        let kernel = Kernel::start(SchedulerConfig::default(), control).unwrap();

        let err = kernel.register(TaskId(2), 100, 10).unwrap_err();
        assert!(matches!(err, SchedError::UnknownIdentifier(TaskId(2))));
        assert!(kernel.snapshot().is_empty());
    }

    #[test]
    fn test_invalid_contract_is_rejected() {
        let (kernel, _) = start();
        assert!(matches!(
            kernel.register(TaskId(1), 10, 20),
            Err(SchedError::InvalidContract { .. })
        ));
        assert!(kernel.register(TaskId(1), 0, 0).is_err());
    }

    #[test]
    fn test_unknown_yield_and_unregister_fail() {
        let (kernel, _) = start();
        assert!(matches!(
            kernel.yield_task(TaskId(9)),
            Err(SchedError::UnknownIdentifier(TaskId(9)))
        ));
        assert!(kernel.unregister(TaskId(9)).is_err());
    }

    #[test]
    fn test_second_quick_yield_sleeps_until_release() {
        let (kernel, control) = start();
        let id = TaskId(3);
        kernel.register(id, 50, 10).unwrap();

        assert_eq!(kernel.yield_task(id).unwrap(), YieldOutcome::PhaseEstablished);
        assert!(matches!(kernel.yield_task(id).unwrap(), YieldOutcome::Sleep { .. }));

        let info = kernel.task(id).unwrap();
        assert_eq!(info.state, TaskState::Sleeping);
        assert!(info.release_armed);
        assert!(control.calls().contains(&ControlCall::Suspend(id)));

        // Released at the boundary, then dispatched.
        assert!(wait_for_state(
            &kernel,
            id,
            &[TaskState::Running],
            Duration::from_millis(500)
        ));
        assert_eq!(control.priority_of(id), Some(Priority::RealTime(99)));
        assert!(control.calls().contains(&ControlCall::Wake(id)));
        assert!(!kernel.task(id).unwrap().release_armed);
    }

    #[test]
    fn test_not_ready_before_boundary() {
        let (kernel, _) = start();
        let id = TaskId(4);
        kernel.register(id, 400, 10).unwrap();

        let t0 = Instant::now();
        kernel.yield_at(id, t0).unwrap();
        kernel.yield_at(id, t0 + Duration::from_millis(1)).unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(kernel.task(id).unwrap().state, TaskState::Sleeping);
    }

    #[test]
    fn test_overrun_yield_arms_nothing() {
        let (kernel, _) = start();
        let id = TaskId(6);
        kernel.register(id, 20, 5).unwrap();

        let t0 = Instant::now() - Duration::from_millis(100);
        kernel.yield_at(id, t0).unwrap();
        assert_eq!(kernel.yield_task(id).unwrap(), YieldOutcome::Overrun);
        assert!(!kernel.task(id).unwrap().release_armed);
        assert!(wait_for_state(
            &kernel,
            id,
            &[TaskState::Running],
            Duration::from_millis(500)
        ));
    }

    #[test]
    fn test_rm_priority_between_two_tasks() {
        let (kernel, _) = start();
        kernel.register(TaskId(20), 200, 20).unwrap();
        kernel.register(TaskId(10), 100, 20).unwrap();

        // Phase both so they are released at base + 200ms.
        let base = Instant::now();
        let later = base + Duration::from_millis(100);
        kernel.yield_at(TaskId(20), base).unwrap();
        kernel.yield_at(TaskId(20), later).unwrap();
        kernel.yield_at(TaskId(10), later).unwrap();
        kernel.yield_at(TaskId(10), later).unwrap();

        assert!(wait_for_state(
            &kernel,
            TaskId(20),
            &[TaskState::Ready],
            Duration::from_millis(1000)
        ));
        assert!(wait_for_state(
            &kernel,
            TaskId(10),
            &[TaskState::Running],
            Duration::from_millis(1000)
        ));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(kernel.task(TaskId(10)).unwrap().state, TaskState::Running);
        assert_eq!(kernel.task(TaskId(20)).unwrap().state, TaskState::Ready);
    }

    #[test]
    fn test_unregister_cancels_pending_release() {
        let (kernel, control) = start();
        let id = TaskId(7);
        kernel.register(id, 60, 10).unwrap();
        kernel.yield_task(id).unwrap();
        kernel.yield_task(id).unwrap();
        kernel.unregister(id).unwrap();
        control.take_calls();

        thread::sleep(Duration::from_millis(150));
        assert!(!kernel.is_registered(id));
        assert!(!control.calls().contains(&ControlCall::Wake(id)));
    }

    #[test]
    fn test_reregistration_after_unregister() {
        let (kernel, _) = start();
        kernel.register(TaskId(8), 100, 50).unwrap();
        kernel.unregister(TaskId(8)).unwrap();
        kernel.register(TaskId(8), 100, 50).unwrap();
        assert_eq!(kernel.task(TaskId(8)).unwrap().state, TaskState::Sleeping);
    }

    #[test]
    fn test_stale_expiry_ignores_new_registration() {
        let shared = Arc::new(Shared::default());
        let id = TaskId(8);
        let stale = expiry_handler(Arc::downgrade(&shared), id, 1);
        lock(&shared.registry)
            .insert(PeriodicTask::new(id, TaskParams::new(100, 10).unwrap(), 2))
            .unwrap();

        stale();
        assert_eq!(lock(&shared.registry).find(id).unwrap().state, TaskState::Sleeping);
        assert!(!shared.wakeup.wait_for(Duration::from_millis(20)));

        let current = expiry_handler(Arc::downgrade(&shared), id, 2);
        current();
        assert_eq!(lock(&shared.registry).find(id).unwrap().state, TaskState::Ready);
        assert!(shared.wakeup.wait_for(Duration::from_millis(20)));
    }

    #[test]
    fn test_stale_expiry_after_reregistration_through_kernel() {
        let (kernel, control) = start();
        let id = TaskId(8);
        kernel.register(id, 100, 10).unwrap();
        let old_epoch = lock(&kernel.shared.registry).find(id).unwrap().epoch;
        let stale = expiry_handler(Arc::downgrade(&kernel.shared), id, old_epoch);

        kernel.unregister(id).unwrap();
        kernel.register(id, 100, 10).unwrap();
        control.take_calls();

        stale();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(kernel.task(id).unwrap().state, TaskState::Sleeping);
        assert!(!control.calls().contains(&ControlCall::Wake(id)));
    }

    #[test]
    fn test_unregister_demotes_under_registry_lock() {
        let control = Arc::new(LockProbingControl::default());
        let kernel = Kernel::start(SchedulerConfig::default(), control.clone()).unwrap();
        let _ = control.shared.set(Arc::downgrade(&kernel.shared));

        kernel.register(TaskId(1), 100, 10).unwrap();
        kernel.register(TaskId(2), 200, 10).unwrap();
        kernel.unregister(TaskId(1)).unwrap();
        assert_eq!(*lock(&control.demotions), vec![(TaskId(1), true)]);

        kernel.shutdown();
        assert_eq!(
            *lock(&control.demotions),
            vec![(TaskId(1), true), (TaskId(2), true)]
        );
    }

    #[test]
    fn test_huge_contract_rejected_without_overflow() {
        let (kernel, _) = start();
        let err = kernel.register(TaskId(1), u64::MAX, u64::MAX).unwrap_err();
        assert!(matches!(
            err,
            SchedError::AdmissionRejected { utilization: 1000, .. }
        ));

        kernel.register(TaskId(2), 100, 60).unwrap();
        assert!(kernel.register(TaskId(3), u64::MAX, u64::MAX / 2).is_err());
        assert_eq!(kernel.utilization_milli(), 600);
    }

    #[test]
    fn test_shutdown_destroys_all_tasks() {
        let (kernel, control) = start();
        kernel.register(TaskId(1), 100, 10).unwrap();
        kernel.register(TaskId(2), 200, 10).unwrap();
        kernel.yield_task(TaskId(1)).unwrap();
        kernel.yield_task(TaskId(1)).unwrap();

        kernel.shutdown();
        assert_eq!(control.priority_of(TaskId(1)), Some(Priority::Normal));
        assert_eq!(control.priority_of(TaskId(2)), Some(Priority::Normal));
    }

    #[test]
    fn test_independent_kernels() {
        let (a, _) = start();
        let (b, _) = start();
        a.register(TaskId(1), 100, 60).unwrap();
        b.register(TaskId(1), 100, 60).unwrap();
        assert!(a.register(TaskId(2), 100, 60).is_err());
        assert_eq!(b.utilization_milli(), 600);
    }
}
