//! # Host Thread Backend
//!
//! Runs managed tasks as ordinary threads of the current process. Each
//! attached thread gets a gate; `suspend` closes it, `wake` opens it, and
//! the thread checks the gate at the top of every job through
//! [`HostThread::wait_dispatched`].
//!
//! The host OS keeps scheduling these threads in its normal class, so
//! `set_priority` only records the tier. What the dispatcher does control
//! is *when* a sleeping task's next job starts.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::debug;

use super::{Priority, ThreadControl};
use crate::sync::{lock, wait, wait_timeout};
use crate::task::TaskId;

#[derive(Debug)]
struct GateState {
    runnable: bool,
    priority: Priority,
}

#[derive(Debug)]
struct Gate {
    state: Mutex<GateState>,
    condvar: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                runnable: true,
                priority: Priority::Normal,
            }),
            condvar: Condvar::new(),
        }
    }

    fn set_runnable(&self, runnable: bool) {
        let mut state = lock(&self.state);
        state.runnable = runnable;
        self.condvar.notify_all();
    }
}

/// Table of in-process threads that can be scheduled.
#[derive(Debug, Default)]
pub struct HostThreads {
    gates: Mutex<HashMap<TaskId, Arc<Gate>>>,
}

impl HostThreads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `id` resolvable and return the handle its thread waits on.
    /// Attaching an id twice replaces the previous gate.
    pub fn attach(&self, id: TaskId) -> HostThread {
        let gate = Arc::new(Gate::new());
        lock(&self.gates).insert(id, Arc::clone(&gate));
        HostThread { id, gate }
    }

    /// Forget `id`. Later `resolve` calls fail.
    pub fn detach(&self, id: TaskId) {
        if let Some(gate) = lock(&self.gates).remove(&id) {
            // Release anything still parked on it.
            gate.set_runnable(true);
        }
    }

    fn gate(&self, id: TaskId) -> Option<Arc<Gate>> {
        lock(&self.gates).get(&id).cloned()
    }
}

impl ThreadControl for HostThreads {
    fn resolve(&self, id: TaskId) -> bool {
        lock(&self.gates).contains_key(&id)
    }

    fn set_priority(&self, id: TaskId, priority: Priority) {
        if let Some(gate) = self.gate(id) {
            lock(&gate.state).priority = priority;
            debug!("task {} priority -> {:?}", id, priority);
        }
    }

    fn wake(&self, id: TaskId) {
        if let Some(gate) = self.gate(id) {
            gate.set_runnable(true);
        }
    }

    fn suspend(&self, id: TaskId) {
        if let Some(gate) = self.gate(id) {
            gate.set_runnable(false);
        }
    }

    fn prepare_dispatcher(&self) {
        debug!("host backend: dispatcher runs in the normal class");
    }
}

/// The managed thread's side of its gate.
#[derive(Debug, Clone)]
pub struct HostThread {
    id: TaskId,
    gate: Arc<Gate>,
}

impl HostThread {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Block until the dispatcher lets this thread run.
    pub fn wait_dispatched(&self) {
        let mut state = lock(&self.gate.state);
        while !state.runnable {
            state = wait(&self.gate.condvar, state);
        }
    }

    /// Like [`wait_dispatched`](Self::wait_dispatched) with a timeout.
    /// Returns whether the thread may run.
    pub fn wait_dispatched_for(&self, timeout: Duration) -> bool {
        let mut state = lock(&self.gate.state);
        if !state.runnable {
            state = wait_timeout(&self.gate.condvar, state, timeout);
        }
        state.runnable
    }

    pub fn is_runnable(&self) -> bool {
        lock(&self.gate.state).runnable
    }

    pub fn priority(&self) -> Priority {
        lock(&self.gate.state).priority
    }
}
