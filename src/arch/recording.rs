//! Recording backend.
//!
//! Accepts a configured set of ids (or every id) and appends each call to
//! an in-memory log. Used by the unit tests and by `rmsched serve`, where
//! there are no real threads behind the ids.

use std::collections::HashSet;
use std::sync::Mutex;

use log::info;

use super::{Priority, ThreadControl};
use crate::sync::lock;
use crate::task::TaskId;

/// One recorded capability call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCall {
    SetPriority(TaskId, Priority),
    Wake(TaskId),
    Suspend(TaskId),
}

#[derive(Debug, Default)]
pub struct RecordingControl {
    /// `None` resolves every id.
    known: Option<Mutex<HashSet<TaskId>>>,
    calls: Mutex<Vec<ControlCall>>,
    verbose: bool,
}

impl RecordingControl {
    /// Resolve every id.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Resolve only the given ids.
    pub fn with_known(ids: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            known: Some(Mutex::new(ids.into_iter().collect())),
            ..Self::default()
        }
    }

    /// Also log every call at `info`.
    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    /// Snapshot of all calls so far.
    pub fn calls(&self) -> Vec<ControlCall> {
        lock(&self.calls).clone()
    }

    /// Return and clear the call log.
    pub fn take_calls(&self) -> Vec<ControlCall> {
        std::mem::take(&mut *lock(&self.calls))
    }

    /// Last priority set for `id`, if any.
    pub fn priority_of(&self, id: TaskId) -> Option<Priority> {
        lock(&self.calls).iter().rev().find_map(|call| match *call {
            ControlCall::SetPriority(target, priority) if target == id => Some(priority),
            _ => None,
        })
    }

    fn record(&self, call: ControlCall) {
        if self.verbose {
            info!("thread control: {:?}", call);
        }
        lock(&self.calls).push(call);
    }
}

impl ThreadControl for RecordingControl {
    fn resolve(&self, id: TaskId) -> bool {
        match &self.known {
            None => true,
            Some(known) => lock(known).contains(&id),
        }
    }

    fn set_priority(&self, id: TaskId, priority: Priority) {
        self.record(ControlCall::SetPriority(id, priority));
    }

    fn wake(&self, id: TaskId) {
        self.record(ControlCall::Wake(id));
    }

    fn suspend(&self, id: TaskId) {
        self.record(ControlCall::Suspend(id));
    }
}
