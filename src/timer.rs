//! # Release Timer
//!
//! One-shot, re-armable, cancelable timer backing each registered task's
//! period release. Each timer owns a small thread that sleeps until the
//! armed deadline and then runs the expiry callback.
//!
//! ## Two halves
//!
//! The callback is the "top half": it must only flip the task to `Ready`
//! under the registry lock and raise the dispatcher's signal. Everything
//! else happens on the dispatcher thread.
//!
//! ## Lock order
//!
//! The timer thread drops its own lock before running the callback, so the
//! callback may take the registry lock while another thread holding the
//! registry lock arms this timer. [`ReleaseTimer::cancel_sync`] waits for an
//! in-flight callback and therefore must not be called with the registry
//! lock held.

use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::trace;

use crate::sync::{lock, wait, wait_timeout};

/// Expiry callback. Runs on the timer thread with no timer lock held.
pub type ExpiryFn = Box<dyn Fn() + Send + 'static>;

#[derive(Debug, Default)]
struct TimerState {
    deadline: Option<Instant>,
    firing: bool,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    condvar: Condvar,
}

/// A cancelable one-shot timer. Dropping it stops and joins its thread.
pub struct ReleaseTimer {
    shared: Arc<TimerShared>,
    handle: Option<JoinHandle<()>>,
}

impl ReleaseTimer {
    /// Spawn the timer thread, initially disarmed.
    pub fn spawn(name: String, on_expiry: ExpiryFn) -> io::Result<Self> {
        let shared = Arc::new(TimerShared::default());
        let handle = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(name)
                .spawn(move || run(&shared, on_expiry))?
        };
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Arm (or re-arm) the timer to fire at `deadline`. A deadline in the
    /// past fires immediately. Never blocks on the callback.
    pub fn arm_at(&self, deadline: Instant) {
        let mut state = lock(&self.shared.state);
        state.deadline = Some(deadline);
        self.shared.condvar.notify_all();
    }

    /// Whether a deadline is pending.
    pub fn is_armed(&self) -> bool {
        lock(&self.shared.state).deadline.is_some()
    }

    /// Disarm the timer and wait until any callback already running has
    /// returned. After this returns the callback will not run again until
    /// the timer is re-armed.
    pub fn cancel_sync(&self) {
        let mut state = lock(&self.shared.state);
        state.deadline = None;
        self.shared.condvar.notify_all();
        while state.firing && !self.on_timer_thread() {
            state = wait(&self.shared.condvar, state);
        }
    }

    fn on_timer_thread(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }
}

impl Drop for ReleaseTimer {
    fn drop(&mut self) {
        {
            let mut state = lock(&self.shared.state);
            state.deadline = None;
            state.shutdown = true;
            self.shared.condvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn run(shared: &TimerShared, on_expiry: ExpiryFn) {
    let mut state = lock(&shared.state);
    loop {
        if state.shutdown {
            return;
        }
        match state.deadline {
            None => state = wait(&shared.condvar, state),
            Some(deadline) => {
                let now = Instant::now();
                if now < deadline {
                    state = wait_timeout(&shared.condvar, state, deadline - now);
                    continue;
                }
                state.deadline = None;
                state.firing = true;
                drop(state);

                trace!("release timer {:?} expired", thread::current().name());
                on_expiry();

                state = lock(&shared.state);
                state.firing = false;
                shared.condvar.notify_all();
            }
        }
    }
}
