//! # Synchronization Primitives
//!
//! The two building blocks every other module shares: a poison-tolerant
//! mutex lock and the [`Signal`] used to wake the dispatcher.
//!
//! Every critical section in this crate leaves its data consistent before
//! it can panic, so a poisoned lock is recovered instead of propagated.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Lock `mutex`, recovering the guard if a previous holder panicked.
#[inline]
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wait on `condvar`, recovering from poison like [`lock`].
#[inline]
pub fn wait<'a, T>(condvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

/// Timed wait on `condvar`, recovering from poison like [`lock`].
#[inline]
pub fn wait_timeout<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
) -> MutexGuard<'a, T> {
    condvar
        .wait_timeout(guard, timeout)
        .map(|(guard, _)| guard)
        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
}

/// Edge-collapsing wake-up flag.
///
/// Any number of [`raise`](Signal::raise) calls between two
/// [`wait`](Signal::wait) calls wake the waiter once. `raise` never blocks
/// beyond the short internal lock, so it is safe to call from timer
/// callbacks and request handlers.
#[derive(Debug, Default)]
pub struct Signal {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Mark a re-evaluation as pending and wake the waiter.
    pub fn raise(&self) {
        let mut pending = lock(&self.pending);
        *pending = true;
        self.condvar.notify_one();
    }

    /// Block until the signal is raised, then clear it.
    pub fn wait(&self) {
        let mut pending = lock(&self.pending);
        while !*pending {
            pending = wait(&self.condvar, pending);
        }
        *pending = false;
    }

    /// Like [`wait`](Signal::wait) but gives up after `timeout`. Returns
    /// whether the signal was consumed.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut pending = lock(&self.pending);
        if !*pending {
            pending = wait_timeout(&self.condvar, pending, timeout);
        }
        std::mem::replace(&mut *pending, false)
    }
}
