//! One-shot completion signal
//!
//! Fired exactly once when an install run has fully unwound. Signalling again
//! is a no-op, so every exit path may signal without coordination.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Completion {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark as complete and wake all waiters.
    ///
    /// Returns `true` only for the call that actually fired the signal.
    pub fn signal(&self) -> bool {
        let mut done = self.done.lock().expect("completion mutex poisoned");
        if *done {
            return false;
        }
        *done = true;
        self.cond.notify_all();
        true
    }

    pub fn is_signaled(&self) -> bool {
        *self.done.lock().expect("completion mutex poisoned")
    }

    /// Block until signalled
    pub fn wait(&self) {
        let mut done = self.done.lock().expect("completion mutex poisoned");
        while !*done {
            done = self.cond.wait(done).expect("completion mutex poisoned");
        }
    }

    /// Block for at most `timeout`; returns whether the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let done = self.done.lock().expect("completion mutex poisoned");
        let (done, _) = self
            .cond
            .wait_timeout_while(done, timeout, |done| !*done)
            .expect("completion mutex poisoned");
        *done
    }
}
