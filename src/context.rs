//! Cancellable, deadline-bearing execution context
//!
//! One `RunContext` flows through every operation of an install run. It can be
//! cancelled explicitly (operator signal) or expire at a deadline (global run
//! timeout). Child contexts add shorter sub-deadlines for individual commands
//! while still observing the parent's cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Granularity used when sleeping on a context.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

const LIVE: u8 = 0;
const CANCELLED: u8 = 1;

/// Why a context is done
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug)]
struct Inner {
    parent: Option<RunContext>,
    deadline: Option<Instant>,
    state: AtomicU8,
}

/// Shared handle to a cancellable execution context.
///
/// Cloning is cheap; all clones observe the same cancellation state.
#[derive(Debug, Clone)]
pub struct RunContext {
    inner: Arc<Inner>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::background()
    }
}

impl RunContext {
    /// A root context with no deadline that is only done once cancelled.
    pub fn background() -> Self {
        Self::build(None, None)
    }

    fn build(parent: Option<RunContext>, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                parent,
                deadline,
                state: AtomicU8::new(LIVE),
            }),
        }
    }

    /// Child context that can be cancelled independently of its parent.
    pub fn with_cancel(&self) -> Self {
        Self::build(Some(self.clone()), self.deadline())
    }

    /// Child context that expires after `timeout`, or earlier if the parent does.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.deadline() {
            Some(parent) if parent < own => parent,
            _ => own,
        };
        Self::build(Some(self.clone()), Some(deadline))
    }

    /// Cancel this context and, transitively, all of its children.
    pub fn cancel(&self) {
        self.inner.state.store(CANCELLED, Ordering::SeqCst);
    }

    /// Effective deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if self.inner.state.load(Ordering::SeqCst) == CANCELLED {
            return Some(ContextError::Cancelled);
        }

        if let Some(parent) = &self.inner.parent {
            if let Some(err) = parent.err() {
                return Some(err);
            }
        }

        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Sleep for up to `duration`, returning early if the context is done.
    ///
    /// Returns `Err` with the reason when the context finished first.
    pub fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        let until = Instant::now() + duration;
        loop {
            if let Some(err) = self.err() {
                return Err(err);
            }
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep(POLL_INTERVAL.min(until - now));
        }
    }
}
