//! Executor capabilities consumed by the execution core.
//!
//! The core never creates threads or timers of its own. Whatever runs the
//! futures (an asupersync runtime, an event loop, a test harness) supplies a
//! [`Timer`] for deadline waits and a [`Spawn`] for detached operations.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// A detached unit of work handed to a [`Spawn`] implementation.
pub type BoxTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Source of deadline wake-ups.
pub trait Timer: Send + Sync {
    /// Complete once `deadline` has been reached.
    ///
    /// Must complete immediately (on first poll) when the deadline is
    /// already in the past.
    fn sleep_until(&self, deadline: Instant) -> impl Future<Output = ()> + Send;
}

/// Runs detached tasks to completion.
pub trait Spawn: Send + Sync {
    /// Schedule `task`. Must not run it inline on the caller's stack when the
    /// caller intends to block on its result.
    fn spawn(&self, task: BoxTask);
}

impl<T: Timer> Timer for Arc<T> {
    fn sleep_until(&self, deadline: Instant) -> impl Future<Output = ()> + Send {
        (**self).sleep_until(deadline)
    }
}

impl<S: Spawn + ?Sized> Spawn for Arc<S> {
    fn spawn(&self, task: BoxTask) {
        (**self).spawn(task);
    }
}
