//! Completion styles for execute operations.
//!
//! The operation itself only ever sees a [`CompletionSink`] and calls
//! [`resolve`](CompletionSink::resolve) once. Which style the caller gets is
//! picked by the token passed at the call site:
//!
//! - [`Block`] - the calling thread waits and receives the [`ExecutionOutcome`]
//! - [`Callback`] - a function is invoked with the outcome where the operation finishes
//! - [`Deferred`] - an [`ExecutionFuture`] is returned to be awaited or polled later
//!
//! `resolve` takes the sink by value, so a second resolution does not type
//! check. The shared slot behind `Block` and `Deferred` also asserts it is
//! fulfilled only once.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use sqlexec_core::Error;

use crate::outcome::ExecutionOutcome;

/// Receives the single outcome of an execute operation.
///
/// Implementations must not block the resolving thread.
pub trait CompletionSink<C>: Send + 'static {
    /// Deliver the outcome.
    fn resolve(self, outcome: ExecutionOutcome<C>);
}

/// Selects a completion style at the call site.
///
/// [`prepare`](CompletionToken::prepare) runs before the operation starts and
/// splits the token into the sink handed to the operation and a waiter kept by
/// the caller; [`finish`](CompletionToken::finish) turns the waiter into what
/// the execute call returns.
pub trait CompletionToken<C> {
    /// The sink the operation resolves.
    type Sink: CompletionSink<C>;
    /// State kept on the caller's side while the operation runs.
    type Waiter;
    /// What the execute call returns.
    type Output;

    fn prepare(self) -> (Self::Sink, Self::Waiter);

    fn finish(waiter: Self::Waiter) -> Self::Output;
}

// ==================== Shared slot ====================

struct SlotState<C> {
    outcome: Option<ExecutionOutcome<C>>,
    settled: bool,
    waker: Option<Waker>,
}

struct Slot<C> {
    state: Mutex<SlotState<C>>,
    ready: Condvar,
}

impl<C> Slot<C> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState {
                outcome: None,
                settled: false,
                waker: None,
            }),
            ready: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fulfill(&self, outcome: ExecutionOutcome<C>) {
        let waker = {
            let mut state = self.lock();
            assert!(!state.settled, "execute completion resolved more than once");
            state.settled = true;
            state.outcome = Some(outcome);
            state.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn wait(&self) -> ExecutionOutcome<C> {
        let mut state = self.lock();
        loop {
            if let Some(outcome) = state.outcome.take() {
                return outcome;
            }
            assert!(!state.settled, "ExecutionFuture waited on after completion");
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn take(&self) -> Option<ExecutionOutcome<C>> {
        self.lock().outcome.take()
    }

    fn poll_take(&self, cx: &Context<'_>) -> Poll<ExecutionOutcome<C>> {
        let mut state = self.lock();
        if let Some(outcome) = state.outcome.take() {
            return Poll::Ready(outcome);
        }
        assert!(!state.settled, "ExecutionFuture polled after completion");
        match &state.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => state.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

/// Sink that fills a shared slot observed by a [`BlockingWait`] or [`ExecutionFuture`].
///
/// Dropping it unresolved (the spawner discarded the task) settles the slot
/// with a cancellation so no waiter is left hanging.
pub struct SlotSink<C> {
    slot: Option<Arc<Slot<C>>>,
}

impl<C: Send + 'static> CompletionSink<C> for SlotSink<C> {
    fn resolve(mut self, outcome: ExecutionOutcome<C>) {
        if let Some(slot) = self.slot.take() {
            slot.fulfill(outcome);
        }
    }
}

impl<C> Drop for SlotSink<C> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            tracing::warn!("Execute operation dropped before completing; reporting cancellation");
            slot.fulfill(ExecutionOutcome::without_connection(Error::Cancelled));
        }
    }
}

// ==================== Block ====================

/// Block the calling thread until the outcome is available.
///
/// The operation still runs on the spawner; only the caller waits. Do not use
/// from a thread that must drive the spawner itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct Block;

/// Caller side of [`Block`].
pub struct BlockingWait<C> {
    slot: Arc<Slot<C>>,
}

impl<C> BlockingWait<C> {
    fn wait(self) -> ExecutionOutcome<C> {
        self.slot.wait()
    }
}

impl<C: Send + 'static> CompletionToken<C> for Block {
    type Sink = SlotSink<C>;
    type Waiter = BlockingWait<C>;
    type Output = ExecutionOutcome<C>;

    fn prepare(self) -> (Self::Sink, Self::Waiter) {
        let slot = Slot::new();
        (
            SlotSink {
                slot: Some(Arc::clone(&slot)),
            },
            BlockingWait { slot },
        )
    }

    fn finish(waiter: Self::Waiter) -> Self::Output {
        waiter.wait()
    }
}

// ==================== Callback ====================

/// Invoke a function with the outcome on whatever context the operation completes on.
#[derive(Debug, Clone, Copy)]
pub struct Callback<F>(pub F);

/// Wrap `f` as a [`Callback`] completion token.
pub fn callback<F>(f: F) -> Callback<F> {
    Callback(f)
}

/// Sink side of [`Callback`].
pub struct CallbackSink<C, F>
where
    F: FnOnce(ExecutionOutcome<C>),
{
    f: Option<F>,
    _conn: PhantomData<fn(C)>,
}

impl<C, F> CompletionSink<C> for CallbackSink<C, F>
where
    C: 'static,
    F: FnOnce(ExecutionOutcome<C>) + Send + 'static,
{
    fn resolve(mut self, outcome: ExecutionOutcome<C>) {
        if let Some(f) = self.f.take() {
            f(outcome);
        }
    }
}

impl<C, F> Drop for CallbackSink<C, F>
where
    F: FnOnce(ExecutionOutcome<C>),
{
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            tracing::warn!("Execute operation dropped before completing; reporting cancellation");
            f(ExecutionOutcome::without_connection(Error::Cancelled));
        }
    }
}

impl<C, F> CompletionToken<C> for Callback<F>
where
    C: 'static,
    F: FnOnce(ExecutionOutcome<C>) + Send + 'static,
{
    type Sink = CallbackSink<C, F>;
    type Waiter = ();
    type Output = ();

    fn prepare(self) -> (Self::Sink, Self::Waiter) {
        (
            CallbackSink {
                f: Some(self.0),
                _conn: PhantomData,
            },
            (),
        )
    }

    fn finish((): Self::Waiter) -> Self::Output {}
}

// ==================== Deferred ====================

/// Return an [`ExecutionFuture`] the caller awaits or polls later.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deferred;

/// Handle to an outcome that will be available later.
pub struct ExecutionFuture<C> {
    slot: Arc<Slot<C>>,
}

impl<C> ExecutionFuture<C> {
    /// Take the outcome if it is already available, without waiting.
    pub fn try_take(&mut self) -> Option<ExecutionOutcome<C>> {
        self.slot.take()
    }

    /// Block the current thread until the outcome is available.
    ///
    /// # Panics
    ///
    /// Panics if the outcome was already taken with [`try_take`](Self::try_take).
    pub fn wait(self) -> ExecutionOutcome<C> {
        self.slot.wait()
    }
}

impl<C> Future for ExecutionFuture<C> {
    type Output = ExecutionOutcome<C>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.slot.poll_take(cx)
    }
}

impl<C: Send + 'static> CompletionToken<C> for Deferred {
    type Sink = SlotSink<C>;
    type Waiter = ExecutionFuture<C>;
    type Output = ExecutionFuture<C>;

    fn prepare(self) -> (Self::Sink, Self::Waiter) {
        let slot = Slot::new();
        (
            SlotSink {
                slot: Some(Arc::clone(&slot)),
            },
            ExecutionFuture { slot },
        )
    }

    fn finish(waiter: Self::Waiter) -> Self::Output {
        waiter
    }
}
