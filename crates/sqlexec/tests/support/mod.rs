//! Shared collaborators for the execute integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::thread;
use std::time::{Duration, Instant};

use asupersync::runtime::RuntimeBuilder;
use asupersync::{CancelKind, CancelReason};
use sqlexec::{
    AcquisitionError, AcquisitionErrorKind, BoxTask, Connection, ConnectionProvider, Cx, Deadline,
    Error, Exchange, ExecuteConfig, ExecuteOp, Outcome, ProtocolExecutor, Spawn, Timer,
    TransportError,
};

pub type TestOp = ExecuteOp<MockProtocol, ThreadTimer, ThreadSpawner>;

pub fn op(protocol: MockProtocol) -> TestOp {
    ExecuteOp::new(protocol, ThreadTimer, ThreadSpawner)
}

pub fn op_with_config(protocol: MockProtocol, config: ExecuteConfig) -> TestOp {
    ExecuteOp::with_config(protocol, ThreadTimer, ThreadSpawner, config)
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Block on `fut` with a fresh current-thread runtime.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(fut)
}

// ==================== Timer / Spawn ====================

/// Timer that arms a helper thread to wake the task at the deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadTimer;

pub struct Sleep {
    deadline: Instant,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let now = Instant::now();
        if now >= self.deadline {
            return Poll::Ready(());
        }
        let waker = cx.waker().clone();
        let remaining = self.deadline - now;
        thread::spawn(move || {
            thread::sleep(remaining);
            waker.wake();
        });
        Poll::Pending
    }
}

impl Timer for ThreadTimer {
    fn sleep_until(&self, deadline: Instant) -> impl Future<Output = ()> + Send {
        Sleep { deadline }
    }
}

pub fn delay(d: Duration) -> Sleep {
    Sleep {
        deadline: Instant::now() + d,
    }
}

/// Runs each task on its own thread with its own runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSpawner;

impl Spawn for ThreadSpawner {
    fn spawn(&self, task: BoxTask) {
        thread::spawn(move || block_on(task));
    }
}

// ==================== Connection / Provider ====================

#[derive(Debug)]
pub struct MockConn {
    pub id: u32,
    usable: bool,
}

impl MockConn {
    pub fn new(id: u32) -> Self {
        Self { id, usable: true }
    }
}

impl Connection for MockConn {
    fn is_usable(&self) -> bool {
        self.usable
    }

    fn mark_unusable(&mut self) {
        self.usable = false;
    }
}

#[derive(Debug, Default)]
pub struct MockProvider {
    delay: Duration,
    fail: Option<AcquisitionErrorKind>,
    unusable: bool,
    cancel_caller: bool,
    acquired: AtomicUsize,
}

impl MockProvider {
    pub fn after(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn failing(kind: AcquisitionErrorKind) -> Self {
        Self {
            fail: Some(kind),
            ..Default::default()
        }
    }

    pub fn handing_out_unusable() -> Self {
        Self {
            unusable: true,
            ..Default::default()
        }
    }

    /// Hands out a connection but cancels the caller's context while doing so.
    pub fn cancelling_caller() -> Self {
        Self {
            cancel_caller: true,
            ..Default::default()
        }
    }

    pub fn acquisitions(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

impl ConnectionProvider for MockProvider {
    type Connection = MockConn;

    fn acquire(
        &self,
        cx: &Cx,
        _deadline: Option<Deadline>,
    ) -> impl Future<Output = Outcome<MockConn, Error>> + Send {
        if self.cancel_caller {
            cx.cancel_with(CancelKind::User, Some("caller gave up"));
        }
        let id = u32::try_from(self.acquired.fetch_add(1, Ordering::SeqCst)).unwrap_or(u32::MAX);
        let wait = delay(self.delay);
        let fail = self.fail;
        let unusable = self.unusable;

        async move {
            wait.await;
            if let Some(kind) = fail {
                return Outcome::Err(Error::Acquisition(AcquisitionError::new(
                    kind,
                    "no connection available",
                )));
            }
            let mut conn = MockConn::new(id);
            if unusable {
                conn.mark_unusable();
            }
            Outcome::Ok(conn)
        }
    }
}

// ==================== Protocol ====================

/// How an exchange ends when it runs to completion.
#[derive(Debug, Clone, Copy, Default)]
enum Ending {
    #[default]
    Ok,
    Backend(&'static str),
    Interrupted,
}

/// Protocol executor whose exchanges take a fixed time and count cancellations.
#[derive(Debug, Clone, Default)]
pub struct MockProtocol {
    delay: Duration,
    ending: Ending,
    ack_delay: Duration,
    started: Arc<AtomicUsize>,
    cancels: Arc<AtomicUsize>,
    acked_at: Arc<Mutex<Option<Instant>>>,
}

impl MockProtocol {
    pub fn after(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn failing_after(delay: Duration, sqlstate: &'static str) -> Self {
        Self {
            delay,
            ending: Ending::Backend(sqlstate),
            ..Default::default()
        }
    }

    /// Exchanges that report `Outcome::Cancelled` on their own after `delay`.
    pub fn interrupted_after(delay: Duration) -> Self {
        Self {
            delay,
            ending: Ending::Interrupted,
            ..Default::default()
        }
    }

    /// Exchanges that take `ack_delay` to wind down once cancelled.
    pub fn acking_after(delay: Duration, ack_delay: Duration) -> Self {
        Self {
            delay,
            ack_delay,
            ..Default::default()
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// When the last cancelled exchange acknowledged, if any did.
    pub fn acked_at(&self) -> Option<Instant> {
        *self.acked_at.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct MockExchange {
    wait: Sleep,
    ending: Ending,
    ack_delay: Duration,
    ack: Option<Sleep>,
    cancels: Arc<AtomicUsize>,
    acked_at: Arc<Mutex<Option<Instant>>>,
}

impl Future for MockExchange {
    type Output = Outcome<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if let Some(ack) = this.ack.as_mut() {
            if Pin::new(ack).poll(cx).is_pending() {
                return Poll::Pending;
            }
            *this.acked_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
            return Poll::Ready(Outcome::Err(Error::Cancelled));
        }
        match Pin::new(&mut this.wait).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(()) => Poll::Ready(match this.ending {
                Ending::Ok => Outcome::Ok(()),
                Ending::Backend(sqlstate) => {
                    Outcome::Err(Error::Transport(TransportError::backend(sqlstate, "rejected")))
                }
                Ending::Interrupted => Outcome::Cancelled(CancelReason::user("peer went away")),
            }),
        }
    }
}

impl Exchange for MockExchange {
    fn cancel(self: Pin<&mut Self>) {
        let this = self.get_mut();
        this.cancels.fetch_add(1, Ordering::SeqCst);
        this.ack = Some(delay(this.ack_delay));
    }
}

impl<Q: ?Sized> ProtocolExecutor<MockConn, Q> for MockProtocol {
    fn execute<'a>(
        &'a self,
        _cx: &'a Cx,
        _conn: &'a mut MockConn,
        _query: &'a Q,
        _deadline: Option<Deadline>,
    ) -> impl Exchange + Send + 'a {
        self.started.fetch_add(1, Ordering::SeqCst);
        MockExchange {
            wait: delay(self.delay),
            ending: self.ending,
            ack_delay: self.ack_delay,
            ack: None,
            cancels: Arc::clone(&self.cancels),
            acked_at: Arc::clone(&self.acked_at),
        }
    }
}
