//! Time-bounded execution of queries that return no rows.
//!
//! One operation moves through three waits: acquiring a connection, the
//! protocol exchange, and the deadline timer. The deadline is fixed once when
//! the operation starts and shared by both stages, so a slow acquisition
//! leaves less time for the exchange.
//!
//! When the deadline wins the race against the exchange, the exchange is asked
//! to cancel and is then awaited until it acknowledges; only after that is the
//! connection touched again (flagged unusable) and handed back.

use std::future::{Future, poll_fn};
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::task::Poll;
use std::time::Instant;

use sqlexec_core::{
    AcquisitionError, AcquisitionErrorKind, Connection, ConnectionProvider, Cx, Deadline, Error,
    Exchange, Outcome, ProtocolExecutor, Spawn, Stage, TimeConstraint, Timer, TransportError,
    TransportErrorKind,
};

use crate::completion::{CompletionSink, CompletionToken};
use crate::config::ExecuteConfig;
use crate::outcome::ExecutionOutcome;

/// Executes no-result queries against connections from a provider.
///
/// `E` performs the wire exchange, `T` supplies deadline wake-ups and `S` runs
/// operations started through the completion-token entry points
/// ([`execute`](ExecuteOp::execute), [`execute_within`](ExecuteOp::execute_within),
/// [`perform`](ExecuteOp::perform)). [`run`](ExecuteOp::run) is the plain
/// async form and needs no spawner.
///
/// # Example
///
/// ```rust,ignore
/// let op = ExecuteOp::new(PgProtocol::default(), timer, spawner);
///
/// // Blocking, with a 50ms budget covering acquisition and exchange
/// let outcome = op.execute_within(&cx, pool.clone(), "UPDATE jobs SET done = true", Duration::from_millis(50), Block);
///
/// // Callback, no time limit
/// op.execute(&cx, pool.clone(), "VACUUM", callback(|outcome| report(outcome)));
///
/// // Future
/// let outcome = op.execute(&cx, pool, "DELETE FROM sessions", Deferred).await;
/// ```
pub struct ExecuteOp<E, T, S> {
    shared: Arc<Shared<E, T>>,
    spawner: S,
}

struct Shared<E, T> {
    protocol: E,
    timer: T,
    config: ExecuteConfig,
}

/// How the exchange stage ended.
struct Verdict {
    error: Option<Error>,
    discard: bool,
}

enum Race<T> {
    Done(T),
    Expired,
}

impl<E, T, S> ExecuteOp<E, T, S> {
    /// Create an execute operation with default configuration.
    pub fn new(protocol: E, timer: T, spawner: S) -> Self {
        Self::with_config(protocol, timer, spawner, ExecuteConfig::default())
    }

    /// Create an execute operation with the given configuration.
    pub fn with_config(protocol: E, timer: T, spawner: S, config: ExecuteConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                protocol,
                timer,
                config,
            }),
            spawner,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ExecuteConfig {
        &self.shared.config
    }

    /// Get the protocol executor.
    pub fn protocol(&self) -> &E {
        &self.shared.protocol
    }
}

impl<E, T, S: Clone> Clone for ExecuteOp<E, T, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            spawner: self.spawner.clone(),
        }
    }
}

impl<E, T: Timer, S> ExecuteOp<E, T, S> {
    /// Run one operation to completion on the current task.
    ///
    /// The time constraint is normalized immediately, before the provider is
    /// asked for a connection.
    pub async fn run<P, Q>(
        &self,
        cx: &Cx,
        provider: &P,
        query: &Q,
        time_constraint: impl Into<TimeConstraint>,
    ) -> ExecutionOutcome<P::Connection>
    where
        P: ConnectionProvider,
        Q: ?Sized,
        E: ProtocolExecutor<P::Connection, Q>,
    {
        let constraint: TimeConstraint = time_constraint.into();
        let deadline = constraint.normalize(Instant::now());
        self.shared.run_until(cx, provider, query, deadline).await
    }

    /// Run one operation against an already normalized deadline.
    pub async fn run_until<P, Q>(
        &self,
        cx: &Cx,
        provider: &P,
        query: &Q,
        deadline: Option<Deadline>,
    ) -> ExecutionOutcome<P::Connection>
    where
        P: ConnectionProvider,
        Q: ?Sized,
        E: ProtocolExecutor<P::Connection, Q>,
    {
        self.shared.run_until(cx, provider, query, deadline).await
    }
}

impl<E, T, S> ExecuteOp<E, T, S>
where
    T: Timer + 'static,
    S: Spawn,
{
    /// Start an operation on the spawner and deliver its outcome through `token`.
    ///
    /// What this returns depends on the token: the outcome itself for
    /// [`Block`](crate::Block), `()` for [`Callback`](crate::Callback), an
    /// [`ExecutionFuture`](crate::ExecutionFuture) for [`Deferred`](crate::Deferred).
    pub fn perform<P, Q, K>(
        &self,
        cx: &Cx,
        provider: P,
        query: Q,
        time_constraint: TimeConstraint,
        token: K,
    ) -> K::Output
    where
        P: ConnectionProvider + 'static,
        Q: Send + Sync + 'static,
        E: ProtocolExecutor<P::Connection, Q> + 'static,
        K: CompletionToken<P::Connection>,
    {
        let deadline = time_constraint.normalize(Instant::now());
        let (sink, waiter) = token.prepare();
        let shared = Arc::clone(&self.shared);
        let cx = cx.clone();

        self.spawner.spawn(Box::pin(async move {
            let outcome = shared.run_until(&cx, &provider, &query, deadline).await;
            sink.resolve(outcome);
        }));

        K::finish(waiter)
    }

    /// Execute `query` bounded by `time_constraint`.
    ///
    /// Accepts a [`TimeConstraint`], a `Duration` (relative to now), an
    /// `Instant` or a [`Deadline`].
    pub fn execute_within<P, Q, K>(
        &self,
        cx: &Cx,
        provider: P,
        query: Q,
        time_constraint: impl Into<TimeConstraint>,
        token: K,
    ) -> K::Output
    where
        P: ConnectionProvider + 'static,
        Q: Send + Sync + 'static,
        E: ProtocolExecutor<P::Connection, Q> + 'static,
        K: CompletionToken<P::Connection>,
    {
        self.perform(cx, provider, query, time_constraint.into(), token)
    }

    /// Execute `query` with no time limit.
    pub fn execute<P, Q, K>(&self, cx: &Cx, provider: P, query: Q, token: K) -> K::Output
    where
        P: ConnectionProvider + 'static,
        Q: Send + Sync + 'static,
        E: ProtocolExecutor<P::Connection, Q> + 'static,
        K: CompletionToken<P::Connection>,
    {
        self.perform(cx, provider, query, TimeConstraint::Unbounded, token)
    }
}

impl<E, T: Timer> Shared<E, T> {
    #[tracing::instrument(level = "debug", skip_all, fields(bounded = deadline.is_some()))]
    async fn run_until<P, Q>(
        &self,
        cx: &Cx,
        provider: &P,
        query: &Q,
        deadline: Option<Deadline>,
    ) -> ExecutionOutcome<P::Connection>
    where
        P: ConnectionProvider,
        Q: ?Sized,
        E: ProtocolExecutor<P::Connection, Q>,
    {
        let started = Instant::now();

        if cx.is_cancel_requested() {
            tracing::debug!("Cancelled before acquiring a connection");
            return ExecutionOutcome::without_connection(Error::Cancelled);
        }

        let acquired = {
            let acquire = pin!(provider.acquire(cx, deadline));
            race(&self.timer, deadline, acquire).await
        };

        let mut conn = match acquired {
            Race::Done(Outcome::Ok(conn)) => conn,
            Race::Done(Outcome::Err(e)) => {
                tracing::debug!(error = %e, "Connection acquisition failed");
                return ExecutionOutcome::without_connection(e);
            }
            Race::Done(Outcome::Cancelled(_)) => {
                tracing::debug!("Connection acquisition cancelled");
                return ExecutionOutcome::without_connection(Error::Cancelled);
            }
            Race::Done(Outcome::Panicked(p)) => {
                tracing::warn!("Connection provider panicked");
                return ExecutionOutcome::without_connection(Error::Acquisition(
                    AcquisitionError::new(
                        AcquisitionErrorKind::Aborted,
                        format!("connection provider panicked: {p:?}"),
                    ),
                ));
            }
            Race::Expired => {
                tracing::warn!(
                    elapsed = ?started.elapsed(),
                    "Deadline elapsed while acquiring a connection"
                );
                return ExecutionOutcome::without_connection(Error::TimedOut(Stage::Acquire));
            }
        };
        tracing::trace!(elapsed = ?started.elapsed(), "Connection acquired");

        if self.config.validate_on_acquire && !conn.is_usable() {
            tracing::warn!("Provider handed out a connection flagged unusable");
            return ExecutionOutcome::without_connection(Error::Acquisition(
                AcquisitionError::new(
                    AcquisitionErrorKind::Unusable,
                    "provider returned a connection flagged unusable",
                ),
            ));
        }

        if cx.is_cancel_requested() {
            tracing::debug!("Cancelled before starting the exchange");
            return ExecutionOutcome::failed(Error::Cancelled, conn);
        }

        let exchange_started = Instant::now();
        let verdict = self.exchange(cx, &mut conn, query, deadline).await;
        let took = exchange_started.elapsed();

        if let Some(threshold) = self.config.slow_exchange_threshold {
            if took > threshold {
                tracing::warn!(elapsed = ?took, threshold = ?threshold, "Slow query exchange");
            }
        }

        if verdict.discard {
            conn.mark_unusable();
        }

        match verdict.error {
            None => {
                tracing::debug!(elapsed = ?started.elapsed(), "Query executed");
                ExecutionOutcome::success(conn)
            }
            Some(e) => {
                tracing::debug!(error = %e, discard = verdict.discard, "Query execution failed");
                ExecutionOutcome::failed(e, conn)
            }
        }
    }

    async fn exchange<C, Q>(
        &self,
        cx: &Cx,
        conn: &mut C,
        query: &Q,
        deadline: Option<Deadline>,
    ) -> Verdict
    where
        C: Connection,
        Q: ?Sized,
        E: ProtocolExecutor<C, Q>,
    {
        let mut exchange = pin!(self.protocol.execute(cx, conn, query, deadline));

        match race(&self.timer, deadline, exchange.as_mut()).await {
            Race::Done(Outcome::Ok(())) => Verdict {
                error: None,
                discard: false,
            },
            Race::Done(Outcome::Err(e)) => Verdict {
                error: Some(e),
                discard: false,
            },
            // Interrupted by the caller mid-stream; connection state is unknown.
            Race::Done(Outcome::Cancelled(_)) => Verdict {
                error: Some(Error::Cancelled),
                discard: true,
            },
            Race::Done(Outcome::Panicked(p)) => {
                tracing::warn!("Protocol executor panicked");
                Verdict {
                    error: Some(Error::Transport(TransportError::new(
                        TransportErrorKind::Aborted,
                        format!("protocol executor panicked: {p:?}"),
                    ))),
                    discard: true,
                }
            }
            Race::Expired => {
                tracing::warn!("Deadline elapsed during exchange, cancelling");
                exchange.as_mut().cancel();
                let acknowledged = match exchange.as_mut().await {
                    Outcome::Ok(()) => "completed",
                    Outcome::Err(_) => "failed",
                    Outcome::Cancelled(_) => "cancelled",
                    Outcome::Panicked(_) => "panicked",
                };
                tracing::debug!(acknowledged, "Exchange acknowledged cancellation");
                Verdict {
                    error: Some(Error::TimedOut(Stage::Exchange)),
                    discard: true,
                }
            }
        }
    }
}

/// Drive `fut` until it completes or `deadline` passes, whichever comes first.
///
/// `fut` is polled before the timer, so work that is already finished wins
/// over an already expired deadline.
async fn race<F>(
    timer: &impl Timer,
    deadline: Option<Deadline>,
    mut fut: Pin<&mut F>,
) -> Race<F::Output>
where
    F: Future,
{
    let Some(deadline) = deadline else {
        return Race::Done(fut.await);
    };

    let mut sleep = pin!(timer.sleep_until(deadline.instant()));
    poll_fn(move |task| {
        if let Poll::Ready(output) = fut.as_mut().poll(task) {
            return Poll::Ready(Race::Done(output));
        }
        if sleep.as_mut().poll(task).is_ready() {
            return Poll::Ready(Race::Expired);
        }
        Poll::Pending
    })
    .await
}
