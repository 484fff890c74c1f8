//! sqlexec - time-bounded execution of queries that return no rows.
//!
//! sqlexec is the request-execution core of an async database client. It
//! takes a connection from a provider, runs one query through a protocol
//! executor, enforces a single deadline across both steps and hands back
//! `(error-or-none, connection)`:
//!
//! - One deadline budget for acquisition and exchange
//! - Cooperative cancellation of exchanges that overrun their deadline
//! - Blocking, callback and future completion from the same call
//! - The connection always returned to the caller once acquired
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlexec::prelude::*;
//!
//! let op = ExecuteOp::new(protocol, timer, spawner);
//!
//! let outcome = op.execute_within(&cx, pool, "UPDATE users SET active = false", Duration::from_millis(50), Block);
//! match outcome.into_result() {
//!     Ok(conn) => reuse(conn),
//!     Err((e, conn)) if e.is_timeout() => retry_later(conn),
//!     Err((e, _)) => return Err(e),
//! }
//! ```
//!
//! Rows, query building, pooling and retries are left to other layers.

pub mod completion;
pub mod config;
pub mod execute;
pub mod outcome;

pub use completion::{
    Block, BlockingWait, Callback, CallbackSink, CompletionSink, CompletionToken, Deferred,
    ExecutionFuture, SlotSink, callback,
};
pub use config::ExecuteConfig;
pub use execute::ExecuteOp;
pub use outcome::ExecutionOutcome;

// Re-export all public types from the core crate
pub use sqlexec_core::{
    AcquisitionError, AcquisitionErrorKind, BoxTask, Connection, ConnectionProvider, Cx,
    Deadline, Error, Exchange, Outcome, ProtocolExecutor, Result, Reuse, Spawn, Stage,
    TimeConstraint, Timer, TransportError, TransportErrorKind,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Block, Callback, Connection, ConnectionProvider, Cx, Deadline, Deferred, Error, Exchange,
        ExecuteConfig, ExecuteOp, ExecutionFuture, ExecutionOutcome, Outcome, ProtocolExecutor,
        Reuse, Spawn, Stage, TimeConstraint, Timer, callback,
    };
}
