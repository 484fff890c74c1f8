//! Core types and traits for sqlexec.
//!
//! This crate provides the foundational abstractions for time-bounded query
//! execution:
//!
//! - `TimeConstraint` and `Deadline` for operation time budgets
//! - `Connection`, `ConnectionProvider` and `ProtocolExecutor` collaborator traits
//! - `Timer` and `Spawn` executor capabilities
//! - `Error` taxonomy carried by execution outcomes
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod error;
pub mod runtime;
pub mod time;

pub use connection::{Connection, ConnectionProvider, Exchange, ProtocolExecutor, Reuse};
pub use error::{
    AcquisitionError, AcquisitionErrorKind, Error, Result, Stage, TransportError,
    TransportErrorKind,
};
pub use runtime::{BoxTask, Spawn, Timer};
pub use time::{Deadline, TimeConstraint};
