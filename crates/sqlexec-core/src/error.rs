//! Error types for query execution.

use std::fmt;

/// The error carried by an execution outcome.
///
/// None of these cross an await point as a panic; they are always delivered
/// inside the outcome handed to the completion sink.
#[derive(Debug)]
pub enum Error {
    /// The provider could not supply a usable connection
    Acquisition(AcquisitionError),
    /// The protocol exchange failed (I/O, malformed reply, backend error)
    Transport(TransportError),
    /// The time constraint elapsed before the given stage completed
    TimedOut(Stage),
    /// Operation was cancelled via asupersync
    Cancelled,
}

/// The stage an operation was in when its deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for the provider to hand out a connection
    Acquire,
    /// Waiting for the protocol exchange to finish
    Exchange,
}

#[derive(Debug)]
pub struct AcquisitionError {
    pub kind: AcquisitionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionErrorKind {
    /// No connection available in the pool
    PoolExhausted,
    /// Backend could not be reached
    Unreachable,
    /// The provider returned a connection flagged as unusable
    Unusable,
    /// The connection is already checked out by another operation
    CheckedOut,
    /// The provider failed abnormally (panicked)
    Aborted,
}

#[derive(Debug)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    pub sqlstate: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Failed to write the request
    Write,
    /// Failed to read the reply
    Read,
    /// Reply violated the wire protocol
    Protocol,
    /// The backend reported an error for the query
    Backend,
    /// The protocol executor failed abnormally (panicked)
    Aborted,
}

impl AcquisitionError {
    /// Create an acquisition error without a source.
    pub fn new(kind: AcquisitionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }
}

impl TransportError {
    /// Create a transport error without a source or SQLSTATE.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sqlstate: None,
            source: None,
        }
    }

    /// Create a backend-reported error carrying its SQLSTATE.
    pub fn backend(sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Backend,
            message: message.into(),
            sqlstate: Some(sqlstate.into()),
            source: None,
        }
    }
}

impl Error {
    /// Did the operation's time constraint elapse?
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TimedOut(_))
    }

    /// Is this error worth retrying at a higher layer (timeouts, exhausted pool)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TimedOut(_) => true,
            Error::Acquisition(a) => matches!(a.kind, AcquisitionErrorKind::PoolExhausted),
            Error::Transport(t) => {
                // 40001 serialization_failure, 40P01 deadlock_detected
                matches!(t.sqlstate.as_deref(), Some("40001" | "40P01"))
            }
            Error::Cancelled => false,
        }
    }

    /// Does this error suggest the connection itself is broken?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Acquisition(a) => matches!(
                a.kind,
                AcquisitionErrorKind::Unreachable | AcquisitionErrorKind::Unusable
            ),
            Error::Transport(t) => !matches!(t.kind, TransportErrorKind::Backend),
            _ => false,
        }
    }

    /// Get SQLSTATE if the backend reported one.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Transport(t) => t.sqlstate.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Acquire => write!(f, "connection acquisition"),
            Stage::Exchange => write!(f, "query exchange"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Acquisition(e) => write!(f, "Acquisition error: {}", e.message),
            Error::Transport(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Transport error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Transport error: {}", e.message)
                }
            }
            Error::TimedOut(stage) => write!(f, "Operation timed out during {}", stage),
            Error::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Acquisition(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Transport(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl From<AcquisitionError> for Error {
    fn from(err: AcquisitionError) -> Self {
        Error::Acquisition(err)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport(err)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::WriteZero | std::io::ErrorKind::BrokenPipe => {
                TransportErrorKind::Write
            }
            std::io::ErrorKind::InvalidData => TransportErrorKind::Protocol,
            _ => TransportErrorKind::Read,
        };
        Self {
            kind,
            message: err.to_string(),
            sqlstate: None,
            source: Some(Box::new(err)),
        }
    }
}

/// Result type alias for sqlexec operations.
pub type Result<T> = std::result::Result<T, Error>;
