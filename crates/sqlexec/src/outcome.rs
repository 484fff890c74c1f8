//! The terminal result of one execute operation.

use sqlexec_core::Error;

/// What an execute operation reports: an error (or none) plus the connection.
///
/// `connection` is the same handle the provider gave out, possibly flagged
/// unusable. It is `None` only when no connection was ever obtained.
#[derive(Debug)]
pub struct ExecutionOutcome<C> {
    error: Option<Error>,
    connection: Option<C>,
}

impl<C> ExecutionOutcome<C> {
    /// The query completed successfully on `conn`.
    pub fn success(conn: C) -> Self {
        Self {
            error: None,
            connection: Some(conn),
        }
    }

    /// The operation failed after obtaining `conn`.
    pub fn failed(error: Error, conn: C) -> Self {
        Self {
            error: Some(error),
            connection: Some(conn),
        }
    }

    /// The operation failed without ever holding a connection.
    pub fn without_connection(error: Error) -> Self {
        Self {
            error: Some(error),
            connection: None,
        }
    }

    /// Why the operation failed, if it did.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// The connection, handed back for reuse or discard.
    pub fn connection(&self) -> Option<&C> {
        self.connection.as_ref()
    }

    /// Did the query succeed?
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Split into the error and the connection.
    pub fn into_parts(self) -> (Option<Error>, Option<C>) {
        (self.error, self.connection)
    }

    /// Convert into a `Result`, keeping the connection on both sides.
    #[allow(clippy::result_large_err)]
    pub fn into_result(self) -> Result<C, (Error, Option<C>)> {
        match (self.error, self.connection) {
            (None, Some(conn)) => Ok(conn),
            (Some(error), conn) => Err((error, conn)),
            // Success always carries its connection.
            (None, None) => unreachable!("successful outcome without a connection"),
        }
    }
}
