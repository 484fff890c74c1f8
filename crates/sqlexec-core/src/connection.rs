//! Connection and protocol collaborator traits.
//!
//! This module defines the narrow interfaces the execution core consumes:
//!
//! - [`Connection`] - An exclusively checked-out backend session
//! - [`ConnectionProvider`] - Anything that can hand out a connection (usually a pool)
//! - [`ProtocolExecutor`] - Performs one query exchange on a connection
//! - [`Exchange`] - An in-flight exchange that supports cooperative cancellation
//!
//! All asynchronous operations take a `Cx` context so caller cancellation
//! from asupersync reaches the collaborators.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use asupersync::{Cx, Outcome};

use crate::error::{AcquisitionError, AcquisitionErrorKind, Error};
use crate::time::Deadline;

/// An open backend session.
///
/// The execution core borrows a connection for one operation and hands it
/// back inside the outcome. It never closes one; it only flags a connection
/// whose state it can no longer vouch for, leaving the discard decision to
/// the pool.
pub trait Connection: Send {
    /// Can this connection be used for another query?
    fn is_usable(&self) -> bool;

    /// Flag this connection so its pool discards it instead of reusing it.
    fn mark_unusable(&mut self);
}

/// A source of connections.
///
/// Exclusive checkout is the provider's responsibility: a connection handed
/// out here must not be in use by any other operation until it is returned.
pub trait ConnectionProvider: Send + Sync {
    /// The connection type this provider hands out.
    type Connection: Connection;

    /// Obtain a connection.
    ///
    /// `deadline` is the operation's overall deadline; providers may use it to
    /// bound their own waits. The caller also enforces it independently.
    fn acquire(
        &self,
        cx: &Cx,
        deadline: Option<Deadline>,
    ) -> impl Future<Output = Outcome<Self::Connection, Error>> + Send;
}

impl<P: ConnectionProvider> ConnectionProvider for Arc<P> {
    type Connection = P::Connection;

    fn acquire(
        &self,
        cx: &Cx,
        deadline: Option<Deadline>,
    ) -> impl Future<Output = Outcome<Self::Connection, Error>> + Send {
        (**self).acquire(cx, deadline)
    }
}

/// An in-flight query exchange.
///
/// Polling drives the exchange. After [`cancel`](Exchange::cancel) is called
/// the exchange keeps being polled until it completes; that completion is the
/// acknowledgment that the connection is no longer being touched.
pub trait Exchange: Future<Output = Outcome<(), Error>> {
    /// Request cooperative cancellation. Idempotent.
    fn cancel(self: Pin<&mut Self>);
}

/// Performs the wire-level exchange for a query on a connection.
///
/// `Q` is opaque to the execution core and forwarded verbatim.
pub trait ProtocolExecutor<C: Connection, Q: ?Sized>: Send + Sync {
    /// Start executing `query` on `conn`, discarding any result rows.
    fn execute<'a>(
        &'a self,
        cx: &'a Cx,
        conn: &'a mut C,
        query: &'a Q,
        deadline: Option<Deadline>,
    ) -> impl Exchange + Send + 'a;
}

/// Provider over a single connection the caller already holds.
///
/// Lets the connection returned in one outcome be fed straight into the next
/// operation. Hands the connection out once; later acquisitions fail with
/// [`AcquisitionErrorKind::CheckedOut`].
#[derive(Debug)]
pub struct Reuse<C> {
    slot: Mutex<Option<C>>,
}

impl<C: Connection> Reuse<C> {
    /// Wrap a held connection.
    pub fn new(conn: C) -> Self {
        Self {
            slot: Mutex::new(Some(conn)),
        }
    }

    /// Take the connection back if it was never acquired.
    pub fn into_inner(self) -> Option<C> {
        self.slot
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Connection> ConnectionProvider for Reuse<C> {
    type Connection = C;

    fn acquire(
        &self,
        _cx: &Cx,
        _deadline: Option<Deadline>,
    ) -> impl Future<Output = Outcome<C, Error>> + Send {
        let taken = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        std::future::ready(match taken {
            Some(conn) => {
                tracing::trace!("Handing out held connection");
                Outcome::Ok(conn)
            }
            None => Outcome::Err(Error::Acquisition(AcquisitionError::new(
                AcquisitionErrorKind::CheckedOut,
                "connection is already in use by another operation",
            ))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;

    struct Session {
        usable: bool,
    }

    impl Connection for Session {
        fn is_usable(&self) -> bool {
            self.usable
        }

        fn mark_unusable(&mut self) {
            self.usable = false;
        }
    }

    #[test]
    fn reuse_hands_out_connection_once() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let provider = Reuse::new(Session { usable: true });

        rt.block_on(async {
            let first = provider.acquire(&cx, None).await;
            assert!(matches!(first, Outcome::Ok(ref s) if s.is_usable()));

            match provider.acquire(&cx, None).await {
                Outcome::Err(Error::Acquisition(e)) => {
                    assert_eq!(e.kind, AcquisitionErrorKind::CheckedOut);
                }
                _ => panic!("second acquisition should fail"),
            }
        });

        assert!(provider.into_inner().is_none());
    }

    #[test]
    fn reuse_returns_unacquired_connection() {
        let provider = Reuse::new(Session { usable: false });
        let conn = provider.into_inner().expect("connection never acquired");
        assert!(!conn.is_usable());
    }
}
