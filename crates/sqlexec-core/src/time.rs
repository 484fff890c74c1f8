//! Time constraints and deadlines.
//!
//! A [`TimeConstraint`] is what the caller asks for; a [`Deadline`] is what the
//! operation works with. The conversion happens exactly once, through
//! [`TimeConstraint::normalize`], before a connection is requested, so the
//! time spent waiting on the provider is charged against the same budget as
//! the query exchange.

use std::time::{Duration, Instant};

/// An absolute point on the monotonic clock after which an operation is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(Instant);

impl Deadline {
    /// Create a deadline at the given instant.
    #[must_use]
    pub const fn at(instant: Instant) -> Self {
        Self(instant)
    }

    /// The instant this deadline expires at.
    #[must_use]
    pub const fn instant(&self) -> Instant {
        self.0
    }

    /// Time left until expiry, zero if already expired.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        self.0.saturating_duration_since(now)
    }

    /// Has this deadline passed?
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.0
    }
}

/// How long an operation is allowed to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeConstraint {
    /// No limit: the operation never times out.
    #[default]
    Unbounded,
    /// Relative limit, measured from the moment the operation starts.
    Timeout(Duration),
    /// Absolute limit.
    Deadline(Deadline),
}

impl TimeConstraint {
    /// Resolve this constraint into an absolute deadline relative to `now`.
    ///
    /// Returns `None` for "never expires". A timeout too large to be
    /// represented on the clock also never expires.
    #[must_use]
    pub fn normalize(self, now: Instant) -> Option<Deadline> {
        match self {
            TimeConstraint::Unbounded => None,
            TimeConstraint::Timeout(timeout) => now.checked_add(timeout).map(Deadline),
            TimeConstraint::Deadline(deadline) => Some(deadline),
        }
    }

    /// Is this the unlimited constraint?
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        matches!(self, TimeConstraint::Unbounded)
    }
}

impl From<Duration> for TimeConstraint {
    fn from(timeout: Duration) -> Self {
        TimeConstraint::Timeout(timeout)
    }
}

impl From<Deadline> for TimeConstraint {
    fn from(deadline: Deadline) -> Self {
        TimeConstraint::Deadline(deadline)
    }
}

impl From<Instant> for TimeConstraint {
    fn from(instant: Instant) -> Self {
        TimeConstraint::Deadline(Deadline(instant))
    }
}

impl From<Option<Duration>> for TimeConstraint {
    fn from(timeout: Option<Duration>) -> Self {
        timeout.map_or(TimeConstraint::Unbounded, TimeConstraint::Timeout)
    }
}

impl From<Option<Deadline>> for TimeConstraint {
    fn from(deadline: Option<Deadline>) -> Self {
        deadline.map_or(TimeConstraint::Unbounded, TimeConstraint::Deadline)
    }
}
