//! # pace-limit
//!
//! `pace-limit` provides debt-based bandwidth limiting for byte streams.
//!
//! ## Core Philosophy
//!
//! Classic token buckets bank idle capacity and then let one caller burst
//! through the accumulated balance. `pace-limit` tracks *debt* instead: unused
//! capacity is discarded, and a request is never slowed by its own size, only
//! by the debt left behind by earlier requests. That keeps the first request on
//! a quiet link instant while the long-run throughput still converges on the
//! configured rate, however many consumers share the budget.
//!
//! ## Key Concepts
//!
//! * **Debt, not tokens**: each grant pushes the bucket into debt; later
//!   grants wait for elapsed time to pay it off.
//! * **Per-direction budgets**: reads and writes are limited independently,
//!   each with its own debt and clock.
//! * **Lazy evaluation**: debt is recomputed at the moment of the request; no
//!   background tasks or timers.
//! * **Cooperative waiting**: waiters sleep with the lock released and recheck
//!   on wake, so concurrent consumers and live reconfiguration are honoured
//!   mid-wait.
//!
//! ## Example
//!
//! ```rust
//! use pace_limit::Direction;
//! use pace_limit::RateLimit;
//!
//! let limit = RateLimit::new(1000, 1000, 64);
//!
//! // A fresh limiter carries no debt, so the first charge goes through at once.
//! if limit.try_consume(Direction::Write, 64).is_continue() {
//!     // perform the 64-byte write
//! }
//! ```

use std::fmt;
use std::time::Duration;

mod debt_bucket;
mod rate_limit;

pub use debt_bucket::DebtBucket;
pub use rate_limit::RateLimit;

/// Selects which of a limiter's two independent budgets an operation draws
/// from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// Reasons why a charge might be refused by a bucket.
#[derive(Debug, PartialEq)]
pub enum Reason {
    Saturated { retry_after: Duration },
}

/// Error returned by [`DebtBucket::consume`] and [`RateLimit::consume`] when
/// the cancellation token fires before the debt clears. Nothing is charged in
/// that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("consume cancelled while waiting for bandwidth")
    }
}

impl std::error::Error for Cancelled {}
