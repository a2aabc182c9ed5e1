use std::ops::ControlFlow;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::Cancelled;
use super::Reason;

#[derive(Debug)]
struct BucketState {
    /// Bytes per second; 0 disables pacing for this bucket.
    rate: u64,
    /// Bytes still owed by earlier grants. Never negative; elapsed time is
    /// credited against it and any excess credit is discarded.
    owed: f64,
    last_update: Instant,
}

/// Debt accounting for a single transfer direction.
///
/// A charge is granted as soon as all *earlier* debt has been paid off by
/// elapsed time; the granted amount then becomes new debt. A request is never
/// slowed by its own size, only by what came before it, which keeps the first
/// request on a fresh bucket instant while sustained throughput converges on
/// the configured rate.
#[derive(Debug)]
pub struct DebtBucket {
    state: Mutex<BucketState>,
}

impl DebtBucket {
    /// Creates a bucket paying out `rate` bytes per second. A rate of 0 means
    /// unlimited: every charge is granted immediately and no debt is tracked.
    pub fn new(rate: u64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                rate,
                owed: 0.0,
                last_update: Instant::now(),
            }),
        }
    }

    /// Attempts to charge `n` bytes in a single locked pass.
    ///
    /// Elapsed time since the previous pass is credited against the debt
    /// first, clamped at zero; idle capacity is never banked. If the debt is
    /// clear the charge is granted and becomes the new debt; otherwise the
    /// caller learns how long to back off before rechecking.
    pub fn try_consume(&self, n: u64) -> ControlFlow<Reason> {
        let mut state = self.state.lock();
        if state.rate == 0 {
            return ControlFlow::Continue(());
        }

        // Value the idle time at the current rate and pay the debt down.
        let now = Instant::now();
        let credit = now.duration_since(state.last_update).as_secs_f64() * state.rate as f64;
        state.last_update = now;
        state.owed = (state.owed - credit).max(0.0);

        if state.owed > 0.0 {
            let wait = state.owed / state.rate as f64;
            // Round up so a wake never lands a hair short of clearing the
            // debt; a wait too large for `Duration` saturates to the maximum.
            let retry_after = Duration::try_from_secs_f64(wait)
                .unwrap_or(Duration::MAX)
                .saturating_add(Duration::from_nanos(1));
            return ControlFlow::Break(Reason::Saturated { retry_after });
        }

        // Debt is clear: the request goes through and becomes the new debt.
        state.owed = n as f64;
        ControlFlow::Continue(())
    }

    /// Charges `n` bytes, waiting for earlier debt to clear first.
    ///
    /// The wait releases the bucket lock, sleeps for the reported back-off and
    /// rechecks on wake. Other consumers may have added debt, or a
    /// reconfiguration may have changed the rate, while this caller slept, so
    /// the remaining wait is recomputed every round rather than slept in one
    /// piece.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `cancel` fires before the charge is granted.
    pub async fn consume(&self, n: u64, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            match self.try_consume(n) {
                ControlFlow::Continue(()) => return Ok(()),
                ControlFlow::Break(Reason::Saturated { retry_after }) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Cancelled),
                        _ = sleep(retry_after) => {}
                    }
                }
            }
        }
    }

    /// Replaces the payout rate. Outstanding debt is preserved, so obligations
    /// incurred under the old rate are paid off at the new one.
    pub fn set_rate(&self, rate: u64) {
        self.state.lock().rate = rate;
    }

    /// The current payout rate in bytes per second.
    pub fn rate(&self) -> u64 {
        self.state.lock().rate
    }

    #[cfg(test)]
    pub(crate) fn owed(&self) -> f64 {
        self.state.lock().owed
    }
}
