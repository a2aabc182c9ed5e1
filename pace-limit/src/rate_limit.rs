use std::ops::ControlFlow;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;

use super::Cancelled;
use super::DebtBucket;
use super::Direction;
use super::Reason;

/// A shared bandwidth limiter with independent read and write budgets.
///
/// One `RateLimit` is typically wrapped in an [`Arc`](std::sync::Arc) and
/// shared by every adapter whose combined traffic should stay under the
/// configured rates; the budgets are global across all of them, not
/// per-wrapper.
#[derive(Debug)]
pub struct RateLimit {
    read: DebtBucket,
    write: DebtBucket,
    chunk_size: AtomicU64,
}

impl RateLimit {
    /// Creates a limiter.
    ///
    /// # Arguments
    ///
    /// * `read_rate` - read budget in bytes per second; 0 means unlimited
    /// * `write_rate` - write budget in bytes per second; 0 means unlimited
    /// * `chunk_size` - most bytes a single charge covers; 0 means a whole
    ///   request is charged as one chunk
    pub fn new(read_rate: u64, write_rate: u64, chunk_size: u64) -> Self {
        Self {
            read: DebtBucket::new(read_rate),
            write: DebtBucket::new(write_rate),
            chunk_size: AtomicU64::new(chunk_size),
        }
    }

    fn bucket(&self, direction: Direction) -> &DebtBucket {
        match direction {
            Direction::Read => &self.read,
            Direction::Write => &self.write,
        }
    }

    /// Attempts to charge `n` bytes against one direction without waiting.
    /// See [`DebtBucket::try_consume`].
    pub fn try_consume(&self, direction: Direction, n: u64) -> ControlFlow<Reason> {
        self.bucket(direction).try_consume(n)
    }

    /// Charges `n` bytes against one direction, waiting for earlier debt on
    /// that direction to clear. See [`DebtBucket::consume`].
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `cancel` fires first; nothing is charged.
    pub async fn consume(
        &self,
        direction: Direction,
        n: u64,
        cancel: &CancellationToken,
    ) -> Result<(), Cancelled> {
        self.bucket(direction).consume(n, cancel).await
    }

    /// Replaces all three parameters. Waiters observe the new rates on their
    /// next recheck; outstanding debt is preserved in both directions.
    pub fn set_limits(&self, read_rate: u64, write_rate: u64, chunk_size: u64) {
        self.read.set_rate(read_rate);
        self.write.set_rate(write_rate);
        self.chunk_size.store(chunk_size, Ordering::Relaxed);
    }

    /// The current rate for one direction in bytes per second.
    pub fn rate(&self, direction: Direction) -> u64 {
        self.bucket(direction).rate()
    }

    /// The configured chunk size in bytes; 0 means no sub-chunking.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size.load(Ordering::Relaxed)
    }

    /// Clamps a request of `want` bytes to the configured chunk size.
    pub fn chunk_len(&self, want: usize) -> usize {
        match self.chunk_size() {
            0 => want,
            chunk => want.min(usize::try_from(chunk).unwrap_or(usize::MAX)),
        }
    }
}
