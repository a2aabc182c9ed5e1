use std::future::Future;
use std::io;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::task::ready;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::ReadBuf;
use tokio::time::Sleep;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::sync::WaitForCancellationFutureOwned;

use pace_limit::Direction;
use pace_limit::RateLimit;
use pace_limit::Reason;

use crate::error::ThrottleError;

#[derive(Clone, Debug)]
struct GateMetrics {
    debt_wait: Counter<u64>,
}

/// Per-direction chunk admission for one adapter.
///
/// The gate admits at most one chunk per I/O call: the chunk is charged to
/// the limiter before the transport runs, and the charge is kept across a
/// `Pending` transport so re-polling never pays twice. While earlier debt
/// clears, the gate sleeps for the reported back-off and recharges on every
/// wake, so concurrent sharers and live reconfiguration are honoured
/// mid-wait.
pub(crate) struct ChunkGate {
    direction: Direction,
    cancel: CancellationToken,
    // Each gate keeps its own cancellation future so the read and write
    // directions never overwrite one another's registered waker.
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    /// Bytes already charged for the chunk currently in flight.
    granted: Option<usize>,
    sleep: Option<Pin<Box<Sleep>>>,
    instruments: GateMetrics,
}

impl ChunkGate {
    pub(crate) fn new(direction: Direction, cancel: CancellationToken) -> Self {
        let meter = global::meter("tokio_pace");
        let instruments = GateMetrics {
            debt_wait: meter.u64_counter("debt_wait").build(),
        };

        Self {
            direction,
            cancelled: Box::pin(cancel.clone().cancelled_owned()),
            cancel,
            granted: None,
            sleep: None,
            instruments,
        }
    }

    /// True when no chunk is in flight, so a pass-through fast path is safe.
    pub(crate) fn idle(&self) -> bool {
        self.granted.is_none()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn direction_label(&self) -> &'static str {
        match self.direction {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }

    /// Admits the next chunk of a request for `want` bytes, resolving to the
    /// number of bytes the caller may move.
    fn poll_grant(
        &mut self,
        cx: &mut Context<'_>,
        limit: &RateLimit,
        want: usize,
    ) -> Poll<io::Result<usize>> {
        // A chunk charged on an earlier poll is still in flight.
        if let Some(n) = self.granted {
            return Poll::Ready(Ok(n));
        }

        // The boundary check runs before every charge, so a fired token stops
        // a transfer between chunks no matter the configured rate.
        if self.cancel.is_cancelled() {
            return Poll::Ready(Err(ThrottleError::Cancelled.into()));
        }

        loop {
            // 1. Wait out a pending back-off, racing the cancellation token.
            if let Some(fut) = self.sleep.as_mut() {
                match fut.as_mut().poll(cx) {
                    Poll::Ready(()) => self.sleep = None,
                    Poll::Pending => {
                        if self.cancelled.as_mut().poll(cx).is_ready() {
                            self.sleep = None;
                            return Poll::Ready(Err(ThrottleError::Cancelled.into()));
                        }
                        return Poll::Pending;
                    }
                }
            }

            // 2. Charge one chunk. The chunk size is re-read every round, so
            // reconfiguration takes effect from the next chunk onwards.
            let chunk = limit.chunk_len(want);
            match limit.try_consume(self.direction, chunk as u64) {
                ControlFlow::Continue(()) => {
                    self.granted = Some(chunk);
                    return Poll::Ready(Ok(chunk));
                }
                ControlFlow::Break(Reason::Saturated { retry_after }) => {
                    self.instruments
                        .debt_wait
                        .add(1, &[KeyValue::new("direction", self.direction_label())]);
                    self.sleep = Some(Box::pin(sleep(retry_after)));
                }
            }
        }
    }

    /// Marks the in-flight chunk complete once the transport returned
    /// `Ready`.
    fn complete(&mut self) {
        self.granted = None;
    }
}

/// Rate-limited write of at most one chunk; short writes and transport
/// errors are returned as-is, never retried here.
pub(crate) fn poll_write_limited<W: AsyncWrite>(
    inner: Pin<&mut W>,
    gate: &mut ChunkGate,
    limit: &RateLimit,
    cx: &mut Context<'_>,
    buf: &[u8],
) -> Poll<io::Result<usize>> {
    if buf.is_empty() {
        return Poll::Ready(Ok(0));
    }
    if gate.idle() && !gate.is_cancelled() && limit.rate(Direction::Write) == 0 {
        return inner.poll_write(cx, buf);
    }

    let n = ready!(gate.poll_grant(cx, limit, buf.len()))?;
    let n = n.min(buf.len());
    let res = inner.poll_write(cx, &buf[..n]);
    if res.is_ready() {
        gate.complete();
    }
    res
}

/// Rate-limited read of at most one chunk. An EOF result still pays for the
/// chunk that probed for it.
pub(crate) fn poll_read_limited<R: AsyncRead>(
    inner: Pin<&mut R>,
    gate: &mut ChunkGate,
    limit: &RateLimit,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
) -> Poll<io::Result<()>> {
    if buf.remaining() == 0 {
        return Poll::Ready(Ok(()));
    }
    if gate.idle() && !gate.is_cancelled() && limit.rate(Direction::Read) == 0 {
        return inner.poll_read(cx, buf);
    }

    let n = ready!(gate.poll_grant(cx, limit, buf.remaining()))?;
    let n = n.min(buf.remaining());
    if n == buf.remaining() {
        let res = inner.poll_read(cx, buf);
        if res.is_ready() {
            gate.complete();
        }
        return res;
    }

    // The chunk is smaller than the caller's buffer: read into a clamped view
    // and fold the result back.
    let mut limited = buf.take(n);
    match inner.poll_read(cx, &mut limited) {
        Poll::Ready(Ok(())) => {
            let filled = limited.filled().len();
            // SAFETY: `limited` borrows `buf`'s unfilled region, so its first
            // `filled` bytes are initialized bytes of `buf`.
            unsafe { buf.assume_init(filled) };
            buf.advance(filled);
            gate.complete();
            Poll::Ready(Ok(()))
        }
        Poll::Ready(Err(e)) => {
            gate.complete();
            Poll::Ready(Err(e))
        }
        Poll::Pending => Poll::Pending,
    }
}
