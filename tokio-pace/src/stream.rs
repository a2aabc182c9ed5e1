use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use pin_project_lite::pin_project;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::ReadBuf;
use tokio_util::sync::CancellationToken;

use pace_limit::Direction;
use pace_limit::RateLimit;

use crate::gate::ChunkGate;
use crate::gate::poll_read_limited;
use crate::gate::poll_write_limited;

pin_project! {
    /// A full-duplex stream paced by a shared [`RateLimit`].
    ///
    /// Reads and writes are split into chunks and charged against the
    /// limiter's respective budgets before they touch the inner stream.
    /// `flush` and `shutdown` pass through unthrottled, so closing a
    /// connection never queues behind its own traffic.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    ///
    /// use pace_limit::RateLimit;
    /// use tokio::io::AsyncWriteExt;
    /// use tokio::net::TcpStream;
    /// use tokio_pace::ThrottledStream;
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> std::io::Result<()> {
    /// let limit = Arc::new(RateLimit::new(64 * 1024, 64 * 1024, 4096));
    /// let stream = TcpStream::connect("127.0.0.1:4000").await?;
    /// let mut paced = ThrottledStream::new(stream, limit, CancellationToken::new());
    /// paced.write_all(b"hello").await?;
    /// # Ok(()) }
    /// ```
    pub struct ThrottledStream<T> {
        #[pin]
        inner: T,
        limit: Arc<RateLimit>,
        read_gate: ChunkGate,
        write_gate: ChunkGate,
    }
}

impl<T> ThrottledStream<T> {
    /// Wraps `stream`, pacing it against `limit`.
    ///
    /// `cancel` aborts transfers waiting for bandwidth: it is checked at
    /// every chunk boundary and raced against each back-off, and once fired
    /// all subsequent reads and writes fail with
    /// [`ThrottleError::Cancelled`](crate::ThrottleError::Cancelled).
    pub fn new(stream: T, limit: Arc<RateLimit>, cancel: CancellationToken) -> Self {
        Self {
            inner: stream,
            limit,
            read_gate: ChunkGate::new(Direction::Read, cancel.clone()),
            write_gate: ChunkGate::new(Direction::Write, cancel),
        }
    }

    /// Gets a reference to the wrapped stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Gets a mutable reference to the wrapped stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consumes the wrapper, returning the wrapped stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: AsyncRead> AsyncRead for ThrottledStream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        poll_read_limited(this.inner, this.read_gate, this.limit, cx, buf)
    }
}

impl<T: AsyncWrite> AsyncWrite for ThrottledStream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        poll_write_limited(this.inner, this.write_gate, this.limit, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

impl<T: fmt::Debug> fmt::Debug for ThrottledStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}
