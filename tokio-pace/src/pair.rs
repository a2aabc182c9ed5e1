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
    /// A reader/writer pair paced by a shared [`RateLimit`].
    ///
    /// Unlike [`ThrottledStream`](crate::ThrottledStream), the two halves
    /// are independent values: bytes read from `reader` are charged
    /// against the read budget, bytes written to `writer` against the
    /// write budget. Useful when the two directions are distinct objects,
    /// such as a process's stdout and stdin.
    pub struct ThrottledReadWriter<R, W> {
        #[pin]
        reader: R,
        #[pin]
        writer: W,
        limit: Arc<RateLimit>,
        read_gate: ChunkGate,
        write_gate: ChunkGate,
    }
}

impl<R, W> ThrottledReadWriter<R, W> {
    /// Wraps `reader` and `writer`, pacing both against `limit`.
    ///
    /// `cancel` covers both halves; see
    /// [`ThrottledStream::new`](crate::ThrottledStream::new) for its
    /// semantics.
    pub fn new(reader: R, writer: W, limit: Arc<RateLimit>, cancel: CancellationToken) -> Self {
        Self {
            reader,
            writer,
            limit,
            read_gate: ChunkGate::new(Direction::Read, cancel.clone()),
            write_gate: ChunkGate::new(Direction::Write, cancel),
        }
    }

    /// Gets a reference to the wrapped reader.
    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Gets a reference to the wrapped writer.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Consumes the wrapper, returning the wrapped reader and writer.
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: AsyncRead, W> AsyncRead for ThrottledReadWriter<R, W> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        poll_read_limited(this.reader, this.read_gate, this.limit, cx, buf)
    }
}

impl<R, W: AsyncWrite> AsyncWrite for ThrottledReadWriter<R, W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        poll_write_limited(this.writer, this.write_gate, this.limit, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().writer.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().writer.poll_shutdown(cx)
    }
}

impl<R: fmt::Debug, W: fmt::Debug> fmt::Debug for ThrottledReadWriter<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottledReadWriter")
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .finish()
    }
}
