//! # tokio-pace
//!
//! Bandwidth shaping for asynchronous byte streams.
//!
//! This crate wraps any [`AsyncRead`](tokio::io::AsyncRead) /
//! [`AsyncWrite`](tokio::io::AsyncWrite) transport and paces the bytes
//! flowing through it against a shared [`RateLimit`](pace_limit::RateLimit).
//! Each direction has its own budget, so a connection can be shaped to,
//! say, 1 MiB/s down and 64 KiB/s up with a single limiter. Requests are
//! split into chunks of the limiter's configured size and each chunk is
//! charged before it touches the transport, which keeps large transfers
//! smooth instead of bursty.
//!
//! ## The Adapters
//!
//! - [`ThrottledStream`] wraps a single full-duplex stream such as a
//!   [`TcpStream`](tokio::net::TcpStream).
//! - [`ThrottledReadWriter`] wraps a separate reader and writer when the
//!   two directions are distinct objects.
//!
//! Several adapters may share one `Arc<RateLimit>`, in which case their
//! combined throughput is held to the configured rates.
//!
//! ## Cancellation
//!
//! Each adapter takes a [`CancellationToken`](tokio_util::sync::CancellationToken).
//! A paced call that is waiting for bandwidth wakes immediately when the
//! token fires and fails with an [`io::Error`](std::io::Error) wrapping
//! [`ThrottleError::Cancelled`]. Chunks already moved stay counted in the
//! call's partial result, and once the token has fired every subsequent
//! read or write on that adapter fails the same way.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use pace_limit::RateLimit;
//! use tokio::io::AsyncWriteExt;
//! use tokio_pace::ThrottledStream;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> std::io::Result<()> {
//! let (near, far) = tokio::io::duplex(1024);
//!
//! // 1 KiB/s each way, charged in whole-request chunks.
//! let limit = Arc::new(RateLimit::new(1024, 1024, 0));
//! let mut paced = ThrottledStream::new(near, limit, CancellationToken::new());
//!
//! paced.write_all(b"ping").await?;
//! # drop(far);
//! # Ok(()) }
//! ```

mod error;
mod gate;
mod pair;
mod stream;

#[cfg(test)]
mod tests;

pub use error::ThrottleError;
pub use pair::ThrottledReadWriter;
pub use stream::ThrottledStream;
