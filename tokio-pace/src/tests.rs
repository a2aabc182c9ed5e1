use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use more_asserts::assert_ge;
use more_asserts::assert_le;
use rand::RngCore;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::DuplexStream;
use tokio::io::duplex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use pace_limit::RateLimit;

use super::*;

/// Writer that accepts `capacity` bytes and then fails every call.
struct FailingWriter {
    capacity: usize,
    written: usize,
}

impl AsyncWrite for FailingWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.written >= self.capacity {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "wire down")));
        }
        let n = buf.len().min(self.capacity - self.written);
        self.written += n;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Builds a paced adapter whose writes loop straight back to its reads.
fn paced_loopback(
    limit: &Arc<RateLimit>,
    cancel: CancellationToken,
    capacity: usize,
) -> ThrottledReadWriter<DuplexStream, DuplexStream> {
    let (near, far) = duplex(capacity);
    ThrottledReadWriter::new(far, near, Arc::clone(limit), cancel)
}

#[tokio::test(start_paused = true)]
async fn write_then_read_is_paced() {
    let limit = Arc::new(RateLimit::new(1000, 1000, 64));
    let mut rw = paced_loopback(&limit, CancellationToken::new(), 1 << 16);

    let mut data = vec![0u8; 1000];
    rand::rng().fill_bytes(&mut data);

    // 16 chunks; every chunk after the first waits out its predecessor.
    let start = Instant::now();
    rw.write_all(&data).await.unwrap();
    let wrote = start.elapsed();
    assert_ge!(wrote, Duration::from_millis(936));
    assert_le!(wrote, Duration::from_secs(1));

    let mut read_back = vec![0u8; 1000];
    let start = Instant::now();
    rw.read_exact(&mut read_back).await.unwrap();
    let read = start.elapsed();
    assert_ge!(read, Duration::from_millis(936));
    assert_le!(read, Duration::from_secs(1));

    assert_eq!(read_back, data);
}

#[tokio::test(start_paused = true)]
async fn ten_tasks_share_one_limit() {
    let limit = Arc::new(RateLimit::new(1000, 1000, 4096));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..10 {
        let limit = Arc::clone(&limit);
        handles.push(tokio::spawn(async move {
            let mut rw = paced_loopback(&limit, CancellationToken::new(), 1 << 16);
            let mut data = vec![0u8; 1000];
            rand::rng().fill_bytes(&mut data);

            rw.write_all(&data).await.unwrap();
            let mut read_back = vec![0u8; 1000];
            rw.read_exact(&mut read_back).await.unwrap();
            assert_eq!(read_back, data);
        }));
    }
    for res in futures::future::join_all(handles).await {
        res.unwrap();
    }

    // 10 writers on a 1000 B/s budget: the last grant lands at nine
    // seconds, and the matching reads ride the same schedule for free.
    let elapsed = start.elapsed();
    assert_ge!(elapsed, Duration::from_secs(9));
    assert_le!(elapsed, Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn stream_pays_debt_across_calls() {
    let limit = Arc::new(RateLimit::new(2, 2, 0));
    let (near, far) = duplex(64);
    let mut sender = ThrottledStream::new(near, Arc::clone(&limit), CancellationToken::new());
    let mut receiver = ThrottledStream::new(far, Arc::clone(&limit), CancellationToken::new());

    // The reader returns its endpoint so the pipe stays open until both
    // writes have landed.
    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 20];
        let n = receiver.read(&mut buf).await.unwrap();
        assert_ge!(n, 1);
        receiver
    });

    // Two 10-byte writes at 2 B/s: the first is free, the second pays
    // the first one off in full.
    let start = Instant::now();
    sender.write_all(&[7u8; 10]).await.unwrap();
    sender.write_all(&[7u8; 10]).await.unwrap();
    let elapsed = start.elapsed();
    assert_ge!(elapsed, Duration::from_secs(5));
    assert_le!(elapsed, Duration::from_secs(6));

    drop(reader.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn cancellation_releases_a_blocked_write() {
    let limit = Arc::new(RateLimit::new(0, 10, 0));
    let cancel = CancellationToken::new();
    let (near, far) = duplex(64);
    let mut paced = ThrottledStream::new(near, Arc::clone(&limit), cancel.clone());

    // Instant, but leaves one second of debt behind.
    paced.write_all(&[1u8; 10]).await.unwrap();

    let blocked = tokio::spawn(async move {
        let start = Instant::now();
        let res = paced.write_all(&[2u8; 10]).await;
        (res, start.elapsed())
    });

    // Let the writer arm its back-off before the clock moves.
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(100)).await;
    cancel.cancel();

    let (res, waited) = blocked.await.unwrap();
    let err = res.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::Other);
    assert!(err.get_ref().unwrap().is::<ThrottleError>());
    assert_ge!(waited, Duration::from_millis(100));
    assert_le!(waited, Duration::from_millis(500));

    // Only the first write's bytes ever reached the wire.
    let mut delivered = Vec::new();
    let mut far = far;
    far.read_to_end(&mut delivered).await.unwrap();
    assert_eq!(delivered, vec![1u8; 10]);
}

#[tokio::test(start_paused = true)]
async fn idle_time_banks_nothing() {
    let limit = Arc::new(RateLimit::new(0, 100, 0));
    let (near, _far) = duplex(1 << 10);
    let mut paced = ThrottledStream::new(near, Arc::clone(&limit), CancellationToken::new());

    paced.write_all(&[0u8; 100]).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    // The idle minute clears the outstanding second of debt and not a
    // byte more.
    let start = Instant::now();
    paced.write_all(&[0u8; 100]).await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);

    let start = Instant::now();
    paced.write_all(&[0u8; 100]).await.unwrap();
    assert_ge!(start.elapsed(), Duration::from_secs(1));
    assert_le!(start.elapsed(), Duration::from_millis(1100));
}

#[tokio::test(start_paused = true)]
async fn unlimited_rates_pass_straight_through() {
    let limit = Arc::new(RateLimit::new(0, 0, 8));
    let mut rw = paced_loopback(&limit, CancellationToken::new(), 1 << 16);

    let mut data = vec![0u8; 4096];
    rand::rng().fill_bytes(&mut data);

    let start = Instant::now();
    rw.write_all(&data).await.unwrap();
    let mut read_back = vec![0u8; 4096];
    rw.read_exact(&mut read_back).await.unwrap();

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(read_back, data);
}

#[tokio::test(start_paused = true)]
async fn reconfiguration_applies_between_chunks() {
    let limit = Arc::new(RateLimit::new(0, 1000, 0));
    let (near, _far) = duplex(1 << 10);
    let mut paced = ThrottledStream::new(near, Arc::clone(&limit), CancellationToken::new());

    paced.write_all(&[0u8; 500]).await.unwrap();

    // The 500 bytes owed reprice from half a second to 50ms.
    limit.set_limits(0, 10_000, 0);

    let start = Instant::now();
    paced.write_all(&[0u8; 100]).await.unwrap();
    assert_ge!(start.elapsed(), Duration::from_millis(50));
    assert_le!(start.elapsed(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn reads_are_clamped_to_the_chunk_size() {
    let limit = Arc::new(RateLimit::new(1_000_000, 0, 16));
    let (mut near, far) = duplex(256);
    let mut receiver = ThrottledStream::new(far, Arc::clone(&limit), CancellationToken::new());

    near.write_all(&[9u8; 64]).await.unwrap();

    let mut buf = [0u8; 64];
    let n = receiver.read(&mut buf).await.unwrap();
    assert_eq!(n, 16);
    let n = receiver.read(&mut buf).await.unwrap();
    assert_eq!(n, 16);
}

#[tokio::test(start_paused = true)]
async fn eof_propagates_through_the_gate() {
    let limit = Arc::new(RateLimit::new(1000, 0, 4));
    let (near, far) = duplex(64);
    drop(near);
    let mut receiver = ThrottledStream::new(far, Arc::clone(&limit), CancellationToken::new());

    let mut buf = [0u8; 8];
    let n = receiver.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test(start_paused = true)]
async fn transport_errors_surface_with_partial_progress() {
    let limit = Arc::new(RateLimit::new(0, 1000, 8));
    let inner = FailingWriter {
        capacity: 20,
        written: 0,
    };
    let mut paced = ThrottledStream::new(inner, Arc::clone(&limit), CancellationToken::new());

    let mut moved = 0;
    let err = loop {
        match paced.write(&[0u8; 64]).await {
            Ok(n) => moved += n,
            Err(err) => break err,
        }
    };

    assert_eq!(moved, 20);
    assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
}

#[tokio::test(start_paused = true)]
async fn shutdown_passes_through_unthrottled() {
    let limit = Arc::new(RateLimit::new(0, 10, 0));
    let (near, far) = duplex(256);
    let mut paced = ThrottledStream::new(near, Arc::clone(&limit), CancellationToken::new());

    // Ten seconds of debt outstanding, yet close is immediate.
    paced.write_all(&[3u8; 100]).await.unwrap();
    let start = Instant::now();
    paced.shutdown().await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);

    let mut delivered = Vec::new();
    let mut far = far;
    far.read_to_end(&mut delivered).await.unwrap();
    assert_eq!(delivered.len(), 100);
}

#[tokio::test(start_paused = true)]
async fn fired_token_fails_the_next_chunk() {
    let limit = Arc::new(RateLimit::new(1000, 1000, 0));
    let cancel = CancellationToken::new();
    let mut rw = paced_loopback(&limit, cancel.clone(), 64);

    rw.write_all(&[5u8; 8]).await.unwrap();
    cancel.cancel();

    let err = rw.write_all(&[5u8; 8]).await.unwrap_err();
    assert!(err.get_ref().unwrap().is::<ThrottleError>());

    // Bytes that made it out before the token fired stay delivered.
    let (mut far, _near) = rw.into_inner();
    let mut delivered = [0u8; 8];
    far.read_exact(&mut delivered).await.unwrap();
    assert_eq!(delivered, [5u8; 8]);
}
