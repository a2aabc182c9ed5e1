//! Copies a megabyte through a paced stream and reports the effective rate.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use pace_limit::RateLimit;
use tokio::io::AsyncWriteExt;
use tokio_pace::ThrottledStream;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> io::Result<()> {
    let limit = Arc::new(RateLimit::new(0, 256 * 1024, 4096));
    let (near, mut far) = tokio::io::duplex(64 * 1024);
    let mut paced = ThrottledStream::new(near, Arc::clone(&limit), CancellationToken::new());

    let drain = tokio::spawn(async move {
        let mut sink = tokio::io::sink();
        tokio::io::copy(&mut far, &mut sink).await
    });

    let payload = vec![0u8; 1024 * 1024];
    let start = Instant::now();
    paced.write_all(&payload).await?;
    paced.shutdown().await?;
    let moved = drain.await.expect("drain task panicked")?;
    let elapsed = start.elapsed();

    println!(
        "moved {moved} bytes in {elapsed:.2?} ({:.0} B/s effective)",
        moved as f64 / elapsed.as_secs_f64()
    );
    Ok(())
}
