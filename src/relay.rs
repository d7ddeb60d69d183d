//! Bidirectional byte relay between two streams
//!
//! Copies in both directions with a per-direction idle timeout. When either
//! direction sees EOF, an error, or goes idle, both directions are torn down;
//! each writer is flushed and shut down so the peer observes end-of-stream.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Size of each read chunk while relaying
pub const RELAY_BUF_SIZE: usize = 4096;

/// Relay bytes between `a` and `b` until either side closes or goes idle.
///
/// Returns the byte counts copied in each direction, `(a_to_b, b_to_a)`.
pub async fn relay<A, B>(a: A, b: B, idle_timeout: Duration) -> io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);
    let stop = CancellationToken::new();

    let (a_to_b, b_to_a) = tokio::join!(
        pump(a_read, b_write, idle_timeout, stop.clone()),
        pump(b_read, a_write, idle_timeout, stop.clone()),
    );

    let (a_to_b, b_to_a) = (a_to_b?, b_to_a?);
    debug!(a_to_b, b_to_a, "relay finished");
    Ok((a_to_b, b_to_a))
}

async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    idle_timeout: Duration,
    stop: CancellationToken,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; RELAY_BUF_SIZE];
    let mut copied = 0u64;

    let result = loop {
        let read = tokio::select! {
            _ = stop.cancelled() => break Ok(()),
            read = timeout(idle_timeout, reader.read(&mut buf)) => read,
        };
        match read {
            Ok(Ok(0)) => break Ok(()),
            Ok(Ok(n)) => {
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    break Err(e);
                }
                if let Err(e) = writer.flush().await {
                    break Err(e);
                }
                copied += n as u64;
            }
            Ok(Err(e)) => break Err(e),
            Err(_) => {
                trace!("relay direction idle, closing");
                break Ok(());
            }
        }
    };

    // tear down both directions and signal end-of-stream to the peer
    stop.cancel();
    let _ = writer.flush().await;
    let _ = writer.shutdown().await;
    result.map(|_| copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_relay_copies_both_directions() {
        let (left_near, left_far) = duplex(64);
        let (right_near, right_far) = duplex(64);

        let relay_task =
            tokio::spawn(relay(left_far, right_far, Duration::from_secs(5)));

        let (mut left, mut right) = (left_near, right_near);
        left.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        right.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        right.write_all(b"pong").await.unwrap();
        left.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        // closing one side tears down the relay
        drop(left);
        let (a_to_b, b_to_a) = relay_task.await.unwrap().unwrap();
        assert_eq!(a_to_b, 4);
        assert_eq!(b_to_a, 4);
    }

    #[tokio::test]
    async fn test_relay_propagates_eof() {
        let (left_near, left_far) = duplex(64);
        let (right_near, right_far) = duplex(64);
        let relay_task =
            tokio::spawn(relay(left_far, right_far, Duration::from_secs(5)));

        drop(left_near);
        let mut right = right_near;
        let mut out = Vec::new();
        right.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
        relay_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_relay_idle_timeout_closes() {
        let (left_near, left_far) = duplex(64);
        let (right_near, right_far) = duplex(64);
        let relay_task =
            tokio::spawn(relay(left_far, right_far, Duration::from_millis(50)));

        // keep both client halves alive and silent
        let mut right = right_near;
        let mut out = Vec::new();
        right.read_to_end(&mut out).await.unwrap();
        relay_task.await.unwrap().unwrap();
        drop(left_near);
    }

    #[tokio::test]
    async fn test_relay_large_transfer() {
        let (left_near, left_far) = duplex(8192);
        let (right_near, right_far) = duplex(8192);
        let relay_task =
            tokio::spawn(relay(left_far, right_far, Duration::from_secs(5)));

        let payload = vec![0xA5u8; RELAY_BUF_SIZE * 3 + 17];
        let expected = payload.clone();
        let mut left = left_near;
        let writer = tokio::spawn(async move {
            left.write_all(&payload).await.unwrap();
            left.shutdown().await.unwrap();
            left
        });

        let mut right = right_near;
        let mut out = Vec::new();
        right.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, expected);
        writer.await.unwrap();
        relay_task.await.unwrap().unwrap();
    }
}
