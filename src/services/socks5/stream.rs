//! In-memory byte stream backed by session packet queues
//!
//! A `QueueStream` gives the SOCKS engine and the relay an ordinary
//! `AsyncRead + AsyncWrite` view of one multiplexed session. Reads drain a
//! per-session channel fed by the control-channel driver; writes buffer and,
//! on flush, emit exactly one packet into the shared outbound channel.
//! Channel backpressure is the flow control: a full outbound channel parks
//! the flush until the driver drains it.

use crate::services::socks5::packet::SocksPacket;
use bytes::{Bytes, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

/// Capacity of a per-session inbound queue
pub const SESSION_QUEUE_CAPACITY: usize = 32;

/// One end of a multiplexed session, usable wherever a socket is expected.
///
/// An inbound item of `None` signals end-of-stream; `shutdown` emits the
/// close sentinel for the session exactly once.
pub struct QueueStream {
    session_id: String,
    inbound: mpsc::Receiver<Option<Bytes>>,
    pending: Bytes,
    read_eof: bool,
    write_buf: BytesMut,
    outbound: PollSender<SocksPacket>,
    shutdown_sent: bool,
}

impl QueueStream {
    /// Create a stream for `session_id` plus the sender its driver feeds
    pub fn new(
        session_id: impl Into<String>,
        outbound: mpsc::Sender<SocksPacket>,
    ) -> (Self, mpsc::Sender<Option<Bytes>>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        let stream = QueueStream {
            session_id: session_id.into(),
            inbound: inbound_rx,
            pending: Bytes::new(),
            read_eof: false,
            write_buf: BytesMut::new(),
            outbound: PollSender::new(outbound),
            shutdown_sent: false,
        };
        (stream, inbound_tx)
    }

    /// The session this stream belongs to
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn closed() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "outbound channel closed")
    }
}

impl AsyncRead for QueueStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = self.get_mut();
        loop {
            if !me.pending.is_empty() {
                let take = me.pending.len().min(buf.remaining());
                buf.put_slice(&me.pending.split_to(take));
                return Poll::Ready(Ok(()));
            }
            if me.read_eof {
                return Poll::Ready(Ok(()));
            }
            match ready!(me.inbound.poll_recv(cx)) {
                Some(Some(chunk)) => me.pending = chunk,
                // close sentinel or dropped driver, either way EOF
                Some(None) | None => {
                    me.read_eof = true;
                    return Poll::Ready(Ok(()));
                }
            }
        }
    }
}

impl AsyncWrite for QueueStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let me = self.get_mut();
        me.write_buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let me = self.get_mut();
        if me.write_buf.is_empty() {
            return Poll::Ready(Ok(()));
        }
        ready!(me.outbound.poll_reserve(cx)).map_err(|_| Self::closed())?;
        let chunk = me.write_buf.split().freeze();
        let packet = SocksPacket::data(me.session_id.clone(), &chunk);
        me.outbound.send_item(packet).map_err(|_| Self::closed())?;
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(self.as_mut().poll_flush(cx))?;
        let me = self.get_mut();
        if me.shutdown_sent {
            return Poll::Ready(Ok(()));
        }
        // a driver gone at shutdown time is not an error worth surfacing
        if me.outbound.poll_reserve(cx).is_ready() {
            let _ = me.outbound.send_item(SocksPacket::close(me.session_id.clone()));
            me.shutdown_sent = true;
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_read_drains_inbound_chunks() {
        let (out_tx, _out_rx) = mpsc::channel(4);
        let (mut stream, inbound) = QueueStream::new("s1", out_tx);

        inbound.send(Some(Bytes::from_static(b"hello "))).await.unwrap();
        inbound.send(Some(Bytes::from_static(b"world"))).await.unwrap();
        inbound.send(None).await.unwrap();

        let mut collected = Vec::new();
        stream.read_to_end(&mut collected).await.unwrap();
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn test_partial_reads_preserve_order() {
        let (out_tx, _out_rx) = mpsc::channel(4);
        let (mut stream, inbound) = QueueStream::new("s1", out_tx);
        inbound.send(Some(Bytes::from_static(b"abcdef"))).await.unwrap();

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abcd");
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ef");
    }

    #[tokio::test]
    async fn test_read_pending_without_data() {
        let (out_tx, _out_rx) = mpsc::channel(4);
        let (mut stream, _inbound) = QueueStream::new("s1", out_tx);
        let mut buf = [0u8; 8];
        let mut read = tokio_test::task::spawn(stream.read(&mut buf));
        assert!(read.poll().is_pending());
    }

    #[tokio::test]
    async fn test_dropped_driver_reads_as_eof() {
        let (out_tx, _out_rx) = mpsc::channel(4);
        let (mut stream, inbound) = QueueStream::new("s1", out_tx);
        drop(inbound);

        let mut collected = Vec::new();
        stream.read_to_end(&mut collected).await.unwrap();
        assert!(collected.is_empty());
    }

    #[tokio::test]
    async fn test_flush_emits_one_packet() {
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let (mut stream, _inbound) = QueueStream::new("s1", out_tx);

        stream.write_all(b"part one ").await.unwrap();
        stream.write_all(b"part two").await.unwrap();
        stream.flush().await.unwrap();

        let packet = out_rx.recv().await.unwrap();
        assert_eq!(packet.session_id, "s1");
        assert_eq!(
            packet.payload().unwrap().unwrap().as_ref(),
            b"part one part two"
        );
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_flush_emits_nothing() {
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let (mut stream, _inbound) = QueueStream::new("s1", out_tx);
        stream.flush().await.unwrap();
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_then_sends_close() {
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let (mut stream, _inbound) = QueueStream::new("s1", out_tx);

        stream.write_all(b"tail").await.unwrap();
        stream.shutdown().await.unwrap();

        let packet = out_rx.recv().await.unwrap();
        assert_eq!(packet.payload().unwrap().unwrap().as_ref(), b"tail");
        let packet = out_rx.recv().await.unwrap();
        assert!(packet.is_close());

        // a second shutdown is a no-op
        stream.shutdown().await.unwrap();
        assert!(out_rx.try_recv().is_err());
    }
}
