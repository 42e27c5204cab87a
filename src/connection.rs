//! Client connection shared by a session handler and its watchdog.
//!
//! The write half lives behind an async mutex. Closing happens in two steps:
//! a closer first claims the close (so only one of them may send a farewell
//! notice), then flips a `watch` flag and drops the writer. The flag is the
//! one cancellation signal for the session: anything waiting on
//! [`Connection::closed`] wakes up, including writes stuck on a peer that
//! stopped reading, which let go of the writer lock as soon as it flips.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::time;
use tracing::trace;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The writable side of one client session.
pub struct Connection {
    peer: String,
    writer: Mutex<Option<BoxedWriter>>,
    closing: AtomicBool,
    closed: watch::Sender<bool>,
    write_timeout: Duration,
}

impl Connection {
    /// Wrap `writer`. Every write, notice and shutdown is bounded by
    /// `write_timeout`.
    pub fn new<W>(peer: impl Into<String>, writer: W, write_timeout: Duration) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            peer: peer.into(),
            writer: Mutex::new(Some(Box::new(writer))),
            closing: AtomicBool::new(false),
            closed,
            write_timeout,
        })
    }

    /// Remote address of the client.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write `data` to the client.
    ///
    /// Fails with `NotConnected` once a close has started, and with
    /// `TimedOut` if the peer does not take the data in time.
    pub async fn write(&self, data: &[u8]) -> io::Result<()> {
        if self.closing.load(Ordering::Acquire) {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.write_bounded(data).await
    }

    /// Close the connection. Returns `true` if this call claimed the close.
    ///
    /// A later call still finishes a close another closer has claimed, so a
    /// notice stuck on a full send buffer is abandoned rather than waited on.
    pub async fn close(&self) -> bool {
        let claimed = !self.closing.swap(true, Ordering::AcqRel);
        self.finish_close().await;
        claimed
    }

    /// Write a final `notice` and close.
    ///
    /// Only the caller that claims the close writes anything, so two racing
    /// closers never produce two notices.
    pub async fn close_with_notice(&self, notice: &[u8]) -> bool {
        if self.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Err(e) = self.write_bounded(notice).await {
            trace!(peer = %self.peer, error = %e, "Failed to deliver close notice");
        }
        self.finish_close().await;
        true
    }

    async fn write_bounded(&self, data: &[u8]) -> io::Result<()> {
        tokio::select! {
            biased;

            _ = self.closed() => Err(io::ErrorKind::NotConnected.into()),
            written = time::timeout(self.write_timeout, self.write_locked(data)) => {
                written.unwrap_or_else(|_| Err(io::ErrorKind::TimedOut.into()))
            }
        }
    }

    async fn write_locked(&self, data: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(io::ErrorKind::NotConnected)?;
        writer.write_all(data).await?;
        writer.flush().await
    }

    async fn finish_close(&self) {
        // Pending writes see the flag and drop the lock.
        self.closed.send_replace(true);
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            match time::timeout(self.write_timeout, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => trace!(peer = %self.peer, error = %e, "Shutdown on close failed"),
                Err(_) => trace!(peer = %self.peer, "Shutdown on close timed out"),
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, server) = tokio::io::duplex(64);
        let conn = Connection::new("127.0.0.1:1", server, WRITE_TIMEOUT);

        assert!(!conn.is_closed());
        assert!(conn.close().await);
        assert!(conn.is_closed());
        assert!(!conn.close().await);
        assert!(!conn.close_with_notice(b"late\n").await);

        let err = conn.write(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        let mut client = client;
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_close_with_notice_writes_once() {
        let (mut client, server) = tokio::io::duplex(64);
        let conn = Connection::new("127.0.0.1:2", server, WRITE_TIMEOUT);

        conn.write(b"hi\n").await.unwrap();
        let (first, second) = tokio::join!(
            conn.close_with_notice(b"bye\n"),
            conn.close_with_notice(b"bye\n")
        );
        assert!(first ^ second);

        let mut received = String::new();
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "hi\nbye\n");
    }

    #[tokio::test]
    async fn test_closed_wakes_waiters() {
        let (_client, server) = tokio::io::duplex(64);
        let conn = Connection::new("127.0.0.1:3", server, WRITE_TIMEOUT);

        let waiter = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.closed().await })
        };
        time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        conn.close().await;
        time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        // Already closed: resolves immediately
        conn.closed().await;
    }

    #[tokio::test]
    async fn test_close_abandons_notice_stuck_on_full_buffer() {
        // The peer never reads, so the notice cannot fit.
        let (_client, server) = tokio::io::duplex(8);
        let conn = Connection::new("127.0.0.1:4", server, Duration::from_secs(60));

        let notifier = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                conn.close_with_notice(b"Disconnected due to inactivity.\n")
                    .await
            })
        };
        time::sleep(Duration::from_millis(50)).await;
        assert!(!notifier.is_finished());
        assert!(!conn.is_closed());

        // A second closer forces the first one to give up.
        let forced = time::timeout(Duration::from_secs(1), conn.close())
            .await
            .unwrap();
        assert!(!forced);
        assert!(conn.is_closed());
        assert!(time::timeout(Duration::from_secs(1), notifier)
            .await
            .unwrap()
            .unwrap());
    }

    #[tokio::test]
    async fn test_write_to_stalled_peer_times_out() {
        let (_client, server) = tokio::io::duplex(8);
        let conn = Connection::new("127.0.0.1:5", server, Duration::from_millis(100));

        let err = time::timeout(Duration::from_secs(1), conn.write(&[b'z'; 64]))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        // The lock was released, so closing does not hang either.
        assert!(time::timeout(Duration::from_secs(1), conn.close())
            .await
            .unwrap());
    }
}
