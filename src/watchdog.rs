//! Per-connection inactivity watchdog.
//!
//! The watchdog is a single task that owns its timer outright. The session
//! handler only talks to it through a reset channel, and every reset is a
//! rendezvous: the handler waits until the watchdog has acknowledged the
//! new deadline before it reads the next line.
//!
//! ```text
//!            Reset
//!           ┌─────┐
//!           ▼     │
//!        Running ─┘ ── Elapsed ──► Fired     (notice sent, connection closed)
//!           │
//!           └────── Released ───► Stopped   (handler gone or connection closed)
//! ```

use crate::connection::Connection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info};

/// Written to the client right before an idle connection is closed.
pub const INACTIVITY_NOTICE: &[u8] = b"Disconnected due to inactivity.\n";

/// Watchdog lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Running,
    /// The deadline elapsed and the watchdog closed the connection.
    Fired,
    /// The session ended some other way.
    Stopped,
}

/// Inputs that drive [`WatchdogState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogEvent {
    Reset,
    Elapsed,
    Released,
}

impl WatchdogState {
    /// Apply `event`. `Fired` and `Stopped` are terminal.
    pub fn on(self, event: WatchdogEvent) -> Self {
        match (self, event) {
            (WatchdogState::Running, WatchdogEvent::Reset) => WatchdogState::Running,
            (WatchdogState::Running, WatchdogEvent::Elapsed) => WatchdogState::Fired,
            (WatchdogState::Running, WatchdogEvent::Released) => WatchdogState::Stopped,
            (terminal, _) => terminal,
        }
    }
}

type ResetAck = oneshot::Sender<()>;

/// Handle held by the session handler.
pub struct Watchdog {
    resets: mpsc::Sender<ResetAck>,
    task: JoinHandle<WatchdogState>,
}

impl Watchdog {
    /// Start a watchdog for `conn` with the given silence period.
    pub fn spawn(conn: Arc<Connection>, timeout: Duration) -> Self {
        let (resets, rx) = mpsc::channel(1);
        let task = tokio::spawn(run(conn, timeout, rx));
        Self { resets, task }
    }

    /// Restart the silence period, waiting for the watchdog to confirm.
    ///
    /// Returns `false` if the watchdog is no longer running, in which case
    /// the connection is closed or about to be.
    pub async fn reset(&self) -> bool {
        let (ack, confirmed) = oneshot::channel();
        if self.resets.send(ack).await.is_err() {
            return false;
        }
        confirmed.await.is_ok()
    }

    /// Release the watchdog and wait for its final state.
    pub async fn stop(self) -> WatchdogState {
        let Watchdog { resets, task } = self;
        drop(resets);
        match task.await {
            Ok(state) => state,
            Err(e) => {
                debug!(error = %e, "Watchdog task ended abnormally");
                WatchdogState::Stopped
            }
        }
    }
}

async fn run(
    conn: Arc<Connection>,
    timeout: Duration,
    mut resets: mpsc::Receiver<ResetAck>,
) -> WatchdogState {
    let mut state = WatchdogState::Running;
    let deadline = time::sleep(timeout);
    tokio::pin!(deadline);

    while state == WatchdogState::Running {
        let event = tokio::select! {
            // A reset already handed over must win against a deadline
            // elapsing in the same instant.
            biased;

            reset = resets.recv() => match reset {
                Some(ack) => {
                    deadline.as_mut().reset(Instant::now() + timeout);
                    let _ = ack.send(());
                    WatchdogEvent::Reset
                }
                None => WatchdogEvent::Released,
            },
            _ = conn.closed() => WatchdogEvent::Released,
            _ = &mut deadline => WatchdogEvent::Elapsed,
        };

        state = state.on(event);
    }

    if state == WatchdogState::Fired {
        if conn.close_with_notice(INACTIVITY_NOTICE).await {
            info!(peer = %conn.peer(), "Closing idle connection");
        } else {
            // Lost the race against another close; nothing was sent.
            state = WatchdogState::Stopped;
        }
    }

    debug!(peer = %conn.peer(), ?state, "Watchdog finished");
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_state_transitions() {
        use WatchdogEvent::*;
        use WatchdogState::*;

        assert_eq!(Running.on(Reset), Running);
        assert_eq!(Running.on(Elapsed), Fired);
        assert_eq!(Running.on(Released), Stopped);

        for event in [Reset, Elapsed, Released] {
            assert_eq!(Fired.on(event), Fired);
            assert_eq!(Stopped.on(event), Stopped);
        }
    }

    #[tokio::test]
    async fn test_fires_after_silence() {
        let (mut client, server) = tokio::io::duplex(256);
        let conn = Connection::new("127.0.0.1:10", server, Duration::from_secs(5));
        let watchdog = Watchdog::spawn(Arc::clone(&conn), Duration::from_millis(50));

        let mut received = String::new();
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "Disconnected due to inactivity.\n");
        assert!(conn.is_closed());

        assert!(!watchdog.reset().await);
        assert_eq!(watchdog.stop().await, WatchdogState::Fired);
    }

    #[tokio::test]
    async fn test_reset_extends_deadline() {
        let (_client, server) = tokio::io::duplex(256);
        let conn = Connection::new("127.0.0.1:11", server, Duration::from_secs(5));
        let watchdog = Watchdog::spawn(Arc::clone(&conn), Duration::from_millis(150));

        for _ in 0..4 {
            time::sleep(Duration::from_millis(75)).await;
            assert!(watchdog.reset().await);
        }
        // 300ms in, well past the first deadline
        assert!(!conn.is_closed());

        time::timeout(Duration::from_secs(2), conn.closed())
            .await
            .unwrap();
        assert_eq!(watchdog.stop().await, WatchdogState::Fired);
    }

    #[tokio::test]
    async fn test_stop_before_deadline() {
        let (_client, server) = tokio::io::duplex(256);
        let conn = Connection::new("127.0.0.1:12", server, Duration::from_secs(5));
        let watchdog = Watchdog::spawn(Arc::clone(&conn), Duration::from_secs(30));

        assert!(watchdog.reset().await);
        assert_eq!(watchdog.stop().await, WatchdogState::Stopped);
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_stops_when_connection_closed() {
        let (mut client, server) = tokio::io::duplex(256);
        let conn = Connection::new("127.0.0.1:13", server, Duration::from_secs(5));
        let watchdog = Watchdog::spawn(Arc::clone(&conn), Duration::from_millis(50));

        conn.write(b"Goodbye!\n").await.unwrap();
        assert!(conn.close().await);
        time::sleep(Duration::from_millis(100)).await;

        assert_eq!(watchdog.stop().await, WatchdogState::Stopped);
        let mut received = String::new();
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "Goodbye!\n");
    }
}
