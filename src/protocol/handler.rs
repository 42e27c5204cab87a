//! Session handler: one task per client.
//!
//! Reads lines, resets the watchdog, records each line in the client's log
//! and answers through the dispatcher until the client leaves, a read
//! fails, or the connection is closed underneath it.

use super::frame::{Frame, LineFramer};
use super::parser::{self, Response};
use crate::client_log::{self, ConnectionEvent, EventLog, LogSink, StdoutEvents};
use crate::connection::Connection;
use crate::watchdog::{Watchdog, INACTIVITY_NOTICE};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

/// Per-session settings, cloned into each connection task.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Silence period enforced by the watchdog.
    pub idle_timeout: Duration,
    /// Deadline for each individual read.
    pub read_timeout: Duration,
    /// Deadline for each reply or notice the client has to accept.
    pub write_timeout: Duration,
    /// Directory receiving the per-client log files.
    pub log_dir: PathBuf,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            log_dir: PathBuf::from("."),
        }
    }
}

/// Records the disconnect event when the session goes away, however it ends.
struct DisconnectGuard<'a, E: EventLog> {
    events: &'a E,
    peer: &'a str,
}

impl<E: EventLog> Drop for DisconnectGuard<'_, E> {
    fn drop(&mut self) {
        self.events.record(self.peer, ConnectionEvent::Disconnected);
    }
}

/// Serve one client over `stream` until the session ends.
///
/// Errors never leave this function: every failure ends only this session.
pub async fn handle_connection<S>(stream: S, peer: String, settings: SessionSettings)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    handle_connection_with_events(stream, peer, settings, StdoutEvents).await;
}

/// [`handle_connection`], reporting connect and disconnect to `events`.
pub async fn handle_connection_with_events<S, E>(
    stream: S,
    peer: String,
    settings: SessionSettings,
    events: E,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
    E: EventLog,
{
    events.record(&peer, ConnectionEvent::Connected);
    let _disconnect = DisconnectGuard {
        events: &events,
        peer: &peer,
    };

    let sink = client_log::open_sink(&settings.log_dir, &peer).await;
    handle_connection_with_sink(stream, peer.clone(), settings, sink).await;
}

/// The session itself, logging client lines to `sink`.
///
/// Connect and disconnect events are left to the caller.
pub async fn handle_connection_with_sink<S>(
    stream: S,
    peer: String,
    settings: SessionSettings,
    mut sink: Box<dyn LogSink>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let conn = Connection::new(peer.clone(), writer, settings.write_timeout);
    let watchdog = Watchdog::spawn(Arc::clone(&conn), settings.idle_timeout);

    run_session(&mut reader, &conn, &watchdog, sink.as_mut(), &settings).await;

    sink.close().await;
    // Also cuts short a watchdog notice stuck on a client that stopped reading.
    conn.close().await;
    let state = watchdog.stop().await;
    debug!(%peer, watchdog = ?state, "Session finished");
}

async fn run_session<R>(
    reader: &mut R,
    conn: &Connection,
    watchdog: &Watchdog,
    sink: &mut dyn LogSink,
    settings: &SessionSettings,
) where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::default();

    loop {
        let frame = tokio::select! {
            biased;

            _ = conn.closed() => {
                trace!(peer = %conn.peer(), "Connection closed during read");
                return;
            }
            read = tokio::time::timeout(settings.read_timeout, framer.next_frame(reader)) => {
                match read {
                    Ok(Ok(Some(frame))) => frame,
                    Ok(Ok(None)) => {
                        trace!(peer = %conn.peer(), "Connection closed by client");
                        return;
                    }
                    Ok(Err(e)) => {
                        debug!(peer = %conn.peer(), error = %e, "Read failed");
                        return;
                    }
                    Err(_) => {
                        debug!(peer = %conn.peer(), "Read deadline elapsed");
                        conn.close_with_notice(INACTIVITY_NOTICE).await;
                        return;
                    }
                }
            }
        };

        let line = match frame {
            Frame::Line(line) => line,
            Frame::TooLong => {
                // Oversized input does not count as activity.
                if conn.write(Response::TOO_LONG.as_bytes()).await.is_err() {
                    return;
                }
                continue;
            }
        };

        if !watchdog.reset().await {
            trace!(peer = %conn.peer(), closed = conn.is_closed(), "Watchdog no longer running");
            return;
        }

        let input = line.trim();
        sink.append(input).await;

        let action = parser::dispatch(input);
        if let Err(e) = conn.write(action.text().as_bytes()).await {
            debug!(peer = %conn.peer(), error = %e, "Write failed");
            return;
        }
        if action.closes() {
            return;
        }
    }
}
