//! Per-client message logs and process-wide connection events.
//!
//! Every client address gets its own append-only file,
//! `client_<address with ':' replaced by '_'>.log`, holding one
//! `[<RFC3339 timestamp>] <message>` record per received line.

use async_trait::async_trait;
use chrono::{Local, SecondsFormat};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Append-only destination for one client's messages.
#[async_trait]
pub trait LogSink: Send {
    /// Append a timestamped record for `message`.
    async fn append(&mut self, message: &str);

    /// Flush and release the sink. Further appends are ignored.
    async fn close(&mut self) {}
}

/// Sink backed by a log file on disk.
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    /// Open (or create) the log file for `peer` inside `dir`.
    pub async fn open(dir: &Path, peer: &str) -> std::io::Result<Self> {
        let path = dir.join(log_file_name(peer));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LogSink for FileSink {
    async fn append(&mut self, message: &str) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        // Flushed per record so the file follows arrival order.
        let record = format_record(&timestamp(), message);
        let written = match writer.write_all(record.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(path = %self.path.display(), error = %e, "Failed to write client log");
        }
    }

    async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                warn!(path = %self.path.display(), error = %e, "Failed to flush client log");
            }
        }
    }
}

/// Stand-in used when a client's log file could not be opened.
pub struct DisabledSink;

#[async_trait]
impl LogSink for DisabledSink {
    async fn append(&mut self, _message: &str) {}
}

/// Open the sink for `peer`, falling back to [`DisabledSink`] on failure.
pub async fn open_sink(dir: &Path, peer: &str) -> Box<dyn LogSink> {
    match FileSink::open(dir, peer).await {
        Ok(sink) => {
            debug!(peer, path = %sink.path().display(), "Opened client log");
            Box::new(sink)
        }
        Err(e) => {
            warn!(peer, error = %e, "Error creating log file, continuing without it");
            Box::new(DisabledSink)
        }
    }
}

/// File name used for a client's log, e.g. `client_127.0.0.1_54321.log`.
pub fn log_file_name(peer: &str) -> String {
    format!("client_{}.log", peer.replace(':', "_"))
}

/// Format a single log record, newline included.
pub fn format_record(timestamp: &str, message: &str) -> String {
    format!("[{timestamp}] {message}\n")
}

/// Current local time as RFC3339 with second precision.
pub fn timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Lifecycle events of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

impl ConnectionEvent {
    fn as_str(self) -> &'static str {
        match self {
            ConnectionEvent::Connected => "connected",
            ConnectionEvent::Disconnected => "disconnected",
        }
    }
}

/// Format an event line, without the trailing newline.
pub fn format_event(timestamp: &str, peer: &str, event: ConnectionEvent) -> String {
    format!("[{timestamp}] {peer} {}", event.as_str())
}

/// Write one event line to `out`.
pub fn write_event<W: Write>(out: &mut W, peer: &str, event: ConnectionEvent) -> std::io::Result<()> {
    writeln!(out, "{}", format_event(&timestamp(), peer, event))
}

/// Where connect/disconnect events are reported.
pub trait EventLog: Send + Sync {
    fn record(&self, peer: &str, event: ConnectionEvent);
}

/// Reports events on stdout, one line per event.
pub struct StdoutEvents;

impl EventLog for StdoutEvents {
    fn record(&self, peer: &str, event: ConnectionEvent) {
        // The stdout lock is held for the whole line
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        if let Err(e) = write_event(&mut out, peer, event) {
            debug!(peer, error = %e, "Failed to print connection event");
        }
    }
}
