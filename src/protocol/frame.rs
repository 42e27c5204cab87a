//! Newline-delimited framing with a hard per-line limit.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum line length in bytes, excluding the line terminator.
pub const MAX_LINE_LENGTH: usize = 1024;

/// One unit of client input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line with its terminator removed.
    Line(String),
    /// A line longer than the limit. Its bytes have been dropped.
    TooLong,
}

/// Splits a byte stream into [`Frame`]s.
///
/// Each read asks for at most one line's worth of bytes (limit plus room for
/// `\r\n`), so the scan buffer stays within about twice the limit however
/// fast the peer sends. An oversized line is reported once and the rest of
/// it is skipped up to its `\n`.
#[derive(Debug)]
pub struct LineFramer {
    buffer: BytesMut,
    max_len: usize,
    discarding: bool,
    eof: bool,
}

impl LineFramer {
    pub fn new(max_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_len + 2),
            max_len,
            discarding: false,
            eof: false,
        }
    }

    /// Append raw bytes to the scan buffer.
    #[cfg(test)]
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete frame out of the buffer, if there is one.
    pub fn decode(&mut self) -> Option<Frame> {
        loop {
            let newline = self.buffer.iter().position(|&b| b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        self.buffer.advance(pos + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.buffer.clear();
                        return None;
                    }
                }
            }

            return match newline {
                Some(pos) => {
                    let line = self.buffer.split_to(pos + 1);
                    Some(self.frame(&line[..pos]))
                }
                None if self.buffer.len() > self.max_len + 1 => {
                    self.buffer.clear();
                    self.discarding = true;
                    Some(Frame::TooLong)
                }
                None => None,
            };
        }
    }

    /// Take whatever is left once the peer has stopped sending.
    ///
    /// A final line without a terminator is still a line.
    pub fn decode_eof(&mut self) -> Option<Frame> {
        if let Some(frame) = self.decode() {
            return Some(frame);
        }
        if self.discarding || self.buffer.is_empty() {
            self.buffer.clear();
            return None;
        }
        let rest = self.buffer.split();
        Some(self.frame(&rest))
    }

    /// Read from `reader` until a frame is available.
    ///
    /// Returns `Ok(None)` when the stream is finished. Cancel safe: bytes
    /// already read stay in the buffer.
    pub async fn next_frame<R>(&mut self, reader: &mut R) -> std::io::Result<Option<Frame>>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(frame) = self.decode() {
                return Ok(Some(frame));
            }
            if self.eof {
                return Ok(self.decode_eof());
            }
            let n = (&mut *reader)
                .take(self.read_limit())
                .read_buf(&mut self.buffer)
                .await?;
            if n == 0 {
                self.eof = true;
            }
        }
    }

    fn read_limit(&self) -> u64 {
        (self.max_len + 2) as u64
    }

    fn frame(&self, line: &[u8]) -> Frame {
        let content = line.strip_suffix(b"\r").unwrap_or(line);
        if content.len() > self.max_len {
            Frame::TooLong
        } else {
            Frame::Line(String::from_utf8_lossy(content).into_owned())
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(MAX_LINE_LENGTH)
    }
}
