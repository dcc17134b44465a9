//! Newline-delimited JSON framing for the bridge pipes.
//!
//! Each message is one JSON object terminated by `\n`. [`LineReader`]
//! enforces a maximum line size and reports bad lines as
//! [`MalformedMessage`] values instead of errors, so a misbehaving child
//! cannot wedge or kill the reader.

use std::fmt;
use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum line size (1 MiB) to prevent unbounded memory allocation.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// How much of a rejected line is kept for diagnostics.
const EXCERPT_CHARS: usize = 120;

/// A line that could not be decoded as a JSON object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedMessage {
    pub reason: String,
    pub excerpt: String,
}

impl fmt::Display for MalformedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.excerpt.is_empty() {
            write!(f, "malformed message: {}", self.reason)
        } else {
            write!(f, "malformed message: {} ({})", self.reason, self.excerpt)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(serde_json::Map<String, serde_json::Value>),
    Malformed(MalformedMessage),
}

pub struct LineReader<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
    max_line_bytes: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_limit(reader, MAX_LINE_BYTES)
    }

    pub fn with_limit(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::new(),
            max_line_bytes,
        }
    }

    /// Read the next non-blank line.
    ///
    /// Returns `Ok(None)` on EOF. A final line without a trailing newline is
    /// still decoded.
    pub async fn next_frame(&mut self) -> io::Result<Option<Frame>> {
        loop {
            self.line.clear();
            let mut oversized = false;
            let mut saw_bytes = false;

            loop {
                let available = self.reader.fill_buf().await?;
                if available.is_empty() {
                    break;
                }
                saw_bytes = true;

                let (chunk_len, consumed, complete) =
                    match available.iter().position(|&b| b == b'\n') {
                        Some(pos) => (pos, pos + 1, true),
                        None => (available.len(), available.len(), false),
                    };

                if !oversized {
                    if self.line.len() + chunk_len > self.max_line_bytes {
                        oversized = true;
                        let keep = EXCERPT_CHARS.saturating_sub(self.line.len());
                        self.line
                            .extend_from_slice(&available[..chunk_len.min(keep)]);
                    } else {
                        self.line.extend_from_slice(&available[..chunk_len]);
                    }
                }
                self.reader.consume(consumed);

                if complete {
                    break;
                }
            }

            if !saw_bytes {
                return Ok(None);
            }

            if oversized {
                return Ok(Some(Frame::Malformed(MalformedMessage {
                    reason: format!("line exceeds {} bytes", self.max_line_bytes),
                    excerpt: excerpt(&self.line),
                })));
            }

            let text = String::from_utf8_lossy(&self.line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }

            return Ok(Some(decode(trimmed)));
        }
    }
}

fn decode(line: &str) -> Frame {
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(serde_json::Value::Object(map)) => Frame::Message(map),
        Ok(_) => Frame::Malformed(MalformedMessage {
            reason: "expected a JSON object".to_string(),
            excerpt: excerpt(line.as_bytes()),
        }),
        Err(e) => Frame::Malformed(MalformedMessage {
            reason: format!("invalid JSON: {e}"),
            excerpt: excerpt(line.as_bytes()),
        }),
    }
}

fn excerpt(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim()
        .chars()
        .take(EXCERPT_CHARS)
        .collect()
}

pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one message as a single JSON line and flush it.
    pub async fn write_message<T: Serialize>(&mut self, msg: &T) -> io::Result<()> {
        let mut body = serde_json::to_vec(msg).map_err(io::Error::other)?;
        body.push(b'\n');
        self.writer.write_all(&body).await?;
        self.writer.flush().await
    }
}
