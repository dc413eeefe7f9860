//! Byte-stream views over a [`Mailbox`].
//!
//! [`StreamWriter`] turns arbitrary `write` calls into chunked messages and
//! [`StreamReader`] hands received messages back out as a byte cursor. Both
//! hold at most one message at a time.

use std::sync::Arc;
use std::time::Duration;

use corrlink_models::{Content, Message, Source};
use tracing::{debug, warn};

use crate::error::SendError;
use crate::mailbox::{Mailbox, Wait};

/// Smallest staging allocation, in bytes.
pub const DEFAULT_MIN_CHUNK: usize = 64;
/// Largest staging allocation, in bytes.
pub const DEFAULT_MAX_CHUNK: usize = 1024;

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Stages written bytes into messages and enqueues them when full.
///
/// `write` never suspends: a full downstream mailbox or a refused
/// allocation drops the affected bytes and logs how many were lost.
/// [`flush`](Self::flush) waits without a bound for room downstream.
#[derive(Debug)]
pub struct StreamWriter {
    mailbox: Arc<Mailbox>,
    source: Source,
    content: Content,
    min_chunk: usize,
    max_chunk: usize,
    staging: Message,
    filled: usize,
    dropped: u64,
}

impl StreamWriter {
    /// Writer with the default chunk bounds.
    pub fn new(mailbox: Arc<Mailbox>, source: Source, content: Content) -> Self {
        Self::with_chunks(mailbox, source, content, DEFAULT_MIN_CHUNK, DEFAULT_MAX_CHUNK)
    }

    /// Writer whose staging buffers are between `min_chunk` and `max_chunk`.
    pub fn with_chunks(
        mailbox: Arc<Mailbox>,
        source: Source,
        content: Content,
        min_chunk: usize,
        max_chunk: usize,
    ) -> Self {
        let min_chunk = min_chunk.max(1);
        Self {
            mailbox,
            source,
            content,
            min_chunk,
            max_chunk: max_chunk.max(min_chunk),
            staging: Message::empty(source, content),
            filled: 0,
            dropped: 0,
        }
    }

    /// Total bytes dropped since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Bytes staged but not yet enqueued.
    pub fn pending(&self) -> usize {
        self.filled
    }

    /// Stage `bytes`; returns how many were accepted.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let mut written = 0;
        while written < bytes.len() {
            let remaining = &bytes[written..];
            if self.staging.is_empty() {
                let chunk = remaining.len().clamp(self.min_chunk, self.max_chunk);
                self.staging = Message::create(None, chunk, self.source, self.content);
                self.filled = 0;
                if self.staging.is_empty() {
                    self.drop_bytes(remaining.len(), "allocation failed");
                    return written;
                }
            }

            let space = self.staging.len() - self.filled;
            let n = space.min(remaining.len());
            self.staging.as_mut_slice()[self.filled..self.filled + n]
                .copy_from_slice(&remaining[..n]);
            self.filled += n;
            written += n;

            if self.filled == self.staging.len() {
                self.enqueue_full();
            }
        }
        written
    }

    fn enqueue_full(&mut self) {
        let msg = self.staging.take();
        self.filled = 0;
        if let Err(e) = self.mailbox.try_send(msg) {
            let lost = e.into_message().len();
            self.drop_bytes(lost, "downstream full");
        }
    }

    fn drop_bytes(&mut self, bytes: usize, reason: &str) {
        self.dropped += bytes as u64;
        warn!(mailbox = self.mailbox.tag(), bytes, reason, "stream bytes dropped");
    }

    /// Enqueue the partially filled staging buffer, shrunk to its content.
    ///
    /// Waits as long as it takes for room downstream.
    pub async fn flush(&mut self) -> Result<(), SendError> {
        if self.filled == 0 {
            return Ok(());
        }
        let mut msg = self.staging.take();
        msg.shrink_to(self.filled);
        self.filled = 0;
        self.mailbox.send(msg, Wait::Forever).await
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Presents messages pulled from a mailbox as a byte stream.
#[derive(Debug)]
pub struct StreamReader {
    mailbox: Arc<Mailbox>,
    read_timeout: Duration,
    current: Message,
    cursor: usize,
}

impl StreamReader {
    /// Reader that waits up to `read_timeout` for each new message.
    pub fn new(mailbox: Arc<Mailbox>, read_timeout: Duration) -> Self {
        Self {
            mailbox,
            read_timeout,
            current: Message::default(),
            cursor: 0,
        }
    }

    /// Provenance of the message currently being read.
    pub fn source(&self) -> Source {
        self.current.source()
    }

    async fn fill(&mut self) -> bool {
        if self.cursor < self.current.len() {
            return true;
        }
        self.cursor = 0;
        let got = self
            .mailbox
            .receive_into(&mut self.current, Wait::For(self.read_timeout))
            .await;
        if got {
            debug!(mailbox = self.mailbox.tag(), len = self.current.len(), "stream message pulled");
        }
        got
    }

    /// Bytes readable without pulling another message (pulls one if none).
    pub async fn available(&mut self) -> usize {
        if self.fill().await {
            self.current.len() - self.cursor
        } else {
            0
        }
    }

    /// Next byte, or `None` when nothing arrived within the read timeout.
    pub async fn read(&mut self) -> Option<u8> {
        if !self.fill().await {
            return None;
        }
        let byte = self.current.as_slice()[self.cursor];
        self.advance(1);
        Some(byte)
    }

    /// Copy as many bytes as the current message still holds into `buf`.
    pub async fn read_into(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() || !self.fill().await {
            return 0;
        }
        let rest = &self.current.as_slice()[self.cursor..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.advance(n);
        n
    }

    fn advance(&mut self, n: usize) {
        self.cursor += n;
        if self.cursor >= self.current.len() {
            self.current.release();
            self.cursor = 0;
        }
    }
}
