//! Uniquely-owned byte buffers exchanged between relay tasks.
//!
//! A [`Message`] is the only unit of data that crosses a task boundary in
//! the relay. It owns its buffer outright: it cannot be cloned, moving it
//! moves the bytes, and [`Message::take`] leaves the previous holder empty.
//! Dropping a message that still owns a buffer releases it.
//!
//! Every buffer allocated through [`Message::create`] is counted in a
//! process-wide gauge exposed by [`live_buffers`], which lets tests check
//! that nothing queued anywhere is leaked.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

static LIVE_BUFFERS: AtomicUsize = AtomicUsize::new(0);

/// Number of message buffers currently allocated in this process.
pub fn live_buffers() -> usize {
    LIVE_BUFFERS.load(Ordering::Acquire)
}

// ---------------------------------------------------------------------------
// Source / Content
// ---------------------------------------------------------------------------

/// Where a [`Message`] came from.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display,
    strum::EnumString, strum::EnumIter,
)]
pub enum Source {
    /// No provenance recorded.
    #[default]
    None,
    /// WiFi transport (MQTT or NTRIP over the WLAN link).
    WiFi,
    /// Cellular transport (MQTT or NTRIP over the modem).
    Cellular,
    /// Satellite L-band side channel.
    SatelliteBand,
    /// The positioning receiver itself.
    Receiver,
    /// Bluetooth passthrough.
    Bluetooth,
    /// Web socket monitor.
    WebSocket,
    /// SD card replay.
    SdCard,
    /// Raw UART input.
    Uart,
    /// CAN bus.
    CanBus,
    /// Companion application.
    App,
}

/// What a [`Message`] carries.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display,
    strum::EnumString, strum::EnumIter,
)]
pub enum Content {
    /// Unclassified.
    #[default]
    None,
    /// Human readable text.
    Text,
    /// Opaque binary data.
    Binary,
    /// Decryption key material.
    Keys,
    /// GNSS correction data.
    Corrections,
    /// Configuration commands.
    Config,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A move-only, heap-backed byte buffer tagged with provenance.
///
/// A message is *empty* when it holds no buffer. Empty messages are what
/// [`Message::take`] leaves behind and what [`Message::create`] returns when
/// the allocation cannot be satisfied.
///
/// ```
/// use corrlink_models::{Content, Message, Source};
///
/// let mut msg = Message::create(Some(b"\xd3\x00\x00"), 3, Source::WiFi, Content::Corrections);
/// assert_eq!(msg.as_slice(), b"\xd3\x00\x00");
///
/// let moved = msg.take();
/// assert!(msg.is_empty());
/// assert_eq!(moved.len(), 3);
/// ```
#[derive(Default)]
pub struct Message {
    data: Option<Vec<u8>>,
    source: Source,
    content: Content,
}

impl Message {
    /// Allocate a buffer of exactly `len` bytes.
    ///
    /// The buffer is filled from `bytes` (truncated or zero padded to `len`)
    /// or zeroed when `bytes` is `None`. If the allocator refuses the
    /// request the returned message is empty; callers treat that as a
    /// transient condition and drop whatever they were about to send.
    pub fn create(bytes: Option<&[u8]>, len: usize, source: Source, content: Content) -> Self {
        if len == 0 {
            return Self::empty(source, content);
        }

        let mut buf = Vec::new();
        if buf.try_reserve_exact(len).is_err() {
            return Self::empty(source, content);
        }

        match bytes {
            Some(src) => {
                let n = src.len().min(len);
                buf.extend_from_slice(&src[..n]);
                buf.resize(len, 0);
            }
            None => buf.resize(len, 0),
        }

        LIVE_BUFFERS.fetch_add(1, Ordering::AcqRel);
        Self {
            data: Some(buf),
            source,
            content,
        }
    }

    /// Copy `bytes` into a new message of the same length.
    pub fn from_bytes(bytes: &[u8], source: Source, content: Content) -> Self {
        Self::create(Some(bytes), bytes.len(), source, content)
    }

    /// A message carrying no buffer.
    pub fn empty(source: Source, content: Content) -> Self {
        Self {
            data: None,
            source,
            content,
        }
    }

    /// `true` when no buffer is held.
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    /// Size of the held buffer in bytes (`0` when empty).
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    /// Provenance of the message.
    pub fn source(&self) -> Source {
        self.source
    }

    /// Content classification of the message.
    pub fn content(&self) -> Content {
        self.content
    }

    /// Borrow the bytes (empty slice when no buffer is held).
    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Mutably borrow the bytes (empty slice when no buffer is held).
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    /// Move the buffer out, leaving `self` empty with the same tags.
    pub fn take(&mut self) -> Message {
        Message {
            data: self.data.take(),
            source: self.source,
            content: self.content,
        }
    }

    /// Free the buffer now instead of at drop time.
    pub fn release(&mut self) {
        if self.data.take().is_some() {
            LIVE_BUFFERS.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Shrink the buffer to its first `len` bytes and give back the excess.
    ///
    /// Shrinking to zero releases the buffer. Growing is not supported; a
    /// larger `len` leaves the message unchanged.
    pub fn shrink_to(&mut self, len: usize) {
        if len == 0 {
            self.release();
            return;
        }
        if let Some(buf) = self.data.as_mut() {
            if len < buf.len() {
                buf.truncate(len);
                buf.shrink_to_fit();
            }
        }
    }

    /// Consume the message and return the owned bytes.
    pub fn into_vec(mut self) -> Vec<u8> {
        match self.data.take() {
            Some(buf) => {
                LIVE_BUFFERS.fetch_sub(1, Ordering::AcqRel);
                buf
            }
            None => Vec::new(),
        }
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.len())
            .field("empty", &self.is_empty())
            .field("source", &self.source)
            .field("content", &self.content)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
