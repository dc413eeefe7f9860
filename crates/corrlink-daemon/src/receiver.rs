//! Receiver port: corrections go out, NMEA position fixes come back.
//!
//! The port is a serial device (or any file) opened read/write. Outbound
//! bytes are written straight through; inbound bytes are staged through a
//! mailbox so the position task can consume them as a byte stream.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corrlink_core::drivers::GnssReceiver;
use corrlink_core::{ConfigStore, Discriminator, DriverError, Mailbox, StreamReader, StreamWriter};
use corrlink_models::{parse_gga, ubx_frame, Content, Source};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const UBX_CLASS_CFG: u8 = 0x06;
const UBX_ID_CFG_VALSET: u8 = 0x8A;
const VALSET_LAYER_RAM: u8 = 0x01;
/// CFG-SPARTN-USE_SOURCE: 0 selects IP (SPARTN), 1 selects L-band (PMP).
const KEY_SPARTN_USE_SOURCE: u32 = 0x20A7_0001;

/// Longest line kept while hunting for NMEA sentences.
const MAX_SENTENCE: usize = 128;

/// UBX CFG-VALSET frame switching the receiver's correction input.
pub fn discriminator_command(value: Discriminator) -> Option<Vec<u8>> {
    let source = match value {
        Discriminator::Spartn => 0u8,
        Discriminator::Pmp => 1u8,
        Discriminator::None => return None,
    };
    let mut payload = vec![0x00, VALSET_LAYER_RAM, 0x00, 0x00];
    payload.extend_from_slice(&KEY_SPARTN_USE_SOURCE.to_le_bytes());
    payload.push(source);
    Some(ubx_frame(UBX_CLASS_CFG, UBX_ID_CFG_VALSET, &payload))
}

/// Write half of the receiver port.
pub struct ReceiverPort<W> {
    writer: Option<W>,
}

impl<W> std::fmt::Debug for ReceiverPort<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverPort")
            .field("open", &self.writer.is_some())
            .finish()
    }
}

impl<W> ReceiverPort<W> {
    /// Port with no receiver attached; every push fails with `NotPresent`.
    pub fn absent() -> Self {
        Self { writer: None }
    }

    /// Port writing corrections and commands to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
        }
    }
}

/// Open `path` and split it into the correction sink and the NMEA source.
pub async fn open(
    path: &Path,
) -> std::io::Result<(ReceiverPort<WriteHalf<tokio::fs::File>>, ReadHalf<tokio::fs::File>)> {
    let file = OpenOptions::new().read(true).write(true).open(path).await?;
    let (read, write) = tokio::io::split(file);
    info!(path = %path.display(), "receiver port opened");
    Ok((ReceiverPort::new(write), read))
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> GnssReceiver for ReceiverPort<W> {
    async fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        let writer = self.writer.as_mut().ok_or(DriverError::NotPresent)?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn set_correction_discriminator(&mut self, value: Discriminator) -> Result<(), DriverError> {
        let command = discriminator_command(value)
            .ok_or(DriverError::Unsupported("clearing the correction source"))?;
        debug!(%value, "sending CFG-VALSET");
        self.push_bytes(&command).await
    }
}

// ---------------------------------------------------------------------------
// Position feed
// ---------------------------------------------------------------------------

/// Copy everything the receiver emits into `writer` until EOF or shutdown.
pub async fn pump_receiver_output<R>(
    mut port: R,
    mut writer: StreamWriter,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 512];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            read = port.read(&mut buf) => match read {
                Ok(0) => {
                    info!("receiver output closed");
                    break;
                }
                Ok(n) => {
                    writer.write(&buf[..n]);
                    if let Err(e) = writer.flush().await {
                        warn!(error = %e, "receiver output dropped");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "receiver read failed");
                    break;
                }
            },
        }
    }
}

/// Splits a byte stream into `$...\n` lines, skipping binary traffic.
///
/// Sentences come out terminated with `\r\n` whatever line ending the
/// receiver used, ready to be relayed as-is.
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    line: Vec<u8>,
    in_sentence: bool,
}

impl SentenceSplitter {
    /// Feed one byte; returns a sentence once its line ending arrives.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        if byte == b'$' {
            self.line.clear();
            self.in_sentence = true;
        }
        if !self.in_sentence {
            return None;
        }
        self.line.push(byte);
        if byte == b'\n' {
            self.in_sentence = false;
            let line = String::from_utf8(std::mem::take(&mut self.line)).ok()?;
            return Some(format!("{}\r\n", line.trim_end()));
        }
        if self.line.len() > MAX_SENTENCE {
            self.line.clear();
            self.in_sentence = false;
        }
        None
    }
}

/// Feed GGA fixes from the receiver into the configuration store.
///
/// Every valid fix moves the region selector; the raw sentence is cached
/// for NTRIP uplink.
pub async fn track_position(
    mailbox: Arc<Mailbox>,
    config: Arc<dyn ConfigStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reader = StreamReader::new(mailbox, Duration::from_millis(200));
    let mut splitter = SentenceSplitter::default();
    let mut fixes = 0u64;
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        let Some(byte) = reader.read().await else {
            continue;
        };
        let Some(sentence) = splitter.push(byte) else {
            continue;
        };
        if sentence.get(3..6) != Some("GGA") {
            continue;
        }
        match parse_gga(&sentence) {
            Ok(fix) if fix.quality > 0 => {
                fixes += 1;
                if config.update_location(fix.latitude, fix.longitude) {
                    info!(lat = fix.latitude, lon = fix.longitude, "region changed");
                } else if fixes % 60 == 1 {
                    debug!(lat = fix.latitude, lon = fix.longitude, sats = fix.satellites, "position fix");
                }
                config.store_gga(sentence);
            }
            Ok(_) => debug!("GGA without fix"),
            Err(e) => warn!(error = %e, "ignoring malformed GGA"),
        }
    }
}

/// Writer feeding the position task.
pub fn receiver_writer(mailbox: Arc<Mailbox>) -> StreamWriter {
    StreamWriter::new(mailbox, Source::Receiver, Content::Text)
}
