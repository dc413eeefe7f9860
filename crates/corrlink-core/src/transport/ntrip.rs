//! NTRIP client shared by both transports.
//!
//! The caster must answer the request with exactly `ICY 200 OK\r\n` (when a
//! mountpoint is requested) or `SOURCETABLE 200 OK\r\n` (when none is)
//! within the reply timeout; anything else closes the socket. Once
//! connected, received bytes are forwarded to the router and the cached
//! GGA sentence is uploaded every interval, starting one interval after
//! the connect.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use corrlink_models::{Content, Message};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::TransportContext;
use crate::config::NtripSettings;
use crate::drivers::NtripSocket;
use crate::error::{DriverError, NtripError};
use crate::mailbox::Wait;

/// Reply to a mountpoint request.
pub const ICY_OK: &str = "ICY 200 OK\r\n";
/// Reply to a source-table request.
pub const SOURCETABLE_OK: &str = "SOURCETABLE 200 OK\r\n";

const USER_AGENT: &str = concat!("NTRIP corrlink/", env!("CARGO_PKG_VERSION"));
const READ_CHUNK: usize = 1024;

/// Build the request sent right after the socket opens.
///
/// ```
/// use corrlink_core::config::NtripSettings;
/// use corrlink_core::transport::ntrip::build_request;
///
/// let settings = NtripSettings {
///     host: "caster.example".into(),
///     mountpoint: "MOUNT".into(),
///     user: "user".into(),
///     password: "pass".into(),
///     ..NtripSettings::default()
/// };
/// let req = build_request(&settings);
/// assert!(req.starts_with("GET /MOUNT HTTP/1.0\r\n"));
/// assert!(req.contains("Authorization: Basic dXNlcjpwYXNz\r\n"));
/// assert!(req.ends_with("\r\n\r\n"));
/// ```
pub fn build_request(settings: &NtripSettings) -> String {
    let mut request = format!(
        "GET /{} HTTP/1.0\r\nUser-Agent: {USER_AGENT}\r\nAccept: */*\r\n",
        settings.mountpoint
    );
    if !settings.user.is_empty() {
        let credentials = STANDARD.encode(format!("{}:{}", settings.user, settings.password));
        request.push_str(&format!("Authorization: Basic {credentials}\r\n"));
    }
    request.push_str("Connection: close\r\n\r\n");
    request
}

/// The only acceptable status line for `settings`.
pub fn expected_reply(settings: &NtripSettings) -> &'static str {
    if settings.mountpoint.is_empty() {
        SOURCETABLE_OK
    } else {
        ICY_OK
    }
}

/// Connection bookkeeping for one caster session.
#[derive(Debug, Default)]
pub struct NtripClient {
    target: Option<NtripSettings>,
    next_gga: Option<Instant>,
    gga_interval: Duration,
    forwarded_bytes: u64,
    gga_sent: u64,
}

impl NtripClient {
    /// Client with no session.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` after a successful handshake, until [`close`](Self::close).
    pub fn is_connected(&self) -> bool {
        self.target.is_some()
    }

    /// `true` when connected with exactly these settings.
    pub fn is_connected_to(&self, settings: &NtripSettings) -> bool {
        self.target.as_ref() == Some(settings)
    }

    /// Correction bytes forwarded since creation.
    pub fn forwarded_bytes(&self) -> u64 {
        self.forwarded_bytes
    }

    /// GGA sentences uploaded since creation.
    pub fn gga_sent(&self) -> u64 {
        self.gga_sent
    }

    /// Open the socket and perform the handshake.
    ///
    /// On any failure the socket is closed again before returning.
    pub async fn connect<S>(
        &mut self,
        socket: &mut S,
        settings: &NtripSettings,
        ctx: &TransportContext,
    ) -> Result<(), NtripError>
    where
        S: NtripSocket + ?Sized,
    {
        if !settings.is_configured() {
            return Err(NtripError::NotConfigured);
        }
        self.target = None;
        socket.connect(&settings.host, settings.port, settings.tls).await?;
        match self.handshake(socket, settings, ctx).await {
            Ok(leftover) => {
                self.gga_interval = if settings.gga_interval_secs == 0 {
                    ctx.timings.gga_interval
                } else {
                    Duration::from_secs(settings.gga_interval_secs)
                };
                self.next_gga = Some(Instant::now() + self.gga_interval);
                self.target = Some(settings.clone());
                info!(
                    transport = %ctx.source,
                    host = %settings.host,
                    port = settings.port,
                    mountpoint = %settings.mountpoint,
                    "NTRIP caster connected"
                );
                if !leftover.is_empty() {
                    self.forward(ctx, &leftover).await;
                }
                Ok(())
            }
            Err(e) => {
                socket.close().await;
                Err(e)
            }
        }
    }

    async fn handshake<S>(
        &mut self,
        socket: &mut S,
        settings: &NtripSettings,
        ctx: &TransportContext,
    ) -> Result<Vec<u8>, NtripError>
    where
        S: NtripSocket + ?Sized,
    {
        socket.write(build_request(settings).as_bytes()).await?;

        let expected = expected_reply(settings).as_bytes();
        let deadline = Instant::now() + ctx.timings.ntrip_reply_timeout;
        let mut reply = Vec::with_capacity(expected.len());
        let mut buf = [0u8; 256];
        while reply.len() < expected.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NtripError::ReplyTimeout);
            }
            let n = socket.read(&mut buf, remaining).await?;
            reply.extend_from_slice(&buf[..n]);
            let seen = reply.len().min(expected.len());
            if reply[..seen] != expected[..seen] {
                break;
            }
        }
        if !reply.starts_with(expected) {
            let shown = &reply[..reply.len().min(64)];
            return Err(NtripError::UnexpectedReply(
                String::from_utf8_lossy(shown).into_owned(),
            ));
        }
        Ok(reply.split_off(expected.len()))
    }

    /// One bounded unit of work on a connected session: read and forward
    /// whatever arrived within one tick, then upload GGA if due.
    ///
    /// Returns the number of bytes read.
    pub async fn pump<S>(&mut self, socket: &mut S, ctx: &TransportContext) -> Result<usize, NtripError>
    where
        S: NtripSocket + ?Sized,
    {
        if self.target.is_none() || !socket.is_connected() {
            return Err(DriverError::Disconnected.into());
        }
        let mut buf = [0u8; READ_CHUNK];
        let n = socket.read(&mut buf, ctx.timings.tick).await?;
        if n > 0 {
            self.forward(ctx, &buf[..n]).await;
        }
        self.upload_gga(socket, ctx).await?;
        Ok(n)
    }

    async fn upload_gga<S>(&mut self, socket: &mut S, ctx: &TransportContext) -> Result<(), NtripError>
    where
        S: NtripSocket + ?Sized,
    {
        let Some(at) = self.next_gga else {
            return Ok(());
        };
        let now = Instant::now();
        if now < at {
            return Ok(());
        }
        self.next_gga = Some(now + self.gga_interval);
        match ctx.config.latest_gga() {
            Some(mut sentence) => {
                // Casters read GGA line by line.
                if !sentence.ends_with("\r\n") {
                    sentence.truncate(sentence.trim_end().len());
                    sentence.push_str("\r\n");
                }
                socket.write(sentence.as_bytes()).await?;
                self.gga_sent += 1;
                debug!(transport = %ctx.source, "GGA sent to caster");
            }
            None => debug!(transport = %ctx.source, "no GGA cached, skipping upload"),
        }
        Ok(())
    }

    async fn forward(&mut self, ctx: &TransportContext, bytes: &[u8]) {
        let msg = Message::from_bytes(bytes, ctx.source, Content::Corrections);
        if msg.is_empty() {
            warn!(transport = %ctx.source, bytes = bytes.len(), "no buffer for NTRIP data, dropped");
            return;
        }
        match ctx.corrections.send(msg, Wait::For(ctx.timings.forward_timeout)).await {
            Ok(()) => self.forwarded_bytes += bytes.len() as u64,
            Err(e) => {
                let lost = e.into_message();
                warn!(transport = %ctx.source, bytes = lost.len(), "router mailbox full, NTRIP data dropped");
            }
        }
    }

    /// Close the socket and forget the session.
    pub async fn close<S>(&mut self, socket: &mut S)
    where
        S: NtripSocket + ?Sized,
    {
        socket.close().await;
        self.target = None;
        self.next_gga = None;
    }
}
