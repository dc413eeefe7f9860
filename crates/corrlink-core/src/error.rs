//! Core error types.
//!
//! Every driver primitive returns [`DriverError`]; the pipeline layers wrap
//! it into richer errors ([`ChecklistError`], [`NtripError`],
//! [`ProvisionError`]) that carry enough context for a single log line.
//! None of them is fatal: the state machines log and retry on a later tick.

use corrlink_models::{Message, ModelError};

/// Failure reported by a network, modem or receiver driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The hardware did not answer (absent or powered down).
    #[error("device not present")]
    NotPresent,

    /// The operation did not complete within its bounded wait.
    #[error("operation timed out")]
    Timeout,

    /// The link or socket is not connected.
    #[error("not connected")]
    Disconnected,

    /// The device or remote end refused the command.
    #[error("command rejected: {0}")]
    Rejected(String),

    /// An HTTP exchange completed with a non-success status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// The driver cannot perform this operation.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A multi-step configuration transaction stopped at `step` (1-based).
#[derive(Debug, thiserror::Error)]
#[error("{transaction} failed at step {step}: {source}")]
pub struct ChecklistError {
    /// Name of the transaction.
    pub transaction: &'static str,
    /// Index of the failing step, starting at 1.
    pub step: usize,
    /// Underlying driver failure.
    #[source]
    pub source: DriverError,
}

/// NTRIP client failures.
#[derive(Debug, thiserror::Error)]
pub enum NtripError {
    /// No caster host configured.
    #[error("no NTRIP caster configured")]
    NotConfigured,

    /// The caster answered with something other than the expected status line.
    #[error("unexpected caster reply {0:?}")]
    UnexpectedReply(String),

    /// The caster did not answer within the connect timeout.
    #[error("caster did not answer in time")]
    ReplyTimeout,

    /// Socket level failure.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Zero-touch provisioning failures.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// No device token configured.
    #[error("no provisioning token configured")]
    MissingToken,

    /// The trust anchor download failed.
    #[error("trust anchor download failed: {0}")]
    TrustAnchor(#[source] DriverError),

    /// The ZTP request failed at the transport level or with a bad status.
    #[error("ZTP request failed: {0}")]
    Request(#[source] DriverError),

    /// The ZTP response could not be decoded.
    #[error("ZTP response malformed: {0}")]
    Response(#[from] serde_json::Error),

    /// The ZTP response decoded but lacks required credentials.
    #[error("ZTP response incomplete")]
    Incomplete,

    /// Model level decode error.
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Settings file failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading or writing the file failed.
    #[error("settings file I/O: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not contain valid settings JSON.
    #[error("settings file malformed: {0}")]
    Json(#[from] serde_json::Error),
}

/// A [`Mailbox`](crate::Mailbox) send that did not transfer ownership.
///
/// The rejected message is handed back so that the caller decides whether
/// to retry or to drop (release) it.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The message held no buffer.
    #[error("refusing to send an empty message")]
    Empty(Message),

    /// The mailbox stayed full for the whole timeout.
    #[error("mailbox {mailbox} full")]
    Full {
        /// Diagnostic tag of the mailbox.
        mailbox: &'static str,
        /// The message that was not queued.
        message: Message,
    },
}

impl SendError {
    /// Take back the message that was not sent.
    pub fn into_message(self) -> Message {
        match self {
            SendError::Empty(message) | SendError::Full { message, .. } => message,
        }
    }
}
