//! Error types for the `corrlink-models` crate.
//!
//! All fallible parsers in this crate return variants of [`ModelError`].

/// Errors produced when decoding model types from the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// A payload could not be decoded.
    #[error("malformed {what}: {reason}")]
    MalformedPayload {
        /// What was being decoded.
        what: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// A topic outside the known hierarchy was encountered.
    #[error("unknown topic \"{0}\"")]
    UnknownTopic(String),
}
