//! Canonical MQTT topic definitions for the correction service.
//!
//! All topic strings used by the relay **must** be built through
//! [`CorrectionTopics`]. Both transports share the same hierarchy, and the
//! classification in [`CorrectionTopics::classify`] is the single place that
//! decides what happens to an incoming MQTT message.
//!
//! # Topic layout
//!
//! ```text
//! /pp/ubx/mga                 ← assistance data (forwarded)
//! /pp/ubx/0236/{stream}       ← decryption key material (stored, not forwarded)
//! /pp/frequencies/Lb          ← L-band frequency table (selector update, not forwarded)
//! /pp/ip/{region}/gad         ← geographic area definitions
//! /pp/ip/{region}/hpac        ← atmospheric corrections
//! /pp/ip/{region}/ocb         ← orbit / clock / bias
//! /pp/ip/{region}/clk         ← clock
//! ```

use crate::region::Region;

/// Key-material stream selected by the device's service plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum KeyStream {
    /// IP-only plan.
    #[strum(serialize = "ip")]
    Ip,
    /// Plan including the L-band satellite channel.
    #[strum(serialize = "Lb")]
    LBand,
}

/// What an incoming topic means to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// Decryption key material.
    KeyMaterial,
    /// L-band frequency table.
    Frequency,
    /// Assistance data.
    Assistance,
    /// One of the per-region correction topics.
    Correction(Region),
    /// Anything outside the known hierarchy.
    Unknown,
}

/// Per-region correction sub-topics, in subscription order.
pub const REGION_SUBTOPICS: [&str; 4] = ["gad", "hpac", "ocb", "clk"];

/// Central authority for all MQTT topic names.
///
/// # Examples
///
/// ```
/// use corrlink_models::{CorrectionTopics, KeyStream, Region, TopicKind};
///
/// assert_eq!(CorrectionTopics::key_material(KeyStream::Ip), "/pp/ubx/0236/ip");
/// assert_eq!(
///     CorrectionTopics::region(Region::Eu),
///     ["/pp/ip/eu/gad", "/pp/ip/eu/hpac", "/pp/ip/eu/ocb", "/pp/ip/eu/clk"],
/// );
/// assert_eq!(
///     CorrectionTopics::classify("/pp/ip/us/ocb"),
///     TopicKind::Correction(Region::Us),
/// );
/// ```
pub struct CorrectionTopics;

impl CorrectionTopics {
    // ------------------------------------------------------------------
    // Topic builders
    // ------------------------------------------------------------------

    /// Assistance (MGA) topic.
    pub fn assistance() -> String {
        "/pp/ubx/mga".to_string()
    }

    /// Key-material topic for the given stream.
    pub fn key_material(stream: KeyStream) -> String {
        format!("/pp/ubx/0236/{stream}")
    }

    /// L-band frequency table topic.
    pub fn frequency() -> String {
        "/pp/frequencies/Lb".to_string()
    }

    /// The four correction sub-topics of a region.
    pub fn region(region: Region) -> [String; 4] {
        REGION_SUBTOPICS.map(|sub| format!("/pp/ip/{}/{sub}", region.as_str()))
    }

    /// Ordered desired topic set for a device.
    ///
    /// Assistance and key material always come first so that a freshly
    /// connected device obtains keys before correction traffic arrives.
    pub fn desired(region: Option<Region>, supports_lband: bool) -> Vec<String> {
        let stream = if supports_lband {
            KeyStream::LBand
        } else {
            KeyStream::Ip
        };
        let mut topics = vec![Self::assistance(), Self::key_material(stream)];
        if supports_lband {
            topics.push(Self::frequency());
        }
        if let Some(region) = region {
            topics.extend(Self::region(region));
        }
        topics
    }

    // ------------------------------------------------------------------
    // Classification
    // ------------------------------------------------------------------

    /// Decide what an incoming topic is.
    pub fn classify(topic: &str) -> TopicKind {
        if topic.starts_with("/pp/ubx/0236/") {
            return TopicKind::KeyMaterial;
        }
        if topic.starts_with("/pp/frequencies/") {
            return TopicKind::Frequency;
        }
        if topic == "/pp/ubx/mga" {
            return TopicKind::Assistance;
        }
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() == 5 && parts[0].is_empty() && parts[1] == "pp" && parts[2] == "ip" {
            if let Ok(region) = parts[3].parse::<Region>() {
                if REGION_SUBTOPICS.contains(&parts[4]) {
                    return TopicKind::Correction(region);
                }
            }
        }
        TopicKind::Unknown
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
