//! L-band frequency table published on the frequency topic.
//!
//! ```text
//! {"frequencies": {"us": {"current": {"value": 1556.29}}, "eu": {...}}}
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::region::Region;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct FrequencyValue {
    value: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct FrequencyEntry {
    current: FrequencyValue,
}

/// Parsed frequency document, keyed by region.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct FrequencyTable {
    frequencies: HashMap<String, FrequencyEntry>,
}

impl FrequencyTable {
    /// Parse the JSON payload of a frequency topic message.
    pub fn parse(payload: &[u8]) -> Result<Self, ModelError> {
        serde_json::from_slice(payload).map_err(|e| ModelError::MalformedPayload {
            what: "frequency table".into(),
            reason: e.to_string(),
        })
    }

    /// Current frequency (MHz) for `region`.
    pub fn current(&self, region: Region) -> Option<f64> {
        self.frequencies
            .get(region.as_str())
            .map(|entry| entry.current.value)
    }

    /// All regions with a known current frequency.
    pub fn entries(&self) -> impl Iterator<Item = (Region, f64)> + '_ {
        self.frequencies.iter().filter_map(|(key, entry)| {
            key.parse::<Region>()
                .ok()
                .map(|region| (region, entry.current.value))
        })
    }
}
