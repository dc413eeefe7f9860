//! Correction service regions.
//!
//! The correction service splits its IP streams by continent. A device
//! only subscribes to the region it is currently in, which is derived from
//! its last known position.

use serde::{Deserialize, Serialize};

/// A correction service region.
///
/// # Examples
///
/// ```
/// use corrlink_models::Region;
///
/// assert_eq!(Region::from_position(48.85, 2.35), Some(Region::Eu));
/// assert_eq!(Region::from_position(0.0, -30.0), None);
/// assert_eq!(Region::Eu.to_string(), "eu");
/// ```
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Region {
    /// Contiguous United States and southern Canada.
    Us,
    /// Europe.
    Eu,
    /// Korea.
    Kr,
    /// Australia.
    Au,
    /// Japan.
    Jp,
}

/// `(region, lat_min, lat_max, lon_min, lon_max)`; first match wins.
const COVERAGE: [(Region, f64, f64, f64, f64); 5] = [
    (Region::Kr, 33.0, 39.0, 124.0, 132.0),
    (Region::Jp, 24.0, 46.0, 122.0, 154.0),
    (Region::Us, 20.0, 55.0, -130.0, -60.0),
    (Region::Eu, 34.0, 72.0, -25.0, 45.0),
    (Region::Au, -45.0, -10.0, 112.0, 155.0),
];

impl Region {
    /// Region covering the given position, if any.
    pub fn from_position(lat: f64, lon: f64) -> Option<Self> {
        COVERAGE
            .iter()
            .find(|(_, lat_min, lat_max, lon_min, lon_max)| {
                (*lat_min..=*lat_max).contains(&lat) && (*lon_min..=*lon_max).contains(&lon)
            })
            .map(|(region, ..)| *region)
    }

    /// Lowercase region key used in topics and frequency documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Us => "us",
            Region::Eu => "eu",
            Region::Kr => "kr",
            Region::Au => "au",
            Region::Jp => "jp",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn positions_map_to_regions() {
        assert_eq!(Region::from_position(40.0, -105.0), Some(Region::Us));
        assert_eq!(Region::from_position(52.5, 13.4), Some(Region::Eu));
        assert_eq!(Region::from_position(37.5, 127.0), Some(Region::Kr));
        assert_eq!(Region::from_position(35.7, 139.7), Some(Region::Jp));
        assert_eq!(Region::from_position(-33.9, 151.2), Some(Region::Au));
    }

    #[test]
    fn open_ocean_has_no_region() {
        assert_eq!(Region::from_position(-60.0, -30.0), None);
    }

    #[test]
    fn parse_and_display_roundtrip() {
        assert_eq!(Region::from_str("jp").unwrap(), Region::Jp);
        assert_eq!(Region::Au.as_str(), Region::Au.to_string());
    }
}
