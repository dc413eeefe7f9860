//! Region / frequency selector.
//!
//! Position fixes from the receiver decide which correction region the
//! device is in; the frequency topic tells us which L-band frequency each
//! region currently uses. Both transports and the router read this state,
//! so it lives behind one lock and is only reachable through the methods
//! below.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use corrlink_models::{FrequencyTable, Region};
use tracing::info;

#[derive(Debug, Default)]
struct SelectorState {
    region: Option<Region>,
    frequencies: HashMap<Region, f64>,
    position: Option<(f64, f64)>,
    gga: Option<String>,
}

/// Synchronized holder of region, frequency table, last fix and GGA cache.
#[derive(Debug, Default)]
pub struct RegionSelector {
    state: Mutex<SelectorState>,
}

impl RegionSelector {
    /// Empty selector: no region, no frequencies, no fix.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SelectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current region, if the last fix fell inside one.
    pub fn region(&self) -> Option<Region> {
        self.lock().region
    }

    /// Last position fed through [`update_location`](Self::update_location).
    pub fn position(&self) -> Option<(f64, f64)> {
        self.lock().position
    }

    /// Record a fix; returns `true` when the region changed.
    pub fn update_location(&self, lat: f64, lon: f64) -> bool {
        let region = Region::from_position(lat, lon);
        let mut state = self.lock();
        state.position = Some((lat, lon));
        if state.region == region {
            return false;
        }
        info!(from = ?state.region, to = ?region, "correction region changed");
        state.region = region;
        true
    }

    /// Set the region only if it still equals `expected`.
    pub fn compare_and_set_region(&self, expected: Option<Region>, region: Option<Region>) -> bool {
        let mut state = self.lock();
        if state.region != expected {
            return false;
        }
        state.region = region;
        true
    }

    /// Merge a frequency table; returns `true` when any value changed.
    pub fn update_frequencies(&self, table: &FrequencyTable) -> bool {
        let mut state = self.lock();
        let mut changed = false;
        for (region, freq) in table.entries() {
            let previous = state.frequencies.insert(region, freq);
            changed |= previous != Some(freq);
        }
        changed
    }

    /// Frequency (MHz) currently published for `region`.
    pub fn frequency(&self, region: Region) -> Option<f64> {
        self.lock().frequencies.get(&region).copied()
    }

    /// Current region and its frequency, when both are known.
    pub fn region_frequency(&self) -> (Option<Region>, Option<f64>) {
        let state = self.lock();
        let freq = state
            .region
            .and_then(|r| state.frequencies.get(&r).copied());
        (state.region, freq)
    }

    /// Cache the latest GGA sentence for NTRIP uplink.
    pub fn set_gga(&self, sentence: String) {
        self.lock().gga = Some(sentence);
    }

    /// Latest cached GGA sentence.
    pub fn gga(&self) -> Option<String> {
        self.lock().gga.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_drives_region() {
        let sel = RegionSelector::new();
        assert!(sel.update_location(52.0, 5.0));
        assert_eq!(sel.region(), Some(Region::Eu));
        assert!(!sel.update_location(52.1, 5.1));
        assert!(sel.update_location(-60.0, -30.0));
        assert_eq!(sel.region(), None);
        assert_eq!(sel.position(), Some((-60.0, -30.0)));
    }

    #[test]
    fn compare_and_set_requires_expected() {
        let sel = RegionSelector::new();
        assert!(!sel.compare_and_set_region(Some(Region::Us), Some(Region::Eu)));
        assert!(sel.compare_and_set_region(None, Some(Region::Jp)));
        assert_eq!(sel.region(), Some(Region::Jp));
    }

    #[test]
    fn frequencies_follow_region() {
        let sel = RegionSelector::new();
        let table = FrequencyTable::parse(
            br#"{"frequencies":{"eu":{"current":{"value":1545.26}}}}"#,
        )
        .unwrap();
        assert!(sel.update_frequencies(&table));
        assert!(!sel.update_frequencies(&table));
        assert_eq!(sel.region_frequency(), (None, None));

        sel.update_location(48.0, 11.0);
        assert_eq!(sel.region_frequency(), (Some(Region::Eu), Some(1545.26)));
    }

    #[test]
    fn gga_cache() {
        let sel = RegionSelector::new();
        assert!(sel.gga().is_none());
        sel.set_gga("$GPGGA,...".into());
        assert_eq!(sel.gga().as_deref(), Some("$GPGGA,..."));
    }
}
