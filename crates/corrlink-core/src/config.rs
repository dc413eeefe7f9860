//! Relay configuration: persisted settings, the store contract the
//! pipeline consumes, and the retry/timeout table.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use corrlink_models::{CorrectionTopics, FrequencyTable, ProvisioningIdentity, Region};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::selector::RegionSelector;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Link a correction session runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CorrectionLink {
    /// WiFi or the host network.
    Wifi,
    /// Cellular modem.
    Cellular,
}

/// Correction service independent of the link carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CorrectionService {
    /// PointPerfect over MQTT.
    PointPerfect,
    /// NTRIP caster.
    Ntrip,
}

/// Which correction service feeds the receiver, and over which link.
///
/// Only one transport carries corrections at a time; the other stays
/// online without a session.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CorrectionSource {
    /// No corrections.
    #[default]
    Disabled,
    /// PointPerfect over MQTT on WiFi.
    PointPerfectWifi,
    /// PointPerfect over MQTT on the cellular modem.
    PointPerfectCellular,
    /// NTRIP caster on WiFi.
    NtripWifi,
    /// NTRIP caster on the cellular modem.
    NtripCellular,
}

impl CorrectionSource {
    /// Selection for `service` carried over `link`.
    pub fn new(service: CorrectionService, link: CorrectionLink) -> Self {
        match (service, link) {
            (CorrectionService::PointPerfect, CorrectionLink::Wifi) => Self::PointPerfectWifi,
            (CorrectionService::PointPerfect, CorrectionLink::Cellular) => Self::PointPerfectCellular,
            (CorrectionService::Ntrip, CorrectionLink::Wifi) => Self::NtripWifi,
            (CorrectionService::Ntrip, CorrectionLink::Cellular) => Self::NtripCellular,
        }
    }

    /// Selected service, `None` when disabled.
    pub fn service(self) -> Option<CorrectionService> {
        match self {
            Self::Disabled => None,
            Self::PointPerfectWifi | Self::PointPerfectCellular => Some(CorrectionService::PointPerfect),
            Self::NtripWifi | Self::NtripCellular => Some(CorrectionService::Ntrip),
        }
    }

    /// Link carrying the selected service, `None` when disabled.
    pub fn link(self) -> Option<CorrectionLink> {
        match self {
            Self::Disabled => None,
            Self::PointPerfectWifi | Self::NtripWifi => Some(CorrectionLink::Wifi),
            Self::PointPerfectCellular | Self::NtripCellular => Some(CorrectionLink::Cellular),
        }
    }

    /// `true` when `service` is selected on `link`.
    pub fn selects(self, service: CorrectionService, link: CorrectionLink) -> bool {
        self == Self::new(service, link)
    }
}

/// NTRIP caster settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct NtripSettings {
    /// Caster host name; empty means not configured.
    pub host: String,
    /// Caster port.
    pub port: u16,
    /// Mountpoint; empty requests the source table.
    pub mountpoint: String,
    /// Basic-auth user; empty disables authentication.
    pub user: String,
    /// Basic-auth password.
    pub password: String,
    /// Use TLS towards the caster.
    pub tls: bool,
    /// Seconds between GGA uploads.
    pub gga_interval_secs: u64,
}

impl Default for NtripSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 2101,
            mountpoint: String::new(),
            user: String::new(),
            password: String::new(),
            tls: false,
            gga_interval_secs: 20,
        }
    }
}

impl NtripSettings {
    /// `true` when a caster host is set.
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }
}

/// Zero-touch provisioning settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProvisioningSettings {
    /// Device token issued by the correction service.
    pub token: String,
    /// Hardware identifier sent with the request.
    pub hardware_id: String,
    /// Friendly device name.
    pub given_name: String,
    /// ZTP endpoint.
    pub ztp_url: String,
    /// URL of the PEM trust anchor.
    pub trust_anchor_url: String,
    /// Host resolved as a readiness probe before going online.
    pub readiness_host: String,
    /// MQTT broker port.
    pub broker_port: u16,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            token: String::new(),
            hardware_id: String::new(),
            given_name: "corrlink".to_string(),
            ztp_url: "https://api.thingstream.io/ztp/pointperfect/credentials".to_string(),
            trust_anchor_url: "https://www.amazontrust.com/repository/AmazonRootCA1.pem"
                .to_string(),
            readiness_host: "api.thingstream.io".to_string(),
            broker_port: 8883,
        }
    }
}

/// Cellular modem settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CellularSettings {
    /// SIM PIN, applied only when the SIM asks for one.
    pub sim_pin: Option<String>,
    /// Packet-data profiles (APNs) tried in order.
    pub apn_profiles: Vec<String>,
}

/// WiFi settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct WifiSettings {
    /// Network name.
    pub ssid: String,
    /// Passphrase.
    pub password: String,
}

/// Everything the relay persists.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Settings {
    /// Selected correction service.
    pub correction_source: CorrectionSource,
    /// NTRIP client.
    pub ntrip: NtripSettings,
    /// Provisioning endpoints and token.
    pub provisioning: ProvisioningSettings,
    /// Identity obtained through provisioning.
    pub identity: Option<ProvisioningIdentity>,
    /// Latest key material received over MQTT.
    #[serde(with = "base64_bytes")]
    pub key_material: Vec<u8>,
    /// Cellular modem.
    pub cellular: CellularSettings,
    /// WiFi link.
    pub wifi: WifiSettings,
}

impl Settings {
    /// `true` when PointPerfect is selected on `link`, identity or not.
    pub fn point_perfect_selected(&self, link: CorrectionLink) -> bool {
        self.correction_source.selects(CorrectionService::PointPerfect, link)
    }

    /// `true` when the MQTT branch can run on `link`: service selected there
    /// and a complete identity stored.
    pub fn mqtt_ready(&self, link: CorrectionLink) -> bool {
        self.point_perfect_selected(link)
            && self.identity.as_ref().is_some_and(ProvisioningIdentity::is_complete)
    }

    /// `true` when the NTRIP branch can run on `link`.
    pub fn ntrip_ready(&self, link: CorrectionLink) -> bool {
        self.correction_source.selects(CorrectionService::Ntrip, link) && self.ntrip.is_configured()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

/// Configuration store consumed by the transports and the router.
///
/// Implementations are shared between tasks, so every method takes `&self`.
pub trait ConfigStore: Send + Sync {
    /// Snapshot of the current settings.
    fn settings(&self) -> Settings;

    /// Apply `f` to the settings; returns `true` if anything changed.
    fn update(&self, f: &mut dyn FnMut(&mut Settings)) -> bool;

    /// Region and L-band frequency currently in effect.
    fn current_region_frequency(&self) -> (Option<Region>, Option<f64>);

    /// Feed a position fix; returns `true` when the region changed.
    fn update_location(&self, lat: f64, lon: f64) -> bool;

    /// Merge a frequency table received over MQTT.
    fn update_frequencies(&self, table: &FrequencyTable) -> bool;

    /// Latest GGA sentence from the receiver.
    fn latest_gga(&self) -> Option<String>;

    /// Replace the cached GGA sentence.
    fn store_gga(&self, sentence: String);

    /// Ordered topic set the MQTT session should be subscribed to.
    fn current_topics(&self) -> Vec<String> {
        let settings = self.settings();
        let lband = settings.identity.as_ref().is_some_and(|id| id.supports_lband);
        let (region, _) = self.current_region_frequency();
        CorrectionTopics::desired(region, lband)
    }
}

/// In-memory store, optionally mirrored to a JSON file.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    settings: Mutex<Settings>,
    selector: RegionSelector,
    path: Option<PathBuf>,
}

impl MemoryConfigStore {
    /// Store that lives only in memory.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
            selector: RegionSelector::new(),
            path: None,
        }
    }

    /// Load settings from `path` (defaults when the file does not exist)
    /// and persist every change back to it.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let settings = if path.exists() {
            let text = fs::read_to_string(&path)?;
            serde_json::from_str(&text)?
        } else {
            debug!(path = %path.display(), "no settings file, using defaults");
            Settings::default()
        };
        Ok(Self {
            settings: Mutex::new(settings),
            selector: RegionSelector::new(),
            path: Some(path),
        })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Region/frequency selector backing this store.
    pub fn selector(&self) -> &RegionSelector {
        &self.selector
    }

    fn lock(&self) -> MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, settings: &Settings) {
        let Some(path) = &self.path else {
            return;
        };
        let result = serde_json::to_string_pretty(settings)
            .map_err(ConfigError::from)
            .and_then(|json| {
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir)?;
                }
                fs::write(path, json).map_err(ConfigError::from)
            });
        match result {
            Ok(()) => debug!(path = %path.display(), "settings saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to save settings"),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn settings(&self) -> Settings {
        self.lock().clone()
    }

    fn update(&self, f: &mut dyn FnMut(&mut Settings)) -> bool {
        let snapshot = {
            let mut settings = self.lock();
            let before = settings.clone();
            f(&mut settings);
            if *settings == before {
                return false;
            }
            settings.clone()
        };
        self.persist(&snapshot);
        true
    }

    fn current_region_frequency(&self) -> (Option<Region>, Option<f64>) {
        self.selector.region_frequency()
    }

    fn update_location(&self, lat: f64, lon: f64) -> bool {
        self.selector.update_location(lat, lon)
    }

    fn update_frequencies(&self, table: &FrequencyTable) -> bool {
        self.selector.update_frequencies(table)
    }

    fn latest_gga(&self) -> Option<String> {
        self.selector.gga()
    }

    fn store_gga(&self, sentence: String) {
        self.selector.set_gga(sentence);
    }
}

// ---------------------------------------------------------------------------
// Timings
// ---------------------------------------------------------------------------

/// Retry intervals and timeouts used by the transports and the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportTimings {
    /// Between hardware detection attempts.
    pub detect_retry: Duration,
    /// Between SIM checks.
    pub sim_retry: Duration,
    /// Between registration requests.
    pub registration_retry: Duration,
    /// Between packet-data context activation attempts.
    pub activation_retry: Duration,
    /// Between MQTT connect attempts.
    pub mqtt_connect_retry: Duration,
    /// Between WiFi association attempts.
    pub association_retry: Duration,
    /// Between readiness probes once WiFi is associated.
    pub readiness_retry: Duration,
    /// Between provisioning attempts.
    pub provision_retry: Duration,
    /// Between NTRIP connect attempts.
    pub ntrip_retry: Duration,
    /// How long the caster may take to answer the request.
    pub ntrip_reply_timeout: Duration,
    /// Default GGA upload interval (overridden by [`NtripSettings`]).
    pub gga_interval: Duration,
    /// Bounded wait when forwarding into a mailbox.
    pub forward_timeout: Duration,
    /// Scheduling quantum between state-machine steps.
    pub tick: Duration,
}

impl Default for TransportTimings {
    fn default() -> Self {
        Self {
            detect_retry: Duration::from_secs(15),
            sim_retry: Duration::from_secs(10),
            registration_retry: Duration::from_secs(5),
            activation_retry: Duration::from_secs(10),
            mqtt_connect_retry: Duration::from_secs(15),
            association_retry: Duration::from_secs(10),
            readiness_retry: Duration::from_secs(5),
            provision_retry: Duration::from_secs(60),
            ntrip_retry: Duration::from_secs(10),
            ntrip_reply_timeout: Duration::from_secs(10),
            gga_interval: Duration::from_secs(20),
            forward_timeout: Duration::from_millis(50),
            tick: Duration::from_millis(20),
        }
    }
}
