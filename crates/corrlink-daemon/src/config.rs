//! Daemon configuration.
//!
//! Startup parameters come from CLI flags and `CORRLINK_*` environment
//! variables. Durable device state (identity, key material, NTRIP and
//! provisioning settings) lives in the JSON settings file owned by the
//! [`MemoryConfigStore`](corrlink_core::MemoryConfigStore); environment
//! overrides are folded into it once at startup.

use std::path::PathBuf;
use std::str::FromStr;

use corrlink_core::config::CorrectionSource;
use corrlink_core::Settings;

const APP_DIR: &str = "corrlink";
const SETTINGS_FILE: &str = "settings.json";

/// Default location of the settings file.
pub fn default_settings_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join(APP_DIR).join(SETTINGS_FILE))
}

/// Settings overrides read from the environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub receiver: Option<PathBuf>,
    pub correction_source: Option<CorrectionSource>,
    pub ntrip_host: Option<String>,
    pub ntrip_port: Option<u16>,
    pub ntrip_mountpoint: Option<String>,
    pub ntrip_user: Option<String>,
    pub ntrip_password: Option<String>,
    pub ztp_token: Option<String>,
    pub hardware_id: Option<String>,
    pub wifi_ssid: Option<String>,
    pub sim_pin: Option<String>,
    pub apn_profiles: Vec<String>,
}

impl AppConfig {
    /// Build the configuration from environment variables.
    ///
    /// | Variable                   | Description                                   |
    /// |----------------------------|-----------------------------------------------|
    /// | `CORRLINK_RECEIVER`        | Receiver device or capture file               |
    /// | `CORRLINK_SOURCE`          | `disabled`, `point-perfect-wifi`,             |
    /// |                            | `point-perfect-cellular`, `ntrip-wifi` or     |
    /// |                            | `ntrip-cellular`                              |
    /// | `CORRLINK_NTRIP_HOST`      | NTRIP caster host                             |
    /// | `CORRLINK_NTRIP_PORT`      | NTRIP caster port (default `2101`)            |
    /// | `CORRLINK_NTRIP_MOUNT`     | NTRIP mountpoint                              |
    /// | `CORRLINK_NTRIP_USER`      | NTRIP user                                    |
    /// | `CORRLINK_NTRIP_PASSWORD`  | NTRIP password                                |
    /// | `CORRLINK_ZTP_TOKEN`       | PointPerfect device token                     |
    /// | `CORRLINK_HARDWARE_ID`     | Hardware id sent during provisioning          |
    /// | `CORRLINK_WIFI_SSID`       | Label for the host network link               |
    /// | `CORRLINK_SIM_PIN`         | SIM PIN                                       |
    /// | `CORRLINK_APNS`            | Comma-separated APN profiles, in order        |
    ///
    /// Unset variables leave the stored settings alone.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            receiver: var("CORRLINK_RECEIVER").map(PathBuf::from),
            correction_source: var("CORRLINK_SOURCE")
                .and_then(|v| CorrectionSource::from_str(v.trim()).ok()),
            ntrip_host: var("CORRLINK_NTRIP_HOST"),
            ntrip_port: var("CORRLINK_NTRIP_PORT").and_then(|v| v.parse().ok()),
            ntrip_mountpoint: var("CORRLINK_NTRIP_MOUNT"),
            ntrip_user: var("CORRLINK_NTRIP_USER"),
            ntrip_password: var("CORRLINK_NTRIP_PASSWORD"),
            ztp_token: var("CORRLINK_ZTP_TOKEN"),
            hardware_id: var("CORRLINK_HARDWARE_ID"),
            wifi_ssid: var("CORRLINK_WIFI_SSID"),
            sim_pin: var("CORRLINK_SIM_PIN"),
            apn_profiles: var("CORRLINK_APNS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Fold the overrides into `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(source) = self.correction_source {
            settings.correction_source = source;
        }
        if let Some(host) = &self.ntrip_host {
            settings.ntrip.host.clone_from(host);
        }
        if let Some(port) = self.ntrip_port {
            settings.ntrip.port = port;
        }
        if let Some(mount) = &self.ntrip_mountpoint {
            settings.ntrip.mountpoint.clone_from(mount);
        }
        if let Some(user) = &self.ntrip_user {
            settings.ntrip.user.clone_from(user);
        }
        if let Some(password) = &self.ntrip_password {
            settings.ntrip.password.clone_from(password);
        }
        if let Some(token) = &self.ztp_token {
            settings.provisioning.token.clone_from(token);
        }
        if let Some(id) = &self.hardware_id {
            settings.provisioning.hardware_id.clone_from(id);
        }
        if let Some(ssid) = &self.wifi_ssid {
            settings.wifi.ssid.clone_from(ssid);
        }
        if let Some(pin) = &self.sim_pin {
            settings.cellular.sim_pin = Some(pin.clone());
        }
        if !self.apn_profiles.is_empty() {
            settings.cellular.apn_profiles.clone_from(&self.apn_profiles);
        }
    }
}
