//! Transport acquisition state machines and the components they share.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`subscriptions`] | Topic-diff bookkeeping, one change in flight |
//! | [`session`] | MQTT session: subscription churn + message classification |
//! | [`ntrip`] | NTRIP client: handshake, forwarding, periodic GGA |
//! | [`provision`] | Zero-touch provisioning over an [`HttpsClient`](crate::HttpsClient) |
//! | [`cellular`] | Cellular state machine |
//! | [`wifi`] | WiFi state machine |
//!
//! Both state machines are driven by calling `step` once per scheduling
//! quantum; `run` does that in a loop until shutdown is signalled.

use std::sync::Arc;
use std::time::Duration;

use corrlink_models::Source;
use tokio::time::Instant;

use crate::config::{ConfigStore, TransportTimings};
use crate::mailbox::Mailbox;

pub mod cellular;
pub mod ntrip;
pub mod provision;
pub mod session;
pub mod subscriptions;
pub mod wifi;

/// Everything a transport needs besides its driver.
#[derive(Clone)]
pub struct TransportContext {
    /// Source tag stamped on forwarded messages.
    pub source: Source,
    /// Shared configuration store.
    pub config: Arc<dyn ConfigStore>,
    /// Mailbox feeding the correction router.
    pub corrections: Arc<Mailbox>,
    /// Retry intervals and timeouts.
    pub timings: TransportTimings,
}

impl std::fmt::Debug for TransportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportContext")
            .field("source", &self.source)
            .field("corrections", &self.corrections)
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

/// Re-entry throttle for a state.
///
/// Entering a state clears the gate so the first attempt happens at once;
/// a failed attempt arms it so the next one waits for the retry interval.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RetryGate {
    last_attempt: Option<Instant>,
}

impl RetryGate {
    pub(crate) fn due(&self, interval: Duration) -> bool {
        self.last_attempt
            .map_or(true, |at| at.elapsed() >= interval)
    }

    pub(crate) fn arm(&mut self) {
        self.last_attempt = Some(Instant::now());
    }

    pub(crate) fn clear(&mut self) {
        self.last_attempt = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorrectionSource, MemoryConfigStore, Settings, WifiSettings};
    use crate::testing::{identity, MockModem, MockWifi};
    use crate::transport::cellular::{CellularState, CellularTransport};
    use crate::transport::wifi::{WifiState, WifiTransport};

    fn shared_context(source: Source, config: &Arc<MemoryConfigStore>) -> TransportContext {
        TransportContext {
            source,
            config: config.clone(),
            corrections: Arc::new(Mailbox::new("router", 16)),
            timings: TransportTimings::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gate_waits_after_arm() {
        let mut gate = RetryGate::default();
        assert!(gate.due(Duration::from_secs(5)));
        gate.arm();
        assert!(!gate.due(Duration::from_secs(5)));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(gate.due(Duration::from_secs(5)));
        gate.arm();
        gate.clear();
        assert!(gate.due(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn one_selection_drives_one_transport() {
        let config = Arc::new(MemoryConfigStore::new(Settings {
            correction_source: CorrectionSource::PointPerfectCellular,
            identity: Some(identity(false)),
            wifi: WifiSettings {
                ssid: "field-ap".into(),
                password: String::new(),
            },
            ..Settings::default()
        }));
        let mut cellular =
            CellularTransport::new(MockModem::default(), shared_context(Source::Cellular, &config));
        let mut wifi = WifiTransport::new(MockWifi::default(), shared_context(Source::WiFi, &config));

        for _ in 0..12 {
            cellular.step().await;
            wifi.step().await;
        }
        assert_eq!(cellular.state(), CellularState::Mqtt);
        assert_eq!(wifi.state(), WifiState::Online);
        assert!(wifi.link().mqtt.calls.is_empty());

        config.update(&mut |s| s.correction_source = CorrectionSource::PointPerfectWifi);
        for _ in 0..3 {
            cellular.step().await;
            wifi.step().await;
        }
        assert_eq!(cellular.state(), CellularState::Online);
        assert!(!cellular.modem().mqtt.connected);
        assert_eq!(wifi.state(), WifiState::MqttConnected);
        assert!(wifi.link().mqtt.connected);
    }
}
