//! Capability traits implemented by hardware and network drivers.
//!
//! The pipeline never talks to sockets, modems or the receiver directly;
//! it goes through these traits so that the same state machines run on a
//! modem's AT command set, on a host network stack, or against scripted
//! test doubles. Every primitive returns `Result<_, DriverError>`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corrlink_models::ProvisioningIdentity;
use tokio::sync::watch;

use crate::config::WifiSettings;
use crate::error::DriverError;
use crate::router::Discriminator;

// ---------------------------------------------------------------------------
// Network primitives
// ---------------------------------------------------------------------------

/// MQTT client bound to one link.
#[async_trait]
pub trait MqttLink: Send {
    /// Connect to the identity's broker with its TLS credentials.
    async fn connect(&mut self, identity: &ProvisioningIdentity, port: u16) -> Result<(), DriverError>;

    /// Disconnect; a no-op when not connected.
    async fn disconnect(&mut self) -> Result<(), DriverError>;

    /// Subscribe to a single topic.
    async fn subscribe(&mut self, topic: &str) -> Result<(), DriverError>;

    /// Unsubscribe from a single topic.
    async fn unsubscribe(&mut self, topic: &str) -> Result<(), DriverError>;

    /// Number of received messages waiting to be read.
    fn pending_messages(&self) -> usize;

    /// Read one waiting message as `(topic, payload)`.
    async fn read_message(&mut self) -> Result<Option<(String, Vec<u8>)>, DriverError>;

    /// `true` while the broker session is up.
    fn is_connected(&self) -> bool;
}

/// Byte socket used by the NTRIP client.
#[async_trait]
pub trait NtripSocket: Send {
    /// Open a TCP (or TLS) connection.
    async fn connect(&mut self, host: &str, port: u16, tls: bool) -> Result<(), DriverError>;

    /// Write all of `bytes`.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), DriverError>;

    /// Read into `buf`, waiting at most `timeout`; `Ok(0)` means nothing
    /// arrived in time.
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, DriverError>;

    /// Close the socket; a no-op when already closed.
    async fn close(&mut self);

    /// `true` while the socket is open.
    fn is_connected(&self) -> bool;
}

/// Completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTPS client used for provisioning.
#[async_trait]
pub trait HttpsClient: Send {
    /// `GET url`.
    async fn get(&mut self, url: &str) -> Result<HttpResponse, DriverError>;

    /// `POST url` with a JSON body.
    async fn post_json(&mut self, url: &str, body: &str) -> Result<HttpResponse, DriverError>;
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// The positioning receiver that consumes corrections.
#[async_trait]
pub trait GnssReceiver: Send {
    /// Hand correction bytes to the receiver.
    async fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), DriverError>;

    /// Tell the receiver which correction family to expect.
    async fn set_correction_discriminator(&mut self, value: Discriminator) -> Result<(), DriverError>;
}

// ---------------------------------------------------------------------------
// Cellular
// ---------------------------------------------------------------------------

/// SIM card state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SimStatus {
    /// Unlocked and usable.
    Ready,
    /// Waiting for a PIN.
    PinRequired,
    /// No SIM inserted.
    Absent,
}

/// Network registration state reported by the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum RegistrationStatus {
    /// Not registered and not searching.
    #[default]
    NotRegistered,
    /// Searching for an operator.
    Searching,
    /// Registered on the home network.
    Home,
    /// Registered while roaming.
    Roaming,
    /// Registration refused.
    Denied,
}

impl RegistrationStatus {
    /// `true` for Home or Roaming.
    pub fn is_registered(self) -> bool {
        matches!(self, RegistrationStatus::Home | RegistrationStatus::Roaming)
    }
}

/// Handle a modem driver uses to report registration changes.
///
/// Cloned into the driver when registration is requested; the state
/// machine that created it observes every update.
#[derive(Debug, Clone)]
pub struct RegistrationNotifier {
    tx: Arc<watch::Sender<RegistrationStatus>>,
}

impl RegistrationNotifier {
    /// Create a notifier and the receiver that observes it.
    pub fn channel() -> (Self, watch::Receiver<RegistrationStatus>) {
        let (tx, rx) = watch::channel(RegistrationStatus::default());
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Publish a new registration status.
    pub fn notify(&self, status: RegistrationStatus) {
        self.tx.send_replace(status);
    }
}

/// Security asset slots on the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SecurityAsset {
    /// Broker trust anchor.
    RootCa,
    /// MQTT client certificate.
    ClientCertificate,
    /// MQTT client private key.
    PrivateKey,
}

/// Cellular modem with its embedded network stack.
#[async_trait]
pub trait CellularModem: Send {
    /// MQTT client running on the modem.
    type Mqtt: MqttLink;
    /// TCP socket on the modem.
    type Socket: NtripSocket;
    /// HTTPS client on the modem.
    type Http: HttpsClient;

    /// Probe for the modem.
    async fn detect(&mut self) -> Result<(), DriverError>;

    /// Query the SIM.
    async fn sim_status(&mut self) -> Result<SimStatus, DriverError>;

    /// Unlock the SIM.
    async fn enter_pin(&mut self, pin: &str) -> Result<(), DriverError>;

    /// Resolve and select the network operator profile.
    async fn select_operator_profile(&mut self) -> Result<(), DriverError>;

    /// Start registration; status changes arrive through `notifier`.
    async fn request_registration(&mut self, notifier: RegistrationNotifier) -> Result<(), DriverError>;

    /// Activate a packet-data context on `apn`.
    async fn activate_context(&mut self, apn: &str) -> Result<(), DriverError>;

    /// Create the TLS security profile used by MQTT.
    async fn configure_tls_profile(&mut self) -> Result<(), DriverError>;

    /// Import one PEM asset into the modem's certificate store.
    async fn import_asset(&mut self, asset: SecurityAsset, pem: &str) -> Result<(), DriverError>;

    /// Configure the MQTT profile for `identity`.
    async fn configure_mqtt_profile(
        &mut self,
        identity: &ProvisioningIdentity,
        port: u16,
    ) -> Result<(), DriverError>;

    /// MQTT client.
    fn mqtt(&mut self) -> &mut Self::Mqtt;

    /// NTRIP socket.
    fn socket(&mut self) -> &mut Self::Socket;

    /// HTTPS client.
    fn http(&mut self) -> &mut Self::Http;
}

// ---------------------------------------------------------------------------
// WiFi
// ---------------------------------------------------------------------------

/// WLAN interface with host network stack.
#[async_trait]
pub trait WifiLink: Send {
    /// MQTT client.
    type Mqtt: MqttLink;
    /// NTRIP socket.
    type Socket: NtripSocket;
    /// HTTPS client.
    type Http: HttpsClient;

    /// Bring the radio up and start associating.
    async fn start(&mut self, settings: &WifiSettings) -> Result<(), DriverError>;

    /// `true` while associated with an access point.
    async fn is_associated(&mut self) -> bool;

    /// Resolve `host` through DNS.
    async fn resolve(&mut self, host: &str) -> Result<(), DriverError>;

    /// MQTT client.
    fn mqtt(&mut self) -> &mut Self::Mqtt;

    /// NTRIP socket.
    fn socket(&mut self) -> &mut Self::Socket;

    /// HTTPS client.
    fn http(&mut self) -> &mut Self::Http;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifier_publishes_latest_status() {
        let (notifier, mut rx) = RegistrationNotifier::channel();
        assert_eq!(*rx.borrow(), RegistrationStatus::NotRegistered);
        notifier.clone().notify(RegistrationStatus::Searching);
        notifier.notify(RegistrationStatus::Roaming);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_registered());
    }

    #[test]
    fn http_success_range() {
        let ok = HttpResponse { status: 204, body: Vec::new() };
        let bad = HttpResponse { status: 404, body: Vec::new() };
        assert!(ok.is_success());
        assert!(!bad.is_success());
    }
}
