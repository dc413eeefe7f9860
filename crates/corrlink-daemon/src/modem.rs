//! Cellular driver for hosts without a modem.
//!
//! Detection always fails, so the cellular state machine stays in `Init`
//! and keeps probing on its retry interval.

use std::time::Duration;

use async_trait::async_trait;
use corrlink_core::DriverError;
use corrlink_core::drivers::{
    CellularModem, HttpResponse, HttpsClient, MqttLink, NtripSocket, RegistrationNotifier,
    SecurityAsset, SimStatus,
};
use corrlink_models::ProvisioningIdentity;

/// Network primitive of a modem that is not there.
#[derive(Debug, Default)]
pub struct Unavailable;

#[async_trait]
impl MqttLink for Unavailable {
    async fn connect(&mut self, _identity: &ProvisioningIdentity, _port: u16) -> Result<(), DriverError> {
        Err(DriverError::NotPresent)
    }

    async fn disconnect(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn subscribe(&mut self, _topic: &str) -> Result<(), DriverError> {
        Err(DriverError::NotPresent)
    }

    async fn unsubscribe(&mut self, _topic: &str) -> Result<(), DriverError> {
        Err(DriverError::NotPresent)
    }

    fn pending_messages(&self) -> usize {
        0
    }

    async fn read_message(&mut self) -> Result<Option<(String, Vec<u8>)>, DriverError> {
        Err(DriverError::NotPresent)
    }

    fn is_connected(&self) -> bool {
        false
    }
}

#[async_trait]
impl NtripSocket for Unavailable {
    async fn connect(&mut self, _host: &str, _port: u16, _tls: bool) -> Result<(), DriverError> {
        Err(DriverError::NotPresent)
    }

    async fn write(&mut self, _bytes: &[u8]) -> Result<(), DriverError> {
        Err(DriverError::NotPresent)
    }

    async fn read(&mut self, _buf: &mut [u8], _timeout: Duration) -> Result<usize, DriverError> {
        Err(DriverError::NotPresent)
    }

    async fn close(&mut self) {}

    fn is_connected(&self) -> bool {
        false
    }
}

#[async_trait]
impl HttpsClient for Unavailable {
    async fn get(&mut self, _url: &str) -> Result<HttpResponse, DriverError> {
        Err(DriverError::NotPresent)
    }

    async fn post_json(&mut self, _url: &str, _body: &str) -> Result<HttpResponse, DriverError> {
        Err(DriverError::NotPresent)
    }
}

#[derive(Debug, Default)]
pub struct AbsentModem {
    link: Unavailable,
    socket: Unavailable,
    http: Unavailable,
}

#[async_trait]
impl CellularModem for AbsentModem {
    type Mqtt = Unavailable;
    type Socket = Unavailable;
    type Http = Unavailable;

    async fn detect(&mut self) -> Result<(), DriverError> {
        Err(DriverError::NotPresent)
    }

    async fn sim_status(&mut self) -> Result<SimStatus, DriverError> {
        Ok(SimStatus::Absent)
    }

    async fn enter_pin(&mut self, _pin: &str) -> Result<(), DriverError> {
        Err(DriverError::NotPresent)
    }

    async fn select_operator_profile(&mut self) -> Result<(), DriverError> {
        Err(DriverError::NotPresent)
    }

    async fn request_registration(&mut self, _notifier: RegistrationNotifier) -> Result<(), DriverError> {
        Err(DriverError::NotPresent)
    }

    async fn activate_context(&mut self, _apn: &str) -> Result<(), DriverError> {
        Err(DriverError::NotPresent)
    }

    async fn configure_tls_profile(&mut self) -> Result<(), DriverError> {
        Err(DriverError::NotPresent)
    }

    async fn import_asset(&mut self, _asset: SecurityAsset, _pem: &str) -> Result<(), DriverError> {
        Err(DriverError::NotPresent)
    }

    async fn configure_mqtt_profile(
        &mut self,
        _identity: &ProvisioningIdentity,
        _port: u16,
    ) -> Result<(), DriverError> {
        Err(DriverError::NotPresent)
    }

    fn mqtt(&mut self) -> &mut Unavailable {
        &mut self.link
    }

    fn socket(&mut self) -> &mut Unavailable {
        &mut self.socket
    }

    fn http(&mut self) -> &mut Unavailable {
        &mut self.http
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corrlink_core::config::{MemoryConfigStore, Settings, TransportTimings};
    use corrlink_core::{CellularState, CellularTransport, Mailbox, TransportContext};
    use corrlink_models::Source;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn absent_modem_keeps_probing() {
        let ctx = TransportContext {
            source: Source::Cellular,
            config: Arc::new(MemoryConfigStore::new(Settings::default())),
            corrections: Arc::new(Mailbox::new("router", 4)),
            timings: TransportTimings::default(),
        };
        let mut transport = CellularTransport::new(AbsentModem::default(), ctx);
        for _ in 0..3 {
            transport.step().await;
            assert_eq!(transport.state(), CellularState::Init);
            tokio::time::advance(TransportTimings::default().detect_retry).await;
        }
    }
}
