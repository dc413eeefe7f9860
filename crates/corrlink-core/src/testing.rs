//! Scripted driver doubles for unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corrlink_models::{ProvisioningIdentity, Source};

use crate::config::{MemoryConfigStore, Settings, TransportTimings, WifiSettings};
use crate::drivers::{
    CellularModem, GnssReceiver, HttpResponse, HttpsClient, MqttLink, NtripSocket,
    RegistrationNotifier, RegistrationStatus, SecurityAsset, SimStatus, WifiLink,
};
use crate::error::DriverError;
use crate::mailbox::Mailbox;
use crate::router::Discriminator;
use crate::transport::TransportContext;

pub fn identity(lband: bool) -> ProvisioningIdentity {
    ProvisioningIdentity {
        client_id: "client-1".into(),
        root_ca: "ROOT".into(),
        certificate: "CERT".into(),
        private_key: "KEY".into(),
        broker_host: "pp.example".into(),
        supports_lband: lband,
        provisioned_at: chrono::Utc::now(),
    }
}

pub fn test_context(source: Source, settings: Settings) -> TransportContext {
    TransportContext {
        source,
        config: Arc::new(MemoryConfigStore::new(settings)),
        corrections: Arc::new(Mailbox::new("router", 16)),
        timings: TransportTimings::default(),
    }
}

// ---------------------------------------------------------------------------
// MQTT
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MockMqtt {
    pub connected: bool,
    pub fail_connect: bool,
    pub fail_subscribe: HashSet<String>,
    pub inbox: VecDeque<(String, Vec<u8>)>,
    pub calls: Vec<String>,
}

impl MockMqtt {
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    pub fn deliver(&mut self, topic: &str, payload: &[u8]) {
        self.inbox.push_back((topic.to_string(), payload.to_vec()));
    }
}

#[async_trait]
impl MqttLink for MockMqtt {
    async fn connect(&mut self, _identity: &ProvisioningIdentity, _port: u16) -> Result<(), DriverError> {
        self.calls.push("connect".into());
        if self.fail_connect {
            return Err(DriverError::Rejected("connect".into()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DriverError> {
        self.calls.push("disconnect".into());
        self.connected = false;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), DriverError> {
        self.calls.push(format!("subscribe {topic}"));
        if self.fail_subscribe.contains(topic) {
            return Err(DriverError::Rejected(topic.into()));
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), DriverError> {
        self.calls.push(format!("unsubscribe {topic}"));
        Ok(())
    }

    fn pending_messages(&self) -> usize {
        self.inbox.len()
    }

    async fn read_message(&mut self) -> Result<Option<(String, Vec<u8>)>, DriverError> {
        if !self.connected {
            return Err(DriverError::Disconnected);
        }
        Ok(self.inbox.pop_front())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MockSocket {
    pub connected: bool,
    pub fail_connect: bool,
    pub replies: VecDeque<Vec<u8>>,
    pub written: Vec<Vec<u8>>,
    pub closed: usize,
}

impl MockSocket {
    pub fn with_replies<'a>(replies: impl IntoIterator<Item = &'a [u8]>) -> Self {
        Self {
            replies: replies.into_iter().map(<[u8]>::to_vec).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl NtripSocket for MockSocket {
    async fn connect(&mut self, _host: &str, _port: u16, _tls: bool) -> Result<(), DriverError> {
        if self.fail_connect {
            return Err(DriverError::Io(std::io::ErrorKind::ConnectionRefused.into()));
        }
        self.connected = true;
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        if !self.connected {
            return Err(DriverError::Disconnected);
        }
        self.written.push(bytes.to_vec());
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, DriverError> {
        if !self.connected {
            return Err(DriverError::Disconnected);
        }
        let Some(mut chunk) = self.replies.pop_front() else {
            tokio::time::sleep(timeout).await;
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.replies.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    async fn close(&mut self) {
        self.connected = false;
        self.closed += 1;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MockHttp {
    pub responses: VecDeque<HttpResponse>,
    pub requests: Vec<String>,
}

impl MockHttp {
    pub fn respond(&mut self, status: u16, body: &str) {
        self.responses.push_back(HttpResponse {
            status,
            body: body.as_bytes().to_vec(),
        });
    }

    fn next(&mut self) -> Result<HttpResponse, DriverError> {
        self.responses.pop_front().ok_or(DriverError::Timeout)
    }
}

#[async_trait]
impl HttpsClient for MockHttp {
    async fn get(&mut self, url: &str) -> Result<HttpResponse, DriverError> {
        self.requests.push(format!("GET {url}"));
        self.next()
    }

    async fn post_json(&mut self, url: &str, body: &str) -> Result<HttpResponse, DriverError> {
        self.requests.push(format!("POST {url} {body}"));
        self.next()
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MockReceiver {
    pub pushed: Vec<Vec<u8>>,
    pub discriminators: Vec<Discriminator>,
    pub failing_switches: usize,
    pub offline: bool,
}

#[async_trait]
impl GnssReceiver for MockReceiver {
    async fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        if self.offline {
            return Err(DriverError::NotPresent);
        }
        self.pushed.push(bytes.to_vec());
        Ok(())
    }

    async fn set_correction_discriminator(&mut self, value: Discriminator) -> Result<(), DriverError> {
        self.discriminators.push(value);
        if self.failing_switches > 0 {
            self.failing_switches -= 1;
            return Err(DriverError::Rejected("CFG-VALSET".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cellular modem
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MockModem {
    pub calls: Vec<String>,
    pub failing: HashSet<String>,
    pub sim: SimStatus,
    pub auto_register: Option<RegistrationStatus>,
    pub notifier: Option<RegistrationNotifier>,
    pub mqtt: MockMqtt,
    pub socket: MockSocket,
    pub http: MockHttp,
}

impl Default for MockModem {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            failing: HashSet::new(),
            sim: SimStatus::Ready,
            auto_register: Some(RegistrationStatus::Home),
            notifier: None,
            mqtt: MockMqtt::default(),
            socket: MockSocket::default(),
            http: MockHttp::default(),
        }
    }
}

impl MockModem {
    pub fn fail(&mut self, op: &str) {
        self.failing.insert(op.to_string());
    }

    pub fn heal(&mut self, op: &str) {
        self.failing.remove(op);
    }

    fn op(&mut self, name: String) -> Result<(), DriverError> {
        let failed = self.failing.contains(&name);
        self.calls.push(name.clone());
        if !failed {
            Ok(())
        } else if name == "detect" {
            Err(DriverError::NotPresent)
        } else {
            Err(DriverError::Rejected(name))
        }
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.iter().filter(|c| *c == op).count()
    }
}

#[async_trait]
impl CellularModem for MockModem {
    type Mqtt = MockMqtt;
    type Socket = MockSocket;
    type Http = MockHttp;

    async fn detect(&mut self) -> Result<(), DriverError> {
        self.op("detect".into())
    }

    async fn sim_status(&mut self) -> Result<SimStatus, DriverError> {
        self.op("sim status".into()).map(|()| self.sim)
    }

    async fn enter_pin(&mut self, pin: &str) -> Result<(), DriverError> {
        self.op(format!("pin {pin}"))?;
        self.sim = SimStatus::Ready;
        Ok(())
    }

    async fn select_operator_profile(&mut self) -> Result<(), DriverError> {
        self.op("operator profile".into())
    }

    async fn request_registration(&mut self, notifier: RegistrationNotifier) -> Result<(), DriverError> {
        self.op("register".into())?;
        if let Some(status) = self.auto_register {
            notifier.notify(status);
        }
        self.notifier = Some(notifier);
        Ok(())
    }

    async fn activate_context(&mut self, apn: &str) -> Result<(), DriverError> {
        self.op(format!("activate {apn}"))
    }

    async fn configure_tls_profile(&mut self) -> Result<(), DriverError> {
        self.op("tls profile".into())
    }

    async fn import_asset(&mut self, asset: SecurityAsset, _pem: &str) -> Result<(), DriverError> {
        self.op(format!("import {asset}"))
    }

    async fn configure_mqtt_profile(&mut self, _identity: &ProvisioningIdentity, _port: u16) -> Result<(), DriverError> {
        self.op("mqtt profile".into())
    }

    fn mqtt(&mut self) -> &mut MockMqtt {
        &mut self.mqtt
    }

    fn socket(&mut self) -> &mut MockSocket {
        &mut self.socket
    }

    fn http(&mut self) -> &mut MockHttp {
        &mut self.http
    }
}

// ---------------------------------------------------------------------------
// WiFi
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MockWifi {
    pub calls: Vec<String>,
    pub fail_start: bool,
    pub associated: bool,
    pub fail_resolve: bool,
    pub unresolvable: HashSet<String>,
    pub mqtt: MockMqtt,
    pub socket: MockSocket,
    pub http: MockHttp,
}

#[async_trait]
impl WifiLink for MockWifi {
    type Mqtt = MockMqtt;
    type Socket = MockSocket;
    type Http = MockHttp;

    async fn start(&mut self, settings: &WifiSettings) -> Result<(), DriverError> {
        self.calls.push(format!("start {}", settings.ssid));
        if self.fail_start {
            return Err(DriverError::NotPresent);
        }
        self.associated = true;
        Ok(())
    }

    async fn is_associated(&mut self) -> bool {
        self.associated
    }

    async fn resolve(&mut self, host: &str) -> Result<(), DriverError> {
        self.calls.push(format!("resolve {host}"));
        if self.fail_resolve || self.unresolvable.contains(host) {
            return Err(DriverError::Timeout);
        }
        Ok(())
    }

    fn mqtt(&mut self) -> &mut MockMqtt {
        &mut self.mqtt
    }

    fn socket(&mut self) -> &mut MockSocket {
        &mut self.socket
    }

    fn http(&mut self) -> &mut MockHttp {
        &mut self.http
    }
}
