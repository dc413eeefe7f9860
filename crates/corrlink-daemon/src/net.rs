//! Host network drivers: reqwest for HTTPS, tokio TCP for NTRIP and
//! rumqttc for the PointPerfect broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use corrlink_core::DriverError;
use corrlink_core::config::WifiSettings;
use corrlink_core::drivers::{HttpResponse, HttpsClient, MqttLink, NtripSocket, WifiLink};
use corrlink_models::ProvisioningIdentity;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(60);
const MQTT_INBOX: usize = 64;
const PROBE_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// HTTPS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReqwestHttps {
    client: reqwest::Client,
}

impl ReqwestHttps {
    pub fn new() -> Result<Self, DriverError> {
        let client = reqwest::Client::builder()
            .timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(map_reqwest)?;
        Ok(Self { client })
    }

    async fn finish(resp: reqwest::Response) -> Result<HttpResponse, DriverError> {
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(map_reqwest)?.to_vec();
        debug!(status, len = body.len(), "https response");
        Ok(HttpResponse { status, body })
    }
}

fn map_reqwest(e: reqwest::Error) -> DriverError {
    if e.is_timeout() {
        DriverError::Timeout
    } else {
        DriverError::Rejected(e.to_string())
    }
}

#[async_trait]
impl HttpsClient for ReqwestHttps {
    async fn get(&mut self, url: &str) -> Result<HttpResponse, DriverError> {
        let resp = self.client.get(url).send().await.map_err(map_reqwest)?;
        Self::finish(resp).await
    }

    async fn post_json(&mut self, url: &str, body: &str) -> Result<HttpResponse, DriverError> {
        let resp = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_owned())
            .send()
            .await
            .map_err(map_reqwest)?;
        Self::finish(resp).await
    }
}

// ---------------------------------------------------------------------------
// NTRIP socket
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct TcpSocket {
    stream: Option<TcpStream>,
}

#[async_trait]
impl NtripSocket for TcpSocket {
    async fn connect(&mut self, host: &str, port: u16, tls: bool) -> Result<(), DriverError> {
        if tls {
            return Err(DriverError::Unsupported("NTRIP over TLS"));
        }
        self.stream = None;
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| DriverError::Timeout)??;
        stream.set_nodelay(true)?;
        debug!(host, port, "tcp connected");
        self.stream = Some(stream);
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        let stream = self.stream.as_mut().ok_or(DriverError::Disconnected)?;
        if let Err(e) = stream.write_all(bytes).await {
            self.stream = None;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, DriverError> {
        let stream = self.stream.as_mut().ok_or(DriverError::Disconnected)?;
        let result = tokio::time::timeout(timeout, stream.read(buf)).await;
        match result {
            Err(_) => Ok(0),
            Ok(Ok(0)) => {
                debug!("tcp peer closed");
                self.stream = None;
                Err(DriverError::Disconnected)
            }
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => {
                self.stream = None;
                Err(e.into())
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

// ---------------------------------------------------------------------------
// MQTT
// ---------------------------------------------------------------------------

/// rumqttc client whose event loop runs on its own task.
#[derive(Debug)]
pub struct RumqttLink {
    client: Option<AsyncClient>,
    inbox: Option<mpsc::Receiver<(String, Vec<u8>)>>,
    connected: Arc<AtomicBool>,
    event_loop: Option<JoinHandle<()>>,
}

impl Default for RumqttLink {
    fn default() -> Self {
        Self {
            client: None,
            inbox: None,
            connected: Arc::new(AtomicBool::new(false)),
            event_loop: None,
        }
    }
}

impl RumqttLink {
    fn client(&self) -> Result<&AsyncClient, DriverError> {
        match &self.client {
            Some(client) if self.is_connected() => Ok(client),
            _ => Err(DriverError::Disconnected),
        }
    }

    fn teardown(&mut self) {
        self.connected.store(false, Ordering::Release);
        self.client = None;
        self.inbox = None;
        if let Some(task) = self.event_loop.take() {
            task.abort();
        }
    }
}

fn mqtt_options(identity: &ProvisioningIdentity, port: u16) -> MqttOptions {
    let mut options = MqttOptions::new(&identity.client_id, &identity.broker_host, port);
    options.set_keep_alive(MQTT_KEEP_ALIVE);
    options.set_clean_session(true);
    options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
        ca: identity.root_ca.as_bytes().to_vec(),
        alpn: None,
        client_auth: Some((
            identity.certificate.as_bytes().to_vec(),
            identity.private_key.as_bytes().to_vec(),
        )),
    }));
    options
}

#[async_trait]
impl MqttLink for RumqttLink {
    async fn connect(&mut self, identity: &ProvisioningIdentity, port: u16) -> Result<(), DriverError> {
        self.teardown();
        self.connected = Arc::new(AtomicBool::new(false));

        let (client, mut event_loop) = AsyncClient::new(mqtt_options(identity, port), MQTT_INBOX);
        let (tx, rx) = mpsc::channel(MQTT_INBOX);
        let (ready_tx, ready_rx) = oneshot::channel();
        let connected = self.connected.clone();

        let task = tokio::spawn(async move {
            let mut ready = Some(ready_tx);
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        connected.store(true, Ordering::Release);
                        if let Some(ready) = ready.take() {
                            let _ = ready.send(Ok(()));
                        }
                        debug!(code = ?ack.code, "mqtt connack");
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = (publish.topic, publish.payload.to_vec());
                        if let Err(e) = tx.try_send(message) {
                            warn!(error = %e, "mqtt inbox full, dropping message");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        connected.store(false, Ordering::Release);
                        match ready.take() {
                            Some(ready) => {
                                let _ = ready.send(Err(DriverError::Rejected(e.to_string())));
                            }
                            None => warn!(error = %e, "mqtt connection lost"),
                        }
                        break;
                    }
                }
            }
        });

        self.client = Some(client);
        self.inbox = Some(rx);
        self.event_loop = Some(task);

        let outcome = match tokio::time::timeout(CONNECT_TIMEOUT, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DriverError::Disconnected),
            Err(_) => Err(DriverError::Timeout),
        };
        match outcome {
            Ok(()) => {
                info!(broker = %identity.broker_host, port, "mqtt connected");
                Ok(())
            }
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), DriverError> {
        if let Some(client) = &self.client {
            if self.is_connected() {
                let _ = client.disconnect().await;
            }
        }
        self.teardown();
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), DriverError> {
        self.client()?
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| DriverError::Rejected(e.to_string()))
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), DriverError> {
        self.client()?
            .unsubscribe(topic)
            .await
            .map_err(|e| DriverError::Rejected(e.to_string()))
    }

    fn pending_messages(&self) -> usize {
        self.inbox.as_ref().map_or(0, mpsc::Receiver::len)
    }

    async fn read_message(&mut self) -> Result<Option<(String, Vec<u8>)>, DriverError> {
        let inbox = self.inbox.as_mut().ok_or(DriverError::Disconnected)?;
        match inbox.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) if self.connected.load(Ordering::Acquire) => Ok(None),
            Err(_) => Err(DriverError::Disconnected),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl Drop for RumqttLink {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ---------------------------------------------------------------------------
// Host network link
// ---------------------------------------------------------------------------

/// The host's own network stack presented as the WiFi link.
///
/// The host manages association itself, so `start` only records that the
/// link is in use and `is_associated` probes name resolution, at most once
/// per [`PROBE_INTERVAL`].
#[derive(Debug)]
pub struct HostNetwork {
    started: bool,
    probe_host: String,
    last_probe: Option<(Instant, bool)>,
    mqtt: RumqttLink,
    socket: TcpSocket,
    http: ReqwestHttps,
}

impl HostNetwork {
    pub fn new(probe_host: impl Into<String>) -> Result<Self, DriverError> {
        Ok(Self {
            started: false,
            probe_host: probe_host.into(),
            last_probe: None,
            mqtt: RumqttLink::default(),
            socket: TcpSocket::default(),
            http: ReqwestHttps::new()?,
        })
    }
}

#[async_trait]
impl WifiLink for HostNetwork {
    type Mqtt = RumqttLink;
    type Socket = TcpSocket;
    type Http = ReqwestHttps;

    async fn start(&mut self, settings: &WifiSettings) -> Result<(), DriverError> {
        info!(ssid = %settings.ssid, "using host network");
        self.started = true;
        Ok(())
    }

    async fn is_associated(&mut self) -> bool {
        if !self.started {
            return false;
        }
        if let Some((at, reachable)) = self.last_probe {
            if at.elapsed() < PROBE_INTERVAL {
                return reachable;
            }
        }
        let host = self.probe_host.clone();
        let reachable = self.resolve(&host).await.is_ok();
        if !reachable {
            debug!(host = %host, "host network probe failed");
        }
        self.last_probe = Some((Instant::now(), reachable));
        reachable
    }

    async fn resolve(&mut self, host: &str) -> Result<(), DriverError> {
        let lookup = tokio::time::timeout(CONNECT_TIMEOUT, tokio::net::lookup_host((host, 443)))
            .await
            .map_err(|_| DriverError::Timeout)??;
        let mut addrs = lookup.peekable();
        if addrs.peek().is_none() {
            return Err(DriverError::Rejected(format!("{host} has no addresses")));
        }
        Ok(())
    }

    fn mqtt(&mut self) -> &mut RumqttLink {
        &mut self.mqtt
    }

    fn socket(&mut self) -> &mut TcpSocket {
        &mut self.socket
    }

    fn http(&mut self) -> &mut ReqwestHttps {
        &mut self.http
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_socket_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 5];
            peer.read_exact(&mut request).await.unwrap();
            peer.write_all(b"ICY 200 OK\r\n").await.unwrap();
            request
        });

        let mut socket = TcpSocket::default();
        socket.connect("127.0.0.1", port, false).await.unwrap();
        socket.write(b"hello").await.unwrap();

        let mut buf = [0u8; 64];
        let n = socket.read(&mut buf, Duration::from_secs(5)).await.unwrap();
        assert_eq!(&buf[..n], b"ICY 200 OK\r\n");
        assert_eq!(&server.await.unwrap(), b"hello");

        // Peer has gone away.
        let err = socket.read(&mut buf, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, DriverError::Disconnected));
        assert!(!socket.is_connected());
    }

    #[tokio::test]
    async fn tcp_read_timeout_is_zero() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (peer, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(peer);
        });

        let mut socket = TcpSocket::default();
        socket.connect("127.0.0.1", port, false).await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(socket.read(&mut buf, Duration::from_millis(20)).await.unwrap(), 0);
        assert!(socket.is_connected());
        socket.close().await;
        assert!(!socket.is_connected());
    }

    #[tokio::test]
    async fn tls_is_refused() {
        let mut socket = TcpSocket::default();
        let err = socket.connect("localhost", 443, true).await.unwrap_err();
        assert!(matches!(err, DriverError::Unsupported(_)));
    }

    #[tokio::test]
    async fn unconnected_mqtt_link() {
        let mut link = RumqttLink::default();
        assert!(!link.is_connected());
        assert_eq!(link.pending_messages(), 0);
        assert!(matches!(link.subscribe("/pp/ubx/mga").await, Err(DriverError::Disconnected)));
        assert!(matches!(link.read_message().await, Err(DriverError::Disconnected)));
        link.disconnect().await.unwrap();
    }
}
