//! WiFi transport state machine.
//!
//! ```text
//! Init ─▶ Searching ─▶ Connected ─▶ Online ─┬─▶ Provisioned ─▶ MqttConnected
//!                                           └─▶ Ntrip ─▶ NtripConnected
//! ```
//!
//! Losing the association from any state past `Searching` tears the
//! sessions down and goes back to `Searching`. `Connected` resolves the
//! provisioning host as a readiness probe before declaring the link online.

use corrlink_models::ProvisioningIdentity;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::ntrip::NtripClient;
use super::provision::provision;
use super::session::MqttSession;
use super::{RetryGate, TransportContext};
use crate::checklist::Checklist;
use crate::config::CorrectionLink;
use crate::drivers::{MqttLink, NtripSocket, WifiLink};
use crate::error::ChecklistError;

const LINK: CorrectionLink = CorrectionLink::Wifi;

/// Lifecycle of the WiFi transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
pub enum WifiState {
    /// Radio not started.
    Init,
    /// Waiting for association.
    Searching,
    /// Associated; waiting for DNS.
    Connected,
    /// Internet reachable, no correction session.
    Online,
    /// Correction service selected; provisioning or connecting MQTT.
    Provisioned,
    /// MQTT session active.
    MqttConnected,
    /// NTRIP selected; connecting to the caster.
    Ntrip,
    /// NTRIP session active.
    NtripConnected,
}

/// WiFi transport driving a [`WifiLink`].
pub struct WifiTransport<W: WifiLink> {
    link: W,
    ctx: TransportContext,
    state: WifiState,
    retry: RetryGate,
    session: MqttSession,
    ntrip: NtripClient,
    states: watch::Sender<WifiState>,
}

impl<W: WifiLink> WifiTransport<W> {
    /// Machine in `Init`.
    pub fn new(link: W, ctx: TransportContext) -> Self {
        let (states, _) = watch::channel(WifiState::Init);
        Self {
            link,
            ctx,
            state: WifiState::Init,
            retry: RetryGate::default(),
            session: MqttSession::new(),
            ntrip: NtripClient::new(),
            states,
        }
    }

    /// Current state.
    pub fn state(&self) -> WifiState {
        self.state
    }

    /// Observe state changes.
    pub fn watch_state(&self) -> watch::Receiver<WifiState> {
        self.states.subscribe()
    }

    /// The driven link.
    pub fn link(&mut self) -> &mut W {
        &mut self.link
    }

    /// The MQTT session.
    pub fn session(&self) -> &MqttSession {
        &self.session
    }

    fn set_state(&mut self, next: WifiState) {
        if next == self.state {
            return;
        }
        info!(transport = %self.ctx.source, from = %self.state, to = %next, "state change");
        self.state = next;
        self.retry.clear();
        self.states.send_replace(next);
    }

    async fn fall_back(&mut self, next: WifiState, throttle: bool) {
        self.session.reset();
        if self.ntrip.is_connected() || self.link.socket().is_connected() {
            self.ntrip.close(self.link.socket()).await;
        }
        if self.link.mqtt().is_connected() {
            if let Err(e) = self.link.mqtt().disconnect().await {
                debug!(transport = %self.ctx.source, error = %e, "MQTT disconnect failed");
            }
        }
        self.set_state(next);
        if throttle {
            self.retry.arm();
        }
    }

    /// Run one scheduling quantum worth of work.
    pub async fn step(&mut self) {
        if self.state > WifiState::Searching && !self.link.is_associated().await {
            warn!(transport = %self.ctx.source, "WiFi association lost");
            self.fall_back(WifiState::Searching, false).await;
            return;
        }

        let timings = self.ctx.timings.clone();
        match self.state {
            WifiState::Init => {
                if !self.retry.due(timings.detect_retry) {
                    return;
                }
                let wifi = self.ctx.config.settings().wifi;
                if wifi.ssid.is_empty() {
                    debug!(transport = %self.ctx.source, "no SSID configured");
                    self.retry.arm();
                    return;
                }
                match self.link.start(&wifi).await {
                    Ok(()) => self.set_state(WifiState::Searching),
                    Err(e) => {
                        warn!(transport = %self.ctx.source, error = %e, "WiFi start failed");
                        self.retry.arm();
                    }
                }
            }
            WifiState::Searching => {
                if self.link.is_associated().await {
                    self.set_state(WifiState::Connected);
                } else if self.retry.due(timings.association_retry) {
                    let wifi = self.ctx.config.settings().wifi;
                    if let Err(e) = self.link.start(&wifi).await {
                        warn!(transport = %self.ctx.source, error = %e, "WiFi restart failed");
                    }
                    self.retry.arm();
                }
            }
            WifiState::Connected => {
                if !self.retry.due(timings.readiness_retry) {
                    return;
                }
                let host = self.ctx.config.settings().provisioning.readiness_host;
                match self.link.resolve(&host).await {
                    Ok(()) => self.set_state(WifiState::Online),
                    Err(e) => {
                        debug!(transport = %self.ctx.source, host = %host, error = %e, "readiness probe failed");
                        self.retry.arm();
                    }
                }
            }
            WifiState::Online => {
                let settings = self.ctx.config.settings();
                if settings.ntrip_ready(LINK) {
                    self.set_state(WifiState::Ntrip);
                } else if settings.point_perfect_selected(LINK) {
                    self.set_state(WifiState::Provisioned);
                }
            }
            WifiState::Provisioned => self.provisioned().await,
            WifiState::MqttConnected => self.mqtt().await,
            WifiState::Ntrip => self.connect_ntrip().await,
            WifiState::NtripConnected => self.pump_ntrip().await,
        }
    }

    async fn provisioned(&mut self) {
        let settings = self.ctx.config.settings();
        if !settings.point_perfect_selected(LINK) {
            self.fall_back(WifiState::Online, false).await;
            return;
        }
        let timings = &self.ctx.timings;
        match settings.identity.filter(ProvisioningIdentity::is_complete) {
            None => {
                if !self.retry.due(timings.provision_retry) {
                    return;
                }
                match provision(self.link.http(), &settings.provisioning).await {
                    Ok(identity) => {
                        self.ctx.config.update(&mut |s| s.identity = Some(identity.clone()));
                        self.retry.clear();
                    }
                    Err(e) => {
                        warn!(transport = %self.ctx.source, error = %e, "provisioning failed");
                        self.retry.arm();
                    }
                }
            }
            Some(identity) => {
                if !self.retry.due(timings.mqtt_connect_retry) {
                    return;
                }
                match self.connect_mqtt(&identity, settings.provisioning.broker_port).await {
                    Ok(()) => self.set_state(WifiState::MqttConnected),
                    Err(e) => {
                        warn!(transport = %self.ctx.source, step = e.step, error = %e, "MQTT connect failed");
                        self.retry.arm();
                    }
                }
            }
        }
    }

    async fn connect_mqtt(&mut self, identity: &ProvisioningIdentity, port: u16) -> Result<(), ChecklistError> {
        let mut tx = Checklist::new("mqtt connect");
        tx.run(self.link.resolve(&identity.broker_host)).await?;
        tx.run(self.link.mqtt().connect(identity, port)).await
    }

    async fn mqtt(&mut self) {
        if !self.ctx.config.settings().mqtt_ready(LINK) {
            info!(transport = %self.ctx.source, "MQTT no longer selected");
            self.fall_back(WifiState::Online, false).await;
            return;
        }
        if !self.link.mqtt().is_connected() {
            warn!(transport = %self.ctx.source, "MQTT connection lost");
            self.fall_back(WifiState::Provisioned, true).await;
            return;
        }
        if let Err(e) = self.session.step(self.link.mqtt(), &self.ctx).await {
            warn!(transport = %self.ctx.source, error = %e, "MQTT read failed");
            self.fall_back(WifiState::Provisioned, true).await;
        }
    }

    async fn connect_ntrip(&mut self) {
        let settings = self.ctx.config.settings();
        if !settings.ntrip_ready(LINK) {
            self.fall_back(WifiState::Online, false).await;
            return;
        }
        if !self.retry.due(self.ctx.timings.ntrip_retry) {
            return;
        }
        match self.ntrip.connect(self.link.socket(), &settings.ntrip, &self.ctx).await {
            Ok(()) => self.set_state(WifiState::NtripConnected),
            Err(e) => {
                warn!(transport = %self.ctx.source, error = %e, "NTRIP connect failed");
                self.retry.arm();
            }
        }
    }

    async fn pump_ntrip(&mut self) {
        let settings = self.ctx.config.settings();
        if !settings.ntrip_ready(LINK) {
            info!(transport = %self.ctx.source, "NTRIP no longer selected");
            self.fall_back(WifiState::Online, false).await;
            return;
        }
        if !self.ntrip.is_connected_to(&settings.ntrip) {
            info!(transport = %self.ctx.source, "NTRIP settings changed, reconnecting");
            self.fall_back(WifiState::Ntrip, false).await;
            return;
        }
        if let Err(e) = self.ntrip.pump(self.link.socket(), &self.ctx).await {
            warn!(transport = %self.ctx.source, error = %e, "NTRIP session failed");
            self.fall_back(WifiState::Ntrip, true).await;
        }
    }

    /// Step every tick until `shutdown` flips to `true` or its sender goes away.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(transport = %self.ctx.source, "WiFi transport started");
        while !*shutdown.borrow() {
            self.step().await;
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = tokio::time::sleep(self.ctx.timings.tick) => {}
            }
        }
        self.fall_back(WifiState::Online, false).await;
        info!(transport = %self.ctx.source, "WiFi transport stopped");
    }
}
