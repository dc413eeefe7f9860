//! Cellular transport state machine.
//!
//! ```text
//! Init ─▶ CheckSim ─▶ WaitRegister ─▶ Registered ─▶ Online ─┬─▶ Mqtt
//!                          ▲                          ▲      └─▶ Ntrip
//!                          └── registration lost ─────┴── source changed / link lost
//! ```
//!
//! Registration status reaches the machine through a [`RegistrationNotifier`]
//! handed to the modem; updates are applied at the start of every step and
//! are idempotent.

use corrlink_models::ProvisioningIdentity;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::ntrip::NtripClient;
use super::provision::provision;
use super::session::MqttSession;
use super::{RetryGate, TransportContext};
use crate::checklist::Checklist;
use crate::config::CorrectionLink;
use crate::drivers::{
    CellularModem, MqttLink, NtripSocket, RegistrationNotifier, RegistrationStatus, SecurityAsset,
    SimStatus,
};
use crate::error::{ChecklistError, DriverError};

const LINK: CorrectionLink = CorrectionLink::Cellular;

/// Lifecycle of the cellular transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
pub enum CellularState {
    /// Looking for the modem.
    Init,
    /// Validating the SIM and operator profile.
    CheckSim,
    /// Waiting for network registration.
    WaitRegister,
    /// Registered; activating a packet-data context.
    Registered,
    /// Data link up, no correction session.
    Online,
    /// MQTT session active.
    Mqtt,
    /// NTRIP session active.
    Ntrip,
}

/// Cellular transport driving a [`CellularModem`].
pub struct CellularTransport<M: CellularModem> {
    modem: M,
    ctx: TransportContext,
    state: CellularState,
    retry: RetryGate,
    session: MqttSession,
    ntrip: NtripClient,
    notifier: RegistrationNotifier,
    registration: watch::Receiver<RegistrationStatus>,
    states: watch::Sender<CellularState>,
}

impl<M: CellularModem> CellularTransport<M> {
    /// Machine in `Init`.
    pub fn new(modem: M, ctx: TransportContext) -> Self {
        let (notifier, registration) = RegistrationNotifier::channel();
        let (states, _) = watch::channel(CellularState::Init);
        Self {
            modem,
            ctx,
            state: CellularState::Init,
            retry: RetryGate::default(),
            session: MqttSession::new(),
            ntrip: NtripClient::new(),
            notifier,
            registration,
            states,
        }
    }

    /// Current state.
    pub fn state(&self) -> CellularState {
        self.state
    }

    /// Observe state changes.
    pub fn watch_state(&self) -> watch::Receiver<CellularState> {
        self.states.subscribe()
    }

    /// The driven modem.
    pub fn modem(&mut self) -> &mut M {
        &mut self.modem
    }

    /// The MQTT session (subscriptions and counters).
    pub fn session(&self) -> &MqttSession {
        &self.session
    }

    fn set_state(&mut self, next: CellularState) {
        if next == self.state {
            return;
        }
        info!(transport = %self.ctx.source, from = %self.state, to = %next, "state change");
        self.state = next;
        self.retry.clear();
        self.states.send_replace(next);
    }

    /// Close sockets and forget subscriptions, then land in `next`.
    async fn fall_back(&mut self, next: CellularState, throttle: bool) {
        self.session.reset();
        if self.ntrip.is_connected() || self.modem.socket().is_connected() {
            self.ntrip.close(self.modem.socket()).await;
        }
        if self.modem.mqtt().is_connected() {
            if let Err(e) = self.modem.mqtt().disconnect().await {
                debug!(transport = %self.ctx.source, error = %e, "MQTT disconnect failed");
            }
        }
        self.set_state(next);
        if throttle {
            self.retry.arm();
        }
    }

    async fn apply_registration(&mut self) {
        if !self.registration.has_changed().unwrap_or(false) {
            return;
        }
        let status = *self.registration.borrow_and_update();
        if status.is_registered() {
            if self.state == CellularState::WaitRegister {
                info!(transport = %self.ctx.source, %status, "network registered");
                self.set_state(CellularState::Registered);
            }
        } else if self.state >= CellularState::Registered {
            warn!(transport = %self.ctx.source, %status, "network registration lost");
            self.fall_back(CellularState::WaitRegister, false).await;
        }
    }

    /// Run one scheduling quantum worth of work.
    pub async fn step(&mut self) {
        self.apply_registration().await;
        let timings = self.ctx.timings.clone();
        match self.state {
            CellularState::Init => {
                if !self.retry.due(timings.detect_retry) {
                    return;
                }
                match self.modem.detect().await {
                    Ok(()) => self.set_state(CellularState::CheckSim),
                    Err(DriverError::NotPresent) => {
                        debug!(transport = %self.ctx.source, "modem not detected");
                        self.retry.arm();
                    }
                    Err(e) => {
                        warn!(transport = %self.ctx.source, error = %e, "modem detection failed");
                        self.retry.arm();
                    }
                }
            }
            CellularState::CheckSim => {
                if !self.retry.due(timings.sim_retry) {
                    return;
                }
                match self.check_sim().await {
                    Ok(()) => self.set_state(CellularState::WaitRegister),
                    Err(e) => {
                        warn!(transport = %self.ctx.source, step = e.step, error = %e, "SIM check failed");
                        self.retry.arm();
                    }
                }
            }
            CellularState::WaitRegister => {
                if !self.retry.due(timings.registration_retry) {
                    return;
                }
                if let Err(e) = self.modem.request_registration(self.notifier.clone()).await {
                    warn!(transport = %self.ctx.source, error = %e, "registration request failed");
                }
                self.retry.arm();
            }
            CellularState::Registered => {
                if !self.retry.due(timings.activation_retry) {
                    return;
                }
                if self.activate().await {
                    self.set_state(CellularState::Online);
                } else {
                    self.retry.arm();
                }
            }
            CellularState::Online => self.online().await,
            CellularState::Mqtt => self.mqtt().await,
            CellularState::Ntrip => self.ntrip().await,
        }
    }

    async fn check_sim(&mut self) -> Result<(), ChecklistError> {
        let pin = self.ctx.config.settings().cellular.sim_pin;
        let mut tx = Checklist::new("sim check");
        match tx.run(self.modem.sim_status()).await? {
            SimStatus::Ready => tx.check(Ok(()))?,
            SimStatus::Absent => tx.check::<()>(Err(DriverError::NotPresent))?,
            SimStatus::PinRequired => match pin.as_deref() {
                Some(pin) => tx.run(self.modem.enter_pin(pin)).await?,
                None => tx.check::<()>(Err(DriverError::Rejected(
                    "SIM PIN required but not configured".into(),
                )))?,
            },
        }
        tx.run(self.modem.select_operator_profile()).await
    }

    async fn activate(&mut self) -> bool {
        let mut profiles = self.ctx.config.settings().cellular.apn_profiles;
        if profiles.is_empty() {
            profiles.push(String::new());
        }
        for apn in &profiles {
            match self.modem.activate_context(apn).await {
                Ok(()) => {
                    info!(transport = %self.ctx.source, apn = %apn, "packet data context active");
                    return true;
                }
                Err(e) => warn!(transport = %self.ctx.source, apn = %apn, error = %e, "context activation failed"),
            }
        }
        false
    }

    async fn online(&mut self) {
        let settings = self.ctx.config.settings();
        let timings = &self.ctx.timings;
        if settings.ntrip_ready(LINK) {
            if !self.retry.due(timings.ntrip_retry) {
                return;
            }
            match self.ntrip.connect(self.modem.socket(), &settings.ntrip, &self.ctx).await {
                Ok(()) => self.set_state(CellularState::Ntrip),
                Err(e) => {
                    warn!(transport = %self.ctx.source, error = %e, "NTRIP connect failed");
                    self.retry.arm();
                }
            }
            return;
        }
        if !settings.point_perfect_selected(LINK) {
            return;
        }

        match settings.identity.filter(ProvisioningIdentity::is_complete) {
            None => {
                if !self.retry.due(timings.provision_retry) {
                    return;
                }
                match provision(self.modem.http(), &settings.provisioning).await {
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
                    Ok(()) => self.set_state(CellularState::Mqtt),
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
        tx.run(self.modem.configure_tls_profile()).await?;
        tx.run(self.modem.import_asset(SecurityAsset::RootCa, &identity.root_ca)).await?;
        tx.run(self.modem.import_asset(SecurityAsset::ClientCertificate, &identity.certificate))
            .await?;
        tx.run(self.modem.import_asset(SecurityAsset::PrivateKey, &identity.private_key))
            .await?;
        tx.run(self.modem.configure_mqtt_profile(identity, port)).await?;
        tx.run(self.modem.mqtt().connect(identity, port)).await
    }

    async fn mqtt(&mut self) {
        if !self.ctx.config.settings().mqtt_ready(LINK) {
            info!(transport = %self.ctx.source, "MQTT no longer selected");
            self.fall_back(CellularState::Online, false).await;
            return;
        }
        if !self.modem.mqtt().is_connected() {
            warn!(transport = %self.ctx.source, "MQTT connection lost");
            self.fall_back(CellularState::Online, true).await;
            return;
        }
        if let Err(e) = self.session.step(self.modem.mqtt(), &self.ctx).await {
            warn!(transport = %self.ctx.source, error = %e, "MQTT read failed");
            self.fall_back(CellularState::Online, true).await;
        }
    }

    async fn ntrip(&mut self) {
        let settings = self.ctx.config.settings();
        if !settings.ntrip_ready(LINK) || !self.ntrip.is_connected_to(&settings.ntrip) {
            info!(transport = %self.ctx.source, "NTRIP settings changed");
            self.fall_back(CellularState::Online, false).await;
            return;
        }
        if let Err(e) = self.ntrip.pump(self.modem.socket(), &self.ctx).await {
            warn!(transport = %self.ctx.source, error = %e, "NTRIP session failed");
            self.fall_back(CellularState::Online, true).await;
        }
    }

    /// Step every tick until `shutdown` flips to `true` or its sender goes away.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(transport = %self.ctx.source, "cellular transport started");
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
        self.fall_back(CellularState::Online, false).await;
        info!(transport = %self.ctx.source, "cellular transport stopped");
    }
}
