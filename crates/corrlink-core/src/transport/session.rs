//! MQTT session shared by the cellular and WiFi transports.
//!
//! One [`MqttSession::step`] does a bounded amount of work: either one
//! subscription change, or one received message.

use corrlink_models::{Content, CorrectionTopics, FrequencyTable, Message, TopicKind};
use tracing::{debug, info, warn};

use super::subscriptions::{TopicChange, TopicSubscriptions};
use super::TransportContext;
use crate::drivers::MqttLink;
use crate::error::DriverError;
use crate::mailbox::Wait;

/// What a single session step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStep {
    /// Nothing to do this tick.
    Idle,
    /// A subscription change was issued.
    Changed {
        /// The change.
        change: TopicChange,
        /// Whether the broker accepted it.
        ok: bool,
    },
    /// A message was read and handled.
    Received {
        /// Topic it arrived on.
        topic: String,
        /// How it was classified.
        kind: TopicKind,
    },
}

/// Subscription churn and message classification for one MQTT link.
#[derive(Debug, Default)]
pub struct MqttSession {
    topics: TopicSubscriptions,
    forwarded: u64,
    dropped: u64,
}

impl MqttSession {
    /// Fresh session with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscription state.
    pub fn topics(&self) -> &TopicSubscriptions {
        &self.topics
    }

    /// Messages forwarded to the router so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Messages dropped because the router mailbox stayed full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Forget subscriptions and the pending change.
    pub fn reset(&mut self) {
        self.topics.reset();
    }

    /// Run one bounded unit of work.
    ///
    /// Only a failed read is returned as an error; it means the broker
    /// session is gone. Subscription failures are logged and retried.
    pub async fn step<L>(&mut self, link: &mut L, ctx: &TransportContext) -> Result<SessionStep, DriverError>
    where
        L: MqttLink + ?Sized,
    {
        let desired = ctx.config.current_topics();
        if let Some(change) = self.topics.next_change(&desired) {
            let result = match &change {
                TopicChange::Subscribe(topic) => link.subscribe(topic).await,
                TopicChange::Unsubscribe(topic) => link.unsubscribe(topic).await,
            };
            let ok = match result {
                Ok(()) => {
                    info!(transport = %ctx.source, ?change, "topic change applied");
                    true
                }
                Err(e) => {
                    warn!(transport = %ctx.source, ?change, error = %e, "topic change failed");
                    false
                }
            };
            self.topics.complete(&change, ok);
            return Ok(SessionStep::Changed { change, ok });
        }

        if self.topics.pending().is_some() || link.pending_messages() == 0 {
            return Ok(SessionStep::Idle);
        }

        let Some((topic, payload)) = link.read_message().await? else {
            return Ok(SessionStep::Idle);
        };
        let kind = self.handle(ctx, &desired, &topic, payload).await;
        Ok(SessionStep::Received { topic, kind })
    }

    async fn handle(&mut self, ctx: &TransportContext, desired: &[String], topic: &str, payload: Vec<u8>) -> TopicKind {
        let kind = CorrectionTopics::classify(topic);
        let expected = self.topics.is_subscribed(topic) || desired.iter().any(|t| t == topic);
        if kind == TopicKind::Unknown || !expected {
            warn!(transport = %ctx.source, topic, len = payload.len(), "unexpected topic, unsubscribing");
            self.topics.note_unexpected(topic);
            return kind;
        }

        match kind {
            TopicKind::KeyMaterial => {
                let changed = ctx.config.update(&mut |s| {
                    if s.key_material != payload {
                        s.key_material.clone_from(&payload);
                    }
                });
                if changed {
                    info!(transport = %ctx.source, len = payload.len(), "key material updated");
                }
            }
            TopicKind::Frequency => match FrequencyTable::parse(&payload) {
                Ok(table) => {
                    if ctx.config.update_frequencies(&table) {
                        info!(transport = %ctx.source, "L-band frequencies updated");
                    }
                }
                Err(e) => warn!(transport = %ctx.source, error = %e, "ignoring frequency message"),
            },
            TopicKind::Assistance | TopicKind::Correction(_) => {
                self.forward(ctx, topic, &payload).await;
            }
            TopicKind::Unknown => {}
        }
        kind
    }

    async fn forward(&mut self, ctx: &TransportContext, topic: &str, payload: &[u8]) {
        let msg = Message::from_bytes(payload, ctx.source, Content::Corrections);
        if msg.is_empty() {
            warn!(transport = %ctx.source, topic, bytes = payload.len(), "no buffer for correction message, dropped");
            self.dropped += 1;
            return;
        }
        match ctx.corrections.send(msg, Wait::For(ctx.timings.forward_timeout)).await {
            Ok(()) => {
                self.forwarded += 1;
                debug!(transport = %ctx.source, topic, bytes = payload.len(), "correction forwarded");
            }
            Err(e) => {
                self.dropped += 1;
                let lost = e.into_message();
                warn!(transport = %ctx.source, topic, bytes = lost.len(), "router mailbox full, correction dropped");
            }
        }
    }
}
