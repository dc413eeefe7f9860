//! Receiver-facing correction router.
//!
//! Every transport hands its correction bytes to a single [`Mailbox`]. The
//! router drains it, classifies each message with a [`FrameDetector`],
//! decides which correction family the receiver should expect and writes the
//! bytes frame by frame into the [`GnssReceiver`].
//!
//! SPARTN traffic is sticky: once seen, proprietary-multiplexed (PMP) frames
//! cannot take the receiver back until the stickiness window passes without
//! another SPARTN arrival.

use std::sync::Arc;
use std::time::Duration;

use corrlink_models::{
    Detection, FrameDetector, FrameHint, FrameOutcome, Message, ProtocolFrameDetector, Source,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::drivers::GnssReceiver;
use crate::mailbox::{Mailbox, Wait};

/// How long a SPARTN arrival keeps PMP traffic from taking over.
pub const DEFAULT_STICKINESS: Duration = Duration::from_secs(10);

/// Label used for vendor satellite-channel (QZSS L6) corrections.
pub const CLAS_LABEL: &str = "CLAS";

/// Correction family the receiver is told to expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum Discriminator {
    /// Never set since start-up.
    #[default]
    None,
    /// SPARTN over IP.
    #[strum(to_string = "SPARTN")]
    Spartn,
    /// L-band point-to-multipoint.
    #[strum(to_string = "PMP")]
    Pmp,
}

/// Snapshot published after every routed message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouterStatus {
    /// Discriminator the receiver last accepted.
    pub discriminator: Discriminator,
    /// Label of the last routed correction stream.
    pub active_source: Option<String>,
    /// Whether the last push reached the receiver.
    pub receiver_online: bool,
    /// Whole frames delivered so far.
    pub frames_forwarded: u64,
    /// Bytes delivered so far, unframed tails included.
    pub bytes_forwarded: u64,
}

/// Single consumer of the correction mailbox, owning the receiver.
pub struct CorrectionRouter<R> {
    receiver: R,
    detector: Box<dyn FrameDetector>,
    stickiness: Duration,
    discriminator: Discriminator,
    spartn_deadline: Option<Instant>,
    status: watch::Sender<RouterStatus>,
}

impl<R: GnssReceiver> CorrectionRouter<R> {
    /// Router with the protocol detector and the default stickiness.
    pub fn new(receiver: R) -> Self {
        let (status, _) = watch::channel(RouterStatus::default());
        Self {
            receiver,
            detector: Box::new(ProtocolFrameDetector),
            stickiness: DEFAULT_STICKINESS,
            discriminator: Discriminator::None,
            spartn_deadline: None,
            status,
        }
    }

    /// How long SPARTN keeps PMP from taking over.
    pub fn with_stickiness(mut self, window: Duration) -> Self {
        self.stickiness = window;
        self
    }

    /// Replace the frame detector.
    pub fn with_detector(mut self, detector: impl FrameDetector + 'static) -> Self {
        self.detector = Box::new(detector);
        self
    }

    /// The driven receiver.
    pub fn receiver(&self) -> &R {
        &self.receiver
    }

    /// Discriminator last confirmed by the receiver.
    pub fn discriminator(&self) -> Discriminator {
        self.discriminator
    }

    /// Current status snapshot.
    pub fn status(&self) -> RouterStatus {
        self.status.borrow().clone()
    }

    /// Observe status changes.
    pub fn watch_status(&self) -> watch::Receiver<RouterStatus> {
        self.status.subscribe()
    }

    fn spartn_sticky(&self, now: Instant) -> bool {
        self.spartn_deadline.is_some_and(|deadline| now < deadline)
    }

    /// Classify, arbitrate and forward one message. The message's buffer is
    /// released when this returns.
    pub async fn route(&mut self, msg: Message) {
        if msg.is_empty() {
            return;
        }
        let now = Instant::now();
        let Detection { hint, .. } = self.detector.parse(msg.as_slice());

        if let Some(wanted) = self.arbitrate(hint, now) {
            self.switch_discriminator(wanted).await;
        }

        let label = self.label_for(hint, msg.source(), now);
        let (frames, bytes, online) = self.forward(msg.as_slice()).await;

        self.status.send_if_modified(|status| {
            let before = status.clone();
            status.discriminator = self.discriminator;
            if let Some(label) = label {
                status.active_source = Some(label);
            }
            if let Some(online) = online {
                status.receiver_online = online;
            }
            status.frames_forwarded += frames;
            status.bytes_forwarded += bytes;
            *status != before
        });
    }

    /// Returns the discriminator the receiver should be switched to, if it
    /// differs from the one it currently has.
    fn arbitrate(&mut self, hint: FrameHint, now: Instant) -> Option<Discriminator> {
        let wanted = match hint {
            FrameHint::Spartn => {
                self.spartn_deadline = Some(now + self.stickiness);
                Discriminator::Spartn
            }
            FrameHint::ProprietaryMultiplexed if self.spartn_sticky(now) => Discriminator::Spartn,
            FrameHint::ProprietaryMultiplexed => Discriminator::Pmp,
            _ => return None,
        };
        (wanted != self.discriminator).then_some(wanted)
    }

    async fn switch_discriminator(&mut self, wanted: Discriminator) {
        match self.receiver.set_correction_discriminator(wanted).await {
            Ok(()) => {
                info!(from = %self.discriminator, to = %wanted, "receiver correction source switched");
                self.discriminator = wanted;
            }
            // Left unchanged so the next differing arrival tries again.
            Err(e) => warn!(to = %wanted, error = %e, "discriminator switch failed"),
        }
    }

    fn label_for(&self, hint: FrameHint, source: Source, now: Instant) -> Option<String> {
        if source == Source::Bluetooth {
            return Some(source.to_string());
        }
        let favors_spartn = self.spartn_sticky(now);
        match hint {
            FrameHint::Spartn if favors_spartn => Some(format!("SPARTN {source}")),
            FrameHint::ProprietaryMultiplexed if !favors_spartn => Some(format!("PMP {source}")),
            FrameHint::VendorSatellite => Some(CLAS_LABEL.to_string()),
            FrameHint::Rtcm => Some(source.to_string()),
            _ => None,
        }
    }

    /// Push `bytes` into the receiver one frame at a time. Anything the
    /// detector cannot delimit is pushed verbatim as a single tail.
    ///
    /// Returns frames pushed, bytes pushed and the receiver's reachability
    /// (`None` when nothing was attempted).
    async fn forward(&mut self, bytes: &[u8]) -> (u64, u64, Option<bool>) {
        let mut offset = 0;
        let mut frames = 0u64;
        let mut pushed = 0u64;
        let mut online = None;

        while offset < bytes.len() {
            let rest = &bytes[offset..];
            let len = match self.detector.parse(rest).outcome {
                FrameOutcome::Frame(n) if n > 0 && n <= rest.len() => n,
                FrameOutcome::Frame(_) | FrameOutcome::NeedMoreData | FrameOutcome::NotFound => {
                    rest.len()
                }
            };
            match self.receiver.push_bytes(&rest[..len]).await {
                Ok(()) => {
                    online = Some(true);
                    frames += 1;
                    pushed += len as u64;
                    offset += len;
                }
                Err(e) => {
                    if self.status.borrow().receiver_online {
                        warn!(error = %e, "receiver unreachable, dropping corrections");
                    } else {
                        debug!(error = %e, dropped = rest.len(), "receiver still unreachable");
                    }
                    online = Some(false);
                    break;
                }
            }
        }
        (frames, pushed, online)
    }

    /// Drain `inbox` until `shutdown` flips to `true` or its sender goes away.
    pub async fn run(mut self, inbox: Arc<Mailbox>, mut shutdown: watch::Receiver<bool>) -> R {
        info!(mailbox = inbox.tag(), stickiness = ?self.stickiness, "correction router started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                msg = inbox.receive(Wait::Forever) => {
                    if let Some(msg) = msg {
                        self.route(msg).await;
                    }
                }
            }
        }
        info!("correction router stopped");
        self.receiver
    }
}

impl<R> std::fmt::Debug for CorrectionRouter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrectionRouter")
            .field("discriminator", &self.discriminator)
            .field("spartn_deadline", &self.spartn_deadline)
            .field("stickiness", &self.stickiness)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockReceiver;
    use corrlink_models::{rtcm_frame, ubx_frame, Content};

    fn spartn(payload: usize) -> Vec<u8> {
        let mut frame = vec![
            0x73,
            0x02 | ((payload >> 9) as u8 & 0x01),
            (payload >> 1) as u8,
            ((payload & 0x01) as u8) << 7,
            0x00,
            0x00,
            0x00,
            0x00,
        ];
        frame.extend(std::iter::repeat(0xAA).take(payload));
        frame.push(0x55);
        frame
    }

    fn pmp() -> Vec<u8> {
        ubx_frame(0x02, 0x72, &[0u8; 16])
    }

    fn msg(bytes: &[u8], source: Source) -> Message {
        Message::from_bytes(bytes, source, Content::Corrections)
    }

    #[tokio::test(start_paused = true)]
    async fn spartn_is_sticky_against_pmp() {
        let mut router = CorrectionRouter::new(MockReceiver::default());

        router.route(msg(&spartn(20), Source::WiFi)).await;
        assert_eq!(router.discriminator(), Discriminator::Spartn);

        tokio::time::advance(Duration::from_secs(5)).await;
        router.route(msg(&pmp(), Source::SatelliteBand)).await;
        assert_eq!(router.discriminator(), Discriminator::Spartn);
        assert_eq!(router.status().active_source.as_deref(), Some("SPARTN WiFi"));

        // Another SPARTN arrival restarts the window.
        router.route(msg(&spartn(20), Source::WiFi)).await;
        tokio::time::advance(Duration::from_secs(9)).await;
        router.route(msg(&pmp(), Source::SatelliteBand)).await;
        assert_eq!(router.discriminator(), Discriminator::Spartn);

        tokio::time::advance(Duration::from_secs(2)).await;
        router.route(msg(&pmp(), Source::SatelliteBand)).await;
        assert_eq!(router.discriminator(), Discriminator::Pmp);
        assert_eq!(
            router.receiver().discriminators,
            vec![Discriminator::Spartn, Discriminator::Pmp]
        );
        assert_eq!(
            router.status().active_source.as_deref(),
            Some("PMP SatelliteBand")
        );
        // Every message reached the receiver regardless of arbitration.
        assert_eq!(router.receiver().pushed.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn pmp_alone_selects_pmp() {
        let mut router = CorrectionRouter::new(MockReceiver::default());
        router.route(msg(&pmp(), Source::SatelliteBand)).await;
        router.route(msg(&pmp(), Source::SatelliteBand)).await;
        assert_eq!(router.discriminator(), Discriminator::Pmp);
        assert_eq!(router.receiver().discriminators, vec![Discriminator::Pmp]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_switch_is_retried_on_next_arrival() {
        let receiver = MockReceiver {
            failing_switches: 1,
            ..MockReceiver::default()
        };
        let mut router = CorrectionRouter::new(receiver);

        router.route(msg(&spartn(8), Source::Cellular)).await;
        assert_eq!(router.discriminator(), Discriminator::None);
        // Bytes still flow.
        assert_eq!(router.receiver().pushed.len(), 1);

        router.route(msg(&spartn(8), Source::Cellular)).await;
        assert_eq!(router.discriminator(), Discriminator::Spartn);
        assert_eq!(
            router.receiver().discriminators,
            vec![Discriminator::Spartn, Discriminator::Spartn]
        );

        router.route(msg(&spartn(8), Source::Cellular)).await;
        assert_eq!(router.receiver().discriminators.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_competing_hints_leave_discriminator_alone() {
        let mut router = CorrectionRouter::new(MockReceiver::default());
        router.route(msg(&spartn(4), Source::WiFi)).await;

        router.route(msg(&ubx_frame(0x02, 0x73, &[1u8; 12]), Source::SatelliteBand)).await;
        assert_eq!(router.status().active_source.as_deref(), Some(CLAS_LABEL));

        router.route(msg(&rtcm_frame(&[0x3E, 0xD0]), Source::Cellular)).await;
        assert_eq!(router.status().active_source.as_deref(), Some("Cellular"));

        router.route(msg(&spartn(4), Source::Bluetooth)).await;
        assert_eq!(router.status().active_source.as_deref(), Some("Bluetooth"));

        assert_eq!(router.receiver().discriminators, vec![Discriminator::Spartn]);
    }

    #[tokio::test]
    async fn frames_are_pushed_individually_with_verbatim_tail() {
        let mut router = CorrectionRouter::new(MockReceiver::default());
        let first = rtcm_frame(&[1, 2, 3]);
        let second = rtcm_frame(&[4, 5, 6, 7]);
        let junk = [0x00, 0x11, 0x22];

        let mut bytes = first.clone();
        bytes.extend_from_slice(&second);
        bytes.extend_from_slice(&junk);
        router.route(msg(&bytes, Source::Cellular)).await;

        assert_eq!(router.receiver().pushed, vec![first, second, junk.to_vec()]);
        let status = router.status();
        assert_eq!(status.frames_forwarded, 3);
        assert_eq!(status.bytes_forwarded, bytes.len() as u64);
        assert!(status.receiver_online);
    }

    #[tokio::test]
    async fn partial_frame_is_forwarded_verbatim() {
        let mut router = CorrectionRouter::new(MockReceiver::default());
        let frame = rtcm_frame(&[9; 20]);
        router.route(msg(&frame[..10], Source::WiFi)).await;
        assert_eq!(router.receiver().pushed, vec![frame[..10].to_vec()]);
    }

    #[tokio::test]
    async fn offline_receiver_is_reported_and_recovers() {
        let receiver = MockReceiver {
            offline: true,
            ..MockReceiver::default()
        };
        let mut router = CorrectionRouter::new(receiver);
        let status = router.watch_status();

        router.route(msg(&rtcm_frame(&[1]), Source::WiFi)).await;
        assert!(!status.borrow().receiver_online);
        assert_eq!(status.borrow().bytes_forwarded, 0);

        router.receiver.offline = false;
        router.route(msg(&rtcm_frame(&[1]), Source::WiFi)).await;
        assert!(status.borrow().receiver_online);
    }

    #[tokio::test]
    async fn run_drains_mailbox_until_shutdown() {
        let inbox = Arc::new(Mailbox::new("router", 8));
        let (stop, shutdown) = watch::channel(false);
        let router = CorrectionRouter::new(MockReceiver::default());
        let mut status = router.watch_status();
        let task = tokio::spawn(router.run(inbox.clone(), shutdown));

        inbox.try_send(msg(&rtcm_frame(&[1, 2]), Source::WiFi)).unwrap();
        inbox.try_send(msg(&rtcm_frame(&[3, 4]), Source::WiFi)).unwrap();
        while status.borrow().frames_forwarded < 2 {
            status.changed().await.unwrap();
        }

        stop.send(true).unwrap();
        let receiver = task.await.unwrap();
        assert_eq!(receiver.pushed.len(), 2);
        assert!(inbox.is_empty());
    }
}
