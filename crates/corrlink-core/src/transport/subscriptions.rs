//! Topic-diff bookkeeping for an MQTT session.
//!
//! The network command layer cannot multiplex subscription commands, so at
//! most one subscribe or unsubscribe is outstanding at a time. Each tick
//! the session asks for the next change; the change stays pending until
//! [`TopicSubscriptions::complete`] is called for it.
//!
//! Undesired topics are dropped before new ones are added (oldest first in
//! both cases), which keeps the broker from delivering two regions' worth
//! of corrections while the device moves between them.

use tracing::warn;

/// One subscription command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicChange {
    /// Subscribe to the topic.
    Subscribe(String),
    /// Unsubscribe from the topic.
    Unsubscribe(String),
}

impl TopicChange {
    /// Topic the change applies to.
    pub fn topic(&self) -> &str {
        match self {
            TopicChange::Subscribe(t) | TopicChange::Unsubscribe(t) => t,
        }
    }
}

/// Currently subscribed topics plus the single pending change.
#[derive(Debug, Default)]
pub struct TopicSubscriptions {
    subscribed: Vec<String>,
    pending: Option<TopicChange>,
}

impl TopicSubscriptions {
    /// Nothing subscribed, nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Topics confirmed subscribed, oldest first.
    pub fn subscribed(&self) -> &[String] {
        &self.subscribed
    }

    /// The outstanding change, if any.
    pub fn pending(&self) -> Option<&TopicChange> {
        self.pending.as_ref()
    }

    /// `true` when `topic` is confirmed subscribed.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscribed.iter().any(|t| t == topic)
    }

    /// Next change towards `desired`, recorded as pending.
    ///
    /// Returns `None` while a change is outstanding or when already in sync.
    pub fn next_change(&mut self, desired: &[String]) -> Option<TopicChange> {
        if self.pending.is_some() {
            return None;
        }
        let change = self
            .subscribed
            .iter()
            .find(|t| !desired.contains(*t))
            .map(|t| TopicChange::Unsubscribe(t.clone()))
            .or_else(|| {
                desired
                    .iter()
                    .find(|t| !self.subscribed.contains(*t))
                    .map(|t| TopicChange::Subscribe(t.clone()))
            })?;
        self.pending = Some(change.clone());
        Some(change)
    }

    /// Report the outcome of `change`.
    ///
    /// A completion that does not match the pending change is stale (the
    /// session was reset meanwhile) and is ignored.
    pub fn complete(&mut self, change: &TopicChange, ok: bool) {
        if self.pending.as_ref() != Some(change) {
            warn!(?change, pending = ?self.pending, "completion for untracked topic change ignored");
            return;
        }
        self.pending = None;
        if !ok {
            return;
        }
        match change {
            TopicChange::Subscribe(topic) => {
                if !self.is_subscribed(topic) {
                    self.subscribed.push(topic.clone());
                }
            }
            TopicChange::Unsubscribe(topic) => self.subscribed.retain(|t| t != topic),
        }
    }

    /// Track a topic the broker delivered without us asking, so that the
    /// next diff unsubscribes from it.
    pub fn note_unexpected(&mut self, topic: &str) {
        if !self.is_subscribed(topic) {
            self.subscribed.push(topic.to_string());
        }
    }

    /// Forget everything (connection lost or reset).
    pub fn reset(&mut self) {
        self.subscribed.clear();
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn seeded(names: &[&str]) -> TopicSubscriptions {
        let mut subs = TopicSubscriptions::new();
        for name in names {
            let change = TopicChange::Subscribe((*name).to_string());
            subs.pending = Some(change.clone());
            subs.complete(&change, true);
        }
        subs
    }

    #[test]
    fn unsubscribe_precedes_subscribe() {
        let mut subs = seeded(&["A", "B", "C"]);
        let desired = topics(&["B", "C", "D"]);

        let first = subs.next_change(&desired).unwrap();
        assert_eq!(first, TopicChange::Unsubscribe("A".into()));
        assert_eq!(subs.next_change(&desired), None, "only one change in flight");

        subs.complete(&first, true);
        let second = subs.next_change(&desired).unwrap();
        assert_eq!(second, TopicChange::Subscribe("D".into()));
        subs.complete(&second, true);

        assert_eq!(subs.next_change(&desired), None);
        assert_eq!(subs.subscribed(), topics(&["B", "C", "D"]).as_slice());
    }

    #[test]
    fn missing_topics_added_oldest_first() {
        let mut subs = TopicSubscriptions::new();
        let desired = topics(&["X", "Y"]);
        assert_eq!(subs.next_change(&desired), Some(TopicChange::Subscribe("X".into())));
    }

    #[test]
    fn failed_change_is_retried() {
        let mut subs = TopicSubscriptions::new();
        let desired = topics(&["X"]);
        let change = subs.next_change(&desired).unwrap();
        subs.complete(&change, false);
        assert!(subs.pending().is_none());
        assert_eq!(subs.next_change(&desired), Some(change));
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut subs = TopicSubscriptions::new();
        let change = subs.next_change(&topics(&["X"])).unwrap();
        subs.reset();
        subs.complete(&change, true);
        assert!(!subs.is_subscribed("X"));
    }

    #[test]
    fn unexpected_topic_gets_unsubscribed() {
        let mut subs = seeded(&["A"]);
        subs.note_unexpected("/rogue");
        assert_eq!(
            subs.next_change(&topics(&["A"])),
            Some(TopicChange::Unsubscribe("/rogue".into()))
        );
    }
}
