//! Bounded, ordered, ownership-transferring channel of [`Message`]s.
//!
//! A [`Mailbox`] is created once per data-flow edge (transport → router,
//! router → receiver, ...) and shared between tasks behind an `Arc`. It is
//! the only structure in the pipeline mutated by more than one task; every
//! operation takes the internal lock for a constant amount of work and
//! never holds it across an `.await`.
//!
//! Sends and receives take a [`Wait`] policy. Non-critical data uses a
//! bounded wait and is dropped by the caller when the mailbox stays full;
//! critical control traffic waits [`Wait::Forever`] and accepts
//! backpressure from the consumer.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use corrlink_models::Message;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::error::SendError;

/// How long a mailbox operation may suspend the calling task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Do not suspend at all.
    Immediate,
    /// Suspend for at most this long.
    For(Duration),
    /// Suspend until the operation can complete.
    Forever,
}

impl Wait {
    fn deadline(self) -> Option<Option<Instant>> {
        match self {
            Wait::Immediate => None,
            Wait::For(d) => Some(Some(Instant::now() + d)),
            Wait::Forever => Some(None),
        }
    }
}

/// Bounded FIFO of owned messages with a priority re-injection path.
pub struct Mailbox {
    tag: &'static str,
    capacity: usize,
    queue: Mutex<VecDeque<Message>>,
    readable: Notify,
    writable: Notify,
}

impl Mailbox {
    /// Create a mailbox holding at most `capacity` messages (minimum 1).
    ///
    /// `tag` names the destination in logs; it is not enforced.
    pub fn new(tag: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            tag,
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    /// Diagnostic destination tag.
    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// Maximum number of queued messages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of messages currently queued.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, msg: Message, front: bool) -> Result<(), Message> {
        {
            let mut queue = self.lock();
            if queue.len() >= self.capacity {
                return Err(msg);
            }
            if front {
                queue.push_front(msg);
            } else {
                queue.push_back(msg);
            }
        }
        self.readable.notify_one();
        Ok(())
    }

    fn pop(&self) -> Option<Message> {
        let msg = self.lock().pop_front();
        if msg.is_some() {
            self.writable.notify_one();
        }
        msg
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Enqueue at the back without suspending.
    pub fn try_send(&self, msg: Message) -> Result<(), SendError> {
        if msg.is_empty() {
            return Err(SendError::Empty(msg));
        }
        self.push(msg, false).map_err(|message| SendError::Full {
            mailbox: self.tag,
            message,
        })
    }

    /// Enqueue at the back, waiting up to `wait` for room.
    ///
    /// On success ownership moves into the mailbox. On failure the message
    /// comes back inside the error, untouched.
    pub async fn send(&self, msg: Message, wait: Wait) -> Result<(), SendError> {
        self.enqueue(msg, wait, false).await
    }

    /// Enqueue at the front (urgent or retried data), waiting up to `wait`.
    pub async fn send_front(&self, msg: Message, wait: Wait) -> Result<(), SendError> {
        self.enqueue(msg, wait, true).await
    }

    async fn enqueue(&self, mut msg: Message, wait: Wait, front: bool) -> Result<(), SendError> {
        if msg.is_empty() {
            return Err(SendError::Empty(msg));
        }
        let deadline = wait.deadline();
        loop {
            match self.push(msg, front) {
                Ok(()) => return Ok(()),
                Err(back) => msg = back,
            }
            let room = self.writable.notified();
            let expired = match deadline {
                None => true,
                Some(None) => {
                    room.await;
                    false
                }
                Some(Some(at)) => tokio::time::timeout_at(at, room).await.is_err(),
            };
            if expired {
                return Err(SendError::Full {
                    mailbox: self.tag,
                    message: msg,
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------

    /// Dequeue without suspending.
    pub fn try_receive(&self) -> Option<Message> {
        self.pop()
    }

    /// Dequeue the oldest message, waiting up to `wait`.
    pub async fn receive(&self, wait: Wait) -> Option<Message> {
        let deadline = wait.deadline();
        loop {
            if let Some(msg) = self.pop() {
                return Some(msg);
            }
            let data = self.readable.notified();
            match deadline {
                None => return None,
                Some(None) => data.await,
                Some(Some(at)) => {
                    if tokio::time::timeout_at(at, data).await.is_err() {
                        return self.pop();
                    }
                }
            }
        }
    }

    /// Release whatever `out` holds, then dequeue into it.
    ///
    /// Returns `true` when a message was received.
    pub async fn receive_into(&self, out: &mut Message, wait: Wait) -> bool {
        out.release();
        match self.receive(wait).await {
            Some(msg) => {
                *out = msg;
                true
            }
            None => false,
        }
    }

    /// Release every queued message; returns how many were discarded.
    pub fn drain(&self) -> usize {
        let drained: Vec<Message> = self.lock().drain(..).collect();
        let count = drained.len();
        drop(drained);
        if count > 0 {
            self.writable.notify_waiters();
        }
        count
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        let discarded = self.drain();
        if discarded > 0 {
            debug!(mailbox = self.tag, discarded, "mailbox dropped with queued messages");
        }
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("tag", &self.tag)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use corrlink_models::{Content, Source};

    use super::*;

    fn msg(bytes: &[u8]) -> Message {
        Message::from_bytes(bytes, Source::WiFi, Content::Corrections)
    }

    #[tokio::test]
    async fn fifo_order() {
        let mb = Mailbox::new("test", 4);
        for b in [b"a", b"b", b"c"] {
            mb.send(msg(b), Wait::Immediate).await.unwrap();
        }
        assert_eq!(mb.receive(Wait::Immediate).await.unwrap().as_slice(), b"a");
        assert_eq!(mb.receive(Wait::Immediate).await.unwrap().as_slice(), b"b");
        assert_eq!(mb.receive(Wait::Immediate).await.unwrap().as_slice(), b"c");
        assert!(mb.receive(Wait::Immediate).await.is_none());
    }

    #[tokio::test]
    async fn send_front_jumps_the_queue() {
        let mb = Mailbox::new("test", 4);
        mb.send(msg(b"old"), Wait::Immediate).await.unwrap();
        mb.send_front(msg(b"urgent"), Wait::Immediate).await.unwrap();
        assert_eq!(
            mb.receive(Wait::Immediate).await.unwrap().as_slice(),
            b"urgent"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_is_exact() {
        let mb = Mailbox::new("test", 3);
        for _ in 0..3 {
            mb.send(msg(b"x"), Wait::For(Duration::from_millis(10)))
                .await
                .unwrap();
        }
        let err = mb
            .send(msg(b"overflow"), Wait::For(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Full { mailbox: "test", .. }));
        assert_eq!(err.into_message().as_slice(), b"overflow");

        mb.receive(Wait::Immediate).await.unwrap();
        mb.send(msg(b"y"), Wait::For(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(mb.len(), 3);
    }

    #[tokio::test]
    async fn empty_message_is_refused() {
        let mb = Mailbox::new("test", 1);
        let err = mb
            .send(Message::empty(Source::WiFi, Content::None), Wait::Forever)
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Empty(_)));
        assert!(mb.is_empty());
    }

    #[tokio::test]
    async fn blocked_sender_resumes_after_receive() {
        let mb = Arc::new(Mailbox::new("test", 1));
        mb.try_send(msg(b"first")).unwrap();

        let sender = {
            let mb = Arc::clone(&mb);
            tokio::spawn(async move { mb.send(msg(b"second"), Wait::Forever).await })
        };
        tokio::task::yield_now().await;

        assert_eq!(mb.receive(Wait::Forever).await.unwrap().as_slice(), b"first");
        sender.await.unwrap().unwrap();
        assert_eq!(mb.receive(Wait::Forever).await.unwrap().as_slice(), b"second");
    }

    #[tokio::test(start_paused = true)]
    async fn receive_times_out() {
        let mb = Mailbox::new("test", 1);
        let start = Instant::now();
        assert!(mb.receive(Wait::For(Duration::from_millis(250))).await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn receive_into_replaces_previous_occupant() {
        let mb = Mailbox::new("test", 2);
        mb.try_send(msg(b"next")).unwrap();

        let mut out = msg(b"stale");
        assert!(mb.receive_into(&mut out, Wait::Immediate).await);
        assert_eq!(out.as_slice(), b"next");

        assert!(!mb.receive_into(&mut out, Wait::Immediate).await);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn bytes_are_conserved() {
        let mb = Mailbox::new("test", 8);
        let mut sent = 0usize;
        let mut received = 0usize;
        for round in 1..=50usize {
            let m = Message::create(None, round * 3, Source::Cellular, Content::Binary);
            sent += m.len();
            mb.send(m, Wait::Forever).await.unwrap();
            if round % 3 == 0 {
                while let Some(m) = mb.try_receive() {
                    received += m.len();
                }
            }
        }
        while let Some(m) = mb.try_receive() {
            received += m.len();
        }
        assert_eq!(sent, received);
    }

    #[tokio::test]
    async fn drain_discards_everything() {
        let mb = Mailbox::new("test", 4);
        mb.try_send(msg(b"1")).unwrap();
        mb.try_send(msg(b"2")).unwrap();
        assert_eq!(mb.drain(), 2);
        assert!(mb.is_empty());
    }
}
