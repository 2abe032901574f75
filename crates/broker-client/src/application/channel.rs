//! The application-facing send handle and the receive callback.
//!
//! # Fire and forget
//!
//! [`Channel::send`] puts an [`Envelope`] on an unbounded queue and returns at
//! once.  It never waits for the network and never returns an error.  If the
//! `POST` later fails, the optional failure callback is invoked exactly once
//! on the sender task.  There is deliberately no success callback.
//!
//! # Receiving
//!
//! Inbound messages arrive through a [`MessageReceiver`].  Each call gets the
//! payload and a [`Channel`], so a receiver can answer directly.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use broker_core::CodecError;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::infrastructure::transport::TransportError;

/// The reason an outbound message was not delivered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// The payload could not be encoded; nothing was sent.
    #[error("payload encoding failed: {0}")]
    Encode(#[from] CodecError),

    /// The `POST` failed at the transport level.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The peer answered with a status other than 200.
    #[error("peer rejected message with HTTP status {status}")]
    Status { status: u16 },
}

/// Called at most once, on the sender task, when delivery fails.
pub type FailureCallback = Box<dyn FnOnce(SendError) + Send + 'static>;

/// One unit of outbound work: a payload and its optional failure callback.
pub struct Envelope<M> {
    payload: M,
    on_failure: Option<FailureCallback>,
}

impl<M> Envelope<M> {
    pub fn new(payload: M, on_failure: Option<FailureCallback>) -> Self {
        Self {
            payload,
            on_failure,
        }
    }

    pub fn payload(&self) -> &M {
        &self.payload
    }

    pub fn has_failure_callback(&self) -> bool {
        self.on_failure.is_some()
    }

    pub(crate) fn into_parts(self) -> (M, Option<FailureCallback>) {
        (self.payload, self.on_failure)
    }
}

impl<M: fmt::Debug> fmt::Debug for Envelope<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("payload", &self.payload)
            .field("has_failure_callback", &self.on_failure.is_some())
            .finish()
    }
}

/// A cheap, cloneable handle for sending messages through one broker.
pub struct Channel<M> {
    broker_id: Arc<str>,
    queue: mpsc::UnboundedSender<Envelope<M>>,
}

impl<M> Clone for Channel<M> {
    fn clone(&self) -> Self {
        Self {
            broker_id: Arc::clone(&self.broker_id),
            queue: self.queue.clone(),
        }
    }
}

impl<M> fmt::Debug for Channel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("broker_id", &self.broker_id)
            .finish_non_exhaustive()
    }
}

impl<M> Channel<M> {
    pub(crate) fn new(broker_id: Arc<str>, queue: mpsc::UnboundedSender<Envelope<M>>) -> Self {
        Self { broker_id, queue }
    }

    /// Queues `payload` for delivery and returns immediately.
    ///
    /// `on_failure`, if given, runs once if the message cannot be delivered.
    /// Messages sent after the broker has stopped are discarded silently.
    pub fn send(&self, payload: M, on_failure: Option<FailureCallback>) {
        if self.queue.send(Envelope::new(payload, on_failure)).is_err() {
            debug!("broker {}: sender stopped; message abandoned", self.broker_id);
        }
    }

    /// Like [`Channel::send`] with a failure callback.
    pub fn send_with_failure<F>(&self, payload: M, on_failure: F)
    where
        F: FnOnce(SendError) + Send + 'static,
    {
        self.send(payload, Some(Box::new(on_failure)));
    }

    /// The id of the broker this channel belongs to.
    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }
}

/// The application's callback for inbound messages.
///
/// Invoked on the dispatch executor, never on the poller task.  Closures of
/// the form `|message, channel| { ... }` implement this trait.
pub trait MessageReceiver<M>: Send + Sync {
    fn receive(&self, message: M, channel: &Channel<M>);
}

impl<M, F> MessageReceiver<M> for F
where
    F: Fn(M, &Channel<M>) + Send + Sync,
{
    fn receive(&self, message: M, channel: &Channel<M>) {
        self(message, channel)
    }
}

/// The currently installed receiver, replaceable at any time.
pub(crate) struct ReceiverSlot<M> {
    inner: RwLock<Option<Arc<dyn MessageReceiver<M>>>>,
}

impl<M> ReceiverSlot<M> {
    pub(crate) fn new(initial: Option<Arc<dyn MessageReceiver<M>>>) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    pub(crate) fn set(&self, receiver: Arc<dyn MessageReceiver<M>>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(receiver);
    }

    pub(crate) fn get(&self) -> Option<Arc<dyn MessageReceiver<M>>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn channel_pair() -> (Channel<String>, mpsc::UnboundedReceiver<Envelope<String>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Channel::new(Arc::from("test-broker"), tx), rx)
    }

    #[test]
    fn test_send_enqueues_in_order() {
        // Arrange
        let (channel, mut rx) = channel_pair();

        // Act
        channel.send("a".to_string(), None);
        channel.send("b".to_string(), None);

        // Assert
        assert_eq!(rx.try_recv().unwrap().payload(), "a");
        assert_eq!(rx.try_recv().unwrap().payload(), "b");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_with_failure_attaches_callback() {
        // Arrange
        let (channel, mut rx) = channel_pair();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);

        // Act
        channel.send_with_failure("m".to_string(), move |e| *sink.lock().unwrap() = Some(e));
        let envelope = rx.try_recv().unwrap();
        assert!(envelope.has_failure_callback());
        let (_, callback) = envelope.into_parts();
        callback.unwrap()(SendError::Status { status: 503 });

        // Assert
        assert_eq!(*seen.lock().unwrap(), Some(SendError::Status { status: 503 }));
    }

    #[test]
    fn test_send_after_queue_closed_does_not_panic() {
        let (channel, rx) = channel_pair();
        drop(rx);
        channel.send("late".to_string(), None);
    }

    #[test]
    fn test_clone_shares_queue_and_id() {
        let (channel, mut rx) = channel_pair();
        let clone = channel.clone();
        clone.send("x".to_string(), None);
        assert_eq!(clone.broker_id(), "test-broker");
        assert_eq!(rx.try_recv().unwrap().payload(), "x");
    }

    #[test]
    fn test_closure_is_a_message_receiver() {
        // Arrange
        let (channel, mut rx) = channel_pair();
        let replier = |msg: String, ch: &Channel<String>| ch.send(format!("re: {msg}"), None);

        // Act
        replier.receive("hi".to_string(), &channel);

        // Assert
        assert_eq!(rx.try_recv().unwrap().payload(), "re: hi");
    }

    #[test]
    fn test_receiver_slot_replaces_receiver() {
        // Arrange
        let slot: ReceiverSlot<String> = ReceiverSlot::new(None);
        assert!(slot.get().is_none());
        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&hits);
        let (channel, _rx) = channel_pair();

        // Act
        slot.set(Arc::new(move |m: String, _: &Channel<String>| {
            sink.lock().unwrap().push(m)
        }));
        slot.get().expect("installed").receive("m1".to_string(), &channel);

        // Assert
        assert_eq!(*hits.lock().unwrap(), vec!["m1".to_string()]);
    }

    #[test]
    fn test_send_error_messages_are_descriptive() {
        assert_eq!(
            SendError::Status { status: 500 }.to_string(),
            "peer rejected message with HTTP status 500"
        );
        assert_eq!(
            SendError::from(TransportError::Shutdown).to_string(),
            "transport failure: transport shut down"
        );
    }
}
