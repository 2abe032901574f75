//! The inbound poller: an endless long-poll `GET` loop.
//!
//! # Lifecycle
//!
//! ```text
//! FIRST_POLL ──(200, body decodes)──► establish session ──► STEADY_POLL ◄─┐
//!     │                                                        │   │     │
//!     └──(error)──► BACKOFF ──(sleep)──► retry                 │   └─────┘
//!                                                              └─(error)─► BACKOFF
//! ```
//!
//! Any failure (transport error, non-200 status, undecodable body) is logged
//! at `warn`, followed by a pause of `sleep_after_io_error`, and the loop
//! tries again.  It never gives up and never reports to the application.
//!
//! # Delivery
//!
//! Each decoded payload becomes one [`DispatchTask`] handed to the dispatch
//! executor in arrival order.  The receiver is never called on the poller
//! task, so a slow receiver cannot delay the next `GET`.
//!
//! [`DispatchTask`]: super::dispatch::DispatchTask

use std::sync::Arc;
use std::time::Duration;

use broker_core::{decode_batch, BatchError, PayloadCodec};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::{Channel, ReceiverSlot};
use super::dispatch::DispatchExecutor;
use super::endpoint::Endpoint;
use super::session::SessionGate;
use super::shutdown::ShutdownSignal;
use super::stats::BrokerStats;
use crate::infrastructure::transport::{TransportError, SESSION_HEADER};

/// Why a single poll produced no batch.  Logged, never surfaced.
#[derive(Debug, Error)]
pub(crate) enum PollError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("peer answered with HTTP status {status}")]
    Status { status: u16 },

    #[error("undecodable batch: {0}")]
    Decode(#[from] BatchError),
}

/// One successful poll.
struct Delivery<M> {
    messages: Vec<M>,
    session_id: Option<String>,
}

pub(crate) struct PollerLoop<M> {
    pub(crate) endpoint: Arc<Endpoint>,
    pub(crate) codec: Arc<dyn PayloadCodec<M>>,
    pub(crate) session: Arc<SessionGate>,
    pub(crate) stats: Arc<BrokerStats>,
    pub(crate) executor: Arc<dyn DispatchExecutor>,
    pub(crate) receiver: Arc<ReceiverSlot<M>>,
    pub(crate) channel: Channel<M>,
    pub(crate) sleep_after_io_error: Duration,
}

impl<M: Send + 'static> PollerLoop<M> {
    /// Runs until shutdown.
    pub(crate) async fn run(self, mut shutdown: ShutdownSignal) {
        let id = self.endpoint.broker_id().to_owned();
        info!("broker {id}: polling {}", self.endpoint.url());

        while !shutdown.is_triggered() {
            self.stats.record_poll_attempt();
            let outcome = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                outcome = self.poll_once() => outcome,
            };

            match outcome {
                Ok(delivery) => {
                    self.open_session(delivery.session_id);
                    self.dispatch(delivery.messages);
                }
                Err(err) => {
                    if shutdown.is_triggered() {
                        break;
                    }
                    self.stats.record_poll_failure();
                    warn!(
                        "broker {id}: poll failed: {err}; retrying in {:?}",
                        self.sleep_after_io_error
                    );
                    if self.sleep_after_io_error.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::select! {
                            biased;
                            _ = shutdown.triggered() => break,
                            _ = tokio::time::sleep(self.sleep_after_io_error) => {}
                        }
                    }
                }
            }
        }

        debug!("broker {id}: poller stopped");
    }

    async fn poll_once(&self) -> Result<Delivery<M>, PollError> {
        let response = self.endpoint.get().await?;
        if !response.is_ok() {
            return Err(PollError::Status {
                status: response.status,
            });
        }
        let messages = decode_batch(self.codec.as_ref(), &response.body)?;
        Ok(Delivery {
            messages,
            session_id: response.header(SESSION_HEADER).map(str::to_owned),
        })
    }

    fn open_session(&self, offered: Option<String>) {
        if self.session.is_established() {
            return;
        }
        let session_id = offered.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.session.establish(session_id.as_str()) {
            info!(
                "broker {}: session {session_id} established",
                self.endpoint.broker_id()
            );
        }
    }

    fn dispatch(&self, messages: Vec<M>) {
        if messages.is_empty() {
            return;
        }
        let id = self.endpoint.broker_id();
        let Some(receiver) = self.receiver.get() else {
            warn!(
                "broker {id}: no receiver installed; dropping {} message(s)",
                messages.len()
            );
            return;
        };

        debug!("broker {id}: dispatching {} message(s)", messages.len());
        for message in messages {
            let receiver = Arc::clone(&receiver);
            let channel = self.channel.clone();
            let task = Box::new(move || receiver.receive(message, &channel));
            match self.executor.execute(task) {
                Ok(()) => self.stats.record_dispatch(),
                Err(e) => warn!("broker {id}: message dropped: {e}"),
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use broker_core::{encode_batch, BincodeCodec};
    use bytes::Bytes;
    use tokio::sync::mpsc;

    use crate::application::channel::MessageReceiver;
    use crate::application::dispatch::{DispatchError, DispatchTask};
    use crate::application::shutdown::shutdown_channel;
    use crate::infrastructure::transport::{
        HttpMethod, HttpResponse, MockHttpTransport, NoopInitializer,
    };

    /// Runs tasks inline and records that it was used.
    #[derive(Default)]
    struct InlineExecutor {
        ran: Mutex<usize>,
    }

    impl DispatchExecutor for InlineExecutor {
        fn execute(&self, task: DispatchTask) -> Result<(), DispatchError> {
            *self.ran.lock().unwrap() += 1;
            task();
            Ok(())
        }
    }

    struct StoppedExecutor;

    impl DispatchExecutor for StoppedExecutor {
        fn execute(&self, _task: DispatchTask) -> Result<(), DispatchError> {
            Err(DispatchError::Stopped)
        }
    }

    fn batch(messages: &[&str]) -> Bytes {
        let owned: Vec<String> = messages.iter().map(|m| m.to_string()).collect();
        Bytes::from(encode_batch(&BincodeCodec, &owned).unwrap())
    }

    fn poller_with(
        transport: MockHttpTransport,
        executor: Arc<dyn DispatchExecutor>,
    ) -> (PollerLoop<String>, Arc<Mutex<Vec<String>>>) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let broker_id: Arc<str> = Arc::from("poller-test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let record: Arc<dyn MessageReceiver<String>> =
            Arc::new(move |m: String, _: &Channel<String>| sink.lock().unwrap().push(m));
        let receiver = ReceiverSlot::new(Some(record));
        let poller = PollerLoop {
            endpoint: Arc::new(Endpoint::new(
                Arc::clone(&broker_id),
                "http://peer/broker".to_string(),
                Arc::new(transport),
                Arc::new(NoopInitializer),
            )),
            codec: Arc::new(BincodeCodec),
            session: Arc::new(SessionGate::new()),
            stats: Arc::new(BrokerStats::default()),
            executor,
            receiver: Arc::new(receiver),
            channel: Channel::new(broker_id, tx),
            sleep_after_io_error: Duration::ZERO,
        };
        (poller, seen)
    }

    // ── poll_once ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_poll_once_issues_bodyless_get() {
        // Arrange
        let mut transport = MockHttpTransport::new();
        transport
            .expect_execute()
            .withf(|req| req.method == HttpMethod::Get && req.body.is_empty())
            .times(1)
            .returning(|_| Ok(HttpResponse::ok(batch(&["a", "b"]))));
        let (poller, _) = poller_with(transport, Arc::new(InlineExecutor::default()));

        // Act
        let delivery = poller.poll_once().await.expect("poll succeeds");

        // Assert
        assert_eq!(delivery.messages, vec!["a", "b"]);
        assert_eq!(delivery.session_id, None);
    }

    #[tokio::test]
    async fn test_poll_once_reads_session_header() {
        // Arrange
        let mut transport = MockHttpTransport::new();
        transport.expect_execute().returning(|_| {
            let mut resp = HttpResponse::ok(batch(&[]));
            resp.headers
                .push(("X-Broker-Session".to_string(), "sess-9".to_string()));
            Ok(resp)
        });
        let (poller, _) = poller_with(transport, Arc::new(InlineExecutor::default()));

        // Act
        let delivery = poller.poll_once().await.expect("poll succeeds");

        // Assert
        assert_eq!(delivery.session_id.as_deref(), Some("sess-9"));
    }

    #[tokio::test]
    async fn test_poll_once_rejects_non_200() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_execute()
            .returning(|_| Ok(HttpResponse::new(502, Bytes::new())));
        let (poller, _) = poller_with(transport, Arc::new(InlineExecutor::default()));

        let result = poller.poll_once().await;

        assert!(matches!(result, Err(PollError::Status { status: 502 })));
    }

    #[tokio::test]
    async fn test_poll_once_rejects_malformed_body() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_execute()
            .returning(|_| Ok(HttpResponse::ok(Bytes::from_static(&[0, 0]))));
        let (poller, _) = poller_with(transport, Arc::new(InlineExecutor::default()));

        let result = poller.poll_once().await;

        assert!(matches!(result, Err(PollError::Decode(_))));
    }

    // ── session ───────────────────────────────────────────────────────────────

    #[test]
    fn test_open_session_prefers_offered_id() {
        let (poller, _) = poller_with(MockHttpTransport::new(), Arc::new(InlineExecutor::default()));
        poller.open_session(Some("from-peer".to_string()));
        assert_eq!(poller.session.id().as_deref(), Some("from-peer"));
    }

    #[test]
    fn test_open_session_generates_uuid_when_absent() {
        let (poller, _) = poller_with(MockHttpTransport::new(), Arc::new(InlineExecutor::default()));
        poller.open_session(None);
        let id = poller.session.id().expect("established");
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_open_session_keeps_first_id() {
        let (poller, _) = poller_with(MockHttpTransport::new(), Arc::new(InlineExecutor::default()));
        poller.open_session(Some("first".to_string()));
        poller.open_session(Some("second".to_string()));
        assert_eq!(poller.session.id().as_deref(), Some("first"));
    }

    // ── dispatch ──────────────────────────────────────────────────────────────

    #[test]
    fn test_dispatch_submits_one_task_per_message_in_order() {
        // Arrange
        let exec = Arc::new(InlineExecutor::default());
        let (poller, seen) = poller_with(MockHttpTransport::new(), exec.clone());

        // Act
        poller.dispatch(vec!["x".to_string(), "y".to_string(), "z".to_string()]);

        // Assert
        assert_eq!(*exec.ran.lock().unwrap(), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["x", "y", "z"]);
        assert_eq!(poller.stats.snapshot().messages_dispatched, 3);
    }

    #[test]
    fn test_dispatch_without_receiver_drops_messages() {
        // Arrange
        let exec = Arc::new(InlineExecutor::default());
        let (mut poller, _) = poller_with(MockHttpTransport::new(), exec.clone());
        poller.receiver = Arc::new(ReceiverSlot::new(None));

        // Act
        poller.dispatch(vec!["lost".to_string()]);

        // Assert
        assert_eq!(*exec.ran.lock().unwrap(), 0);
        assert_eq!(poller.stats.snapshot().messages_dispatched, 0);
    }

    #[test]
    fn test_dispatch_to_stopped_executor_is_not_counted() {
        let (poller, seen) = poller_with(MockHttpTransport::new(), Arc::new(StoppedExecutor));
        poller.dispatch(vec!["m".to_string()]);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(poller.stats.snapshot().messages_dispatched, 0);
    }

    // ── run ───────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_failed_poll_does_not_establish_session_and_retries() {
        // Arrange – two failures, then a good batch, then hold forever
        let calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&calls);
        let mut transport = MockHttpTransport::new();
        transport.expect_execute().returning(move |_| {
            let mut n = counter.lock().unwrap();
            *n += 1;
            match *n {
                1 => Err(TransportError::Request {
                    url: "http://peer/broker".to_string(),
                    reason: "refused".to_string(),
                }),
                2 => Ok(HttpResponse::new(500, Bytes::new())),
                3 => Ok(HttpResponse::ok(batch(&["hello"]))),
                _ => Err(TransportError::Shutdown),
            }
        });
        let (mut poller, seen) = poller_with(transport, Arc::new(InlineExecutor::default()));
        poller.sleep_after_io_error = Duration::from_millis(1);
        let session = Arc::clone(&poller.session);
        let stats = Arc::clone(&poller.stats);
        let (trigger, signal) = shutdown_channel();
        let task = tokio::spawn(poller.run(signal));

        // Act
        for _ in 0..200 {
            if session.is_established() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("poller must stop")
            .expect("task panicked");

        // Assert
        assert!(session.is_established());
        assert_eq!(*seen.lock().unwrap(), vec!["hello"]);
        assert!(*calls.lock().unwrap() >= 3);
        assert!(stats.snapshot().polls_failed >= 2);
    }

    #[tokio::test]
    async fn test_shutdown_cuts_backoff_sleep_short() {
        // Arrange – every poll fails and the backoff is very long
        let mut transport = MockHttpTransport::new();
        transport
            .expect_execute()
            .returning(|_| Ok(HttpResponse::new(503, Bytes::new())));
        let (mut poller, _) = poller_with(transport, Arc::new(InlineExecutor::default()));
        poller.sleep_after_io_error = Duration::from_secs(3600);
        let (trigger, signal) = shutdown_channel();
        let task = tokio::spawn(poller.run(signal));
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Act
        trigger.trigger();

        // Assert
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("shutdown must interrupt the backoff sleep")
            .expect("task panicked");
    }
}
