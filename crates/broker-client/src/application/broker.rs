//! The broker: owns the channel, both background loops, and their lifecycle.
//!
//! # Construction (for beginners)
//!
//! A broker needs a handful of collaborators, three of them mandatory, so it
//! is assembled with a [`BrokerBuilder`]:
//!
//! ```ignore
//! let broker = BrokerBuilder::<String>::new()
//!     .id("editor-42")
//!     .url("http://127.0.0.1:8080/broker")
//!     .transport(Arc::new(ReqwestTransport::new(None)?))
//!     .dispatch_executor(Arc::new(ThreadExecutor::spawn("broker-dispatch")?))
//!     .receiver(|msg: String, _ch: &Channel<String>| println!("got {msg}"))
//!     .build()?;
//!
//! broker.channel().send("hello".to_string(), None);
//! broker.shutdown(Duration::from_secs(5)).await;
//! ```
//!
//! `build()` spawns the sender and poller tasks on the current tokio runtime,
//! so it must be called from inside one.
//!
//! # Shutdown
//!
//! [`Broker::shutdown`] raises the stop signal, shuts the transport down
//! (which releases a long-poll `GET` that may otherwise block indefinitely),
//! and waits up to the given timeout for both tasks.  It returns `false`
//! rather than an error if they do not finish in time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use broker_core::{BincodeCodec, PayloadCodec};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::channel::{Channel, MessageReceiver, ReceiverSlot};
use super::dispatch::DispatchExecutor;
use super::endpoint::Endpoint;
use super::poller::PollerLoop;
use super::sender::SenderLoop;
use super::session::SessionGate;
use super::shutdown::{shutdown_channel, ShutdownTrigger};
use super::stats::{BrokerStats, StatsSnapshot};
use crate::infrastructure::transport::{HttpTransport, NoopInitializer, RequestInitializer};

/// Errors returned by [`BrokerBuilder::build`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// A mandatory collaborator or setting was not supplied.
    #[error("missing required broker setting: {0}")]
    MissingSetting(&'static str),

    /// `build()` was called outside a tokio runtime.
    #[error("broker must be built inside a tokio runtime")]
    NoRuntime,
}

/// Plain runtime settings for one broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Identifier used in log lines.
    pub id: String,
    /// The single HTTP endpoint for both `GET` and `POST`.
    pub url: String,
    /// Pause after a failed poll.  Zero retries immediately.
    pub sleep_after_io_error: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            id: "broker".to_string(),
            url: String::new(),
            sleep_after_io_error: Duration::from_secs(1),
        }
    }
}

/// Step-by-step assembly of a [`Broker`].
pub struct BrokerBuilder<M> {
    settings: BrokerSettings,
    transport: Option<Arc<dyn HttpTransport>>,
    initializer: Arc<dyn RequestInitializer>,
    executor: Option<Arc<dyn DispatchExecutor>>,
    codec: Arc<dyn PayloadCodec<M>>,
    receiver: Option<Arc<dyn MessageReceiver<M>>>,
}

impl<M> BrokerBuilder<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    /// Starts a builder that encodes payloads with [`BincodeCodec`].
    pub fn new() -> Self {
        Self::with_codec(BincodeCodec)
    }
}

impl<M> Default for BrokerBuilder<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Send + 'static> BrokerBuilder<M> {
    /// Starts a builder with a custom payload codec.
    pub fn with_codec(codec: impl PayloadCodec<M> + 'static) -> Self {
        Self {
            settings: BrokerSettings::default(),
            transport: None,
            initializer: Arc::new(NoopInitializer),
            executor: None,
            codec: Arc::new(codec),
            receiver: None,
        }
    }

    /// Replaces id, url, and sleep in one call.
    pub fn settings(mut self, settings: BrokerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.settings.id = id.into();
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.settings.url = url.into();
        self
    }

    pub fn sleep_after_io_error(mut self, sleep: Duration) -> Self {
        self.settings.sleep_after_io_error = sleep;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn request_initializer(mut self, initializer: impl RequestInitializer + 'static) -> Self {
        self.initializer = Arc::new(initializer);
        self
    }

    pub fn dispatch_executor(mut self, executor: Arc<dyn DispatchExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn codec(mut self, codec: impl PayloadCodec<M> + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Installs the receiver up front.  It can also be set later with
    /// [`Broker::set_receiver`].
    pub fn receiver(mut self, receiver: impl MessageReceiver<M> + 'static) -> Self {
        self.receiver = Some(Arc::new(receiver));
        self
    }

    /// Validates the configuration and starts both background tasks.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::MissingSetting`] if `url`, `transport`, or
    ///   `dispatch_executor` was not supplied.
    /// - [`BrokerError::NoRuntime`] if called outside a tokio runtime.
    pub fn build(self) -> Result<Broker<M>, BrokerError> {
        if self.settings.url.trim().is_empty() {
            return Err(BrokerError::MissingSetting("url"));
        }
        let transport = self
            .transport
            .ok_or(BrokerError::MissingSetting("transport"))?;
        let executor = self
            .executor
            .ok_or(BrokerError::MissingSetting("dispatch_executor"))?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| BrokerError::NoRuntime)?;

        let id: Arc<str> = Arc::from(self.settings.id.as_str());
        let endpoint = Arc::new(Endpoint::new(
            Arc::clone(&id),
            self.settings.url.clone(),
            transport,
            self.initializer,
        ));
        let session = Arc::new(SessionGate::new());
        let stats = Arc::new(BrokerStats::default());
        let receiver = Arc::new(ReceiverSlot::new(self.receiver));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let channel = Channel::new(Arc::clone(&id), queue_tx);
        let (trigger, signal) = shutdown_channel();

        let sender = SenderLoop {
            endpoint: Arc::clone(&endpoint),
            codec: Arc::clone(&self.codec),
            session: Arc::clone(&session),
            stats: Arc::clone(&stats),
        };
        let poller = PollerLoop {
            endpoint: Arc::clone(&endpoint),
            codec: self.codec,
            session: Arc::clone(&session),
            stats: Arc::clone(&stats),
            executor,
            receiver: Arc::clone(&receiver),
            channel: channel.clone(),
            sleep_after_io_error: self.settings.sleep_after_io_error,
        };

        let sender_task = runtime.spawn(sender.run(queue_rx, signal.clone()));
        let poller_task = runtime.spawn(poller.run(signal));
        info!("broker {id}: started against {}", self.settings.url);

        Ok(Broker {
            id,
            endpoint,
            channel,
            receiver,
            session,
            stats,
            trigger,
            transport_closed: AtomicBool::new(false),
            tasks: Mutex::new(Some(LoopTasks {
                sender: sender_task,
                poller: poller_task,
            })),
        })
    }
}

struct LoopTasks {
    sender: JoinHandle<()>,
    poller: JoinHandle<()>,
}

/// A running broker.
pub struct Broker<M> {
    id: Arc<str>,
    endpoint: Arc<Endpoint>,
    channel: Channel<M>,
    receiver: Arc<ReceiverSlot<M>>,
    session: Arc<SessionGate>,
    stats: Arc<BrokerStats>,
    trigger: ShutdownTrigger,
    transport_closed: AtomicBool,
    tasks: Mutex<Option<LoopTasks>>,
}

impl<M> Broker<M> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns a handle for sending messages.
    pub fn channel(&self) -> Channel<M> {
        self.channel.clone()
    }

    /// Installs or replaces the receiver for inbound messages.
    pub fn set_receiver(&self, receiver: impl MessageReceiver<M> + 'static) {
        self.receiver.set(Arc::new(receiver));
    }

    pub fn is_session_established(&self) -> bool {
        self.session.is_established()
    }

    /// The session id, once the first poll has succeeded.
    pub fn session_id(&self) -> Option<String> {
        self.session.id()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stops both loops and waits up to `timeout` for them to finish.
    ///
    /// Returns `true` if both finished in time.  Only the first call does any
    /// work; later calls return `false` at once.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.trigger.trigger();
        self.close_transport();

        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(LoopTasks {
            mut sender,
            mut poller,
        }) = tasks
        else {
            debug!("broker {}: shutdown already requested", self.id);
            return false;
        };

        info!("broker {}: shutting down", self.id);
        let joined = tokio::time::timeout(timeout, async {
            for (name, task) in [("sender", &mut sender), ("poller", &mut poller)] {
                if let Err(e) = task.await {
                    error!("broker {}: {name} task ended abnormally: {e}", self.id);
                }
            }
        })
        .await;

        match joined {
            Ok(()) => {
                info!("broker {}: stopped", self.id);
                true
            }
            Err(_) => {
                warn!(
                    "broker {}: background tasks did not stop within {timeout:?}",
                    self.id
                );
                false
            }
        }
    }

    fn close_transport(&self) {
        if !self.transport_closed.swap(true, Ordering::AcqRel) {
            self.endpoint.shutdown_transport();
        }
    }
}

impl<M> Drop for Broker<M> {
    fn drop(&mut self) {
        if self.trigger.trigger() {
            debug!("broker {}: dropped without shutdown; stopping", self.id);
        }
        self.close_transport();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
