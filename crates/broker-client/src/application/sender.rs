//! The sender loop: drains the outbound queue, one `POST` per envelope.
//!
//! # Lifecycle
//!
//! ```text
//! WAIT_SESSION ──(session established)──► DRAIN ──(envelope)──► TRANSMIT
//!      │                                   ▲  │                      │
//!      │                                   │  └──(shutdown)──► STOPPED
//!      └──(shutdown)──► STOPPED            └─────────────────────────┘
//! ```
//!
//! Nothing is taken off the queue before the session is established, so
//! messages sent early simply wait.  Each envelope is attempted exactly once:
//! on failure its callback is told why and the loop moves on.  There is no
//! automatic retry on this side.
//!
//! On shutdown the loop completes the transmission it is in the middle of
//! (which usually fails quickly because the transport is shut down too) and
//! exits.  Envelopes still queued are dropped without invoking their
//! callbacks.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use broker_core::PayloadCodec;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::channel::{Envelope, SendError};
use super::endpoint::Endpoint;
use super::session::SessionGate;
use super::shutdown::ShutdownSignal;
use super::stats::BrokerStats;

/// State shared by every transmission of one broker.
pub(crate) struct SenderLoop<M> {
    pub(crate) endpoint: Arc<Endpoint>,
    pub(crate) codec: Arc<dyn PayloadCodec<M>>,
    pub(crate) session: Arc<SessionGate>,
    pub(crate) stats: Arc<BrokerStats>,
}

impl<M: Send + 'static> SenderLoop<M> {
    /// Runs until shutdown.
    pub(crate) async fn run(
        self,
        mut queue: mpsc::UnboundedReceiver<Envelope<M>>,
        mut shutdown: ShutdownSignal,
    ) {
        let id = self.endpoint.broker_id().to_owned();
        debug!("broker {id}: sender waiting for session");

        tokio::select! {
            biased;
            _ = shutdown.triggered() => {
                debug!("broker {id}: sender stopped before session was established");
                return;
            }
            _ = self.session.wait_established() => {}
        }
        info!("broker {id}: session established; sender draining outbound queue");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.triggered() => None,
                next = queue.recv() => next,
            };
            let Some(envelope) = next else { break };
            self.transmit(envelope).await;
        }

        queue.close();
        let mut abandoned = 0usize;
        while queue.try_recv().is_ok() {
            abandoned += 1;
        }
        if abandoned > 0 {
            debug!("broker {id}: sender stopped; {abandoned} queued message(s) abandoned");
        } else {
            debug!("broker {id}: sender stopped");
        }
    }

    /// Attempts one delivery and reports failure to the envelope's callback.
    pub(crate) async fn transmit(&self, envelope: Envelope<M>) {
        let (payload, on_failure) = envelope.into_parts();
        self.stats.record_post_attempt();

        let outcome = match self.codec.encode(&payload) {
            Ok(body) => self.post(body).await,
            Err(e) => Err(SendError::Encode(e)),
        };
        let Err(err) = outcome else { return };

        self.stats.record_post_failure();
        warn!("broker {}: message not delivered: {err}", self.endpoint.broker_id());
        if let Some(callback) = on_failure {
            if catch_unwind(AssertUnwindSafe(|| callback(err))).is_err() {
                error!(
                    "broker {}: failure callback panicked",
                    self.endpoint.broker_id()
                );
            }
        }
    }

    async fn post(&self, body: Vec<u8>) -> Result<(), SendError> {
        let response = self.endpoint.post(body).await?;
        if response.is_ok() {
            Ok(())
        } else {
            Err(SendError::Status {
                status: response.status,
            })
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
