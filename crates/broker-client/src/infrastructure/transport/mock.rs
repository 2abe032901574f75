//! Scripted in-memory remote peer for tests and local experiments.
//!
//! # Why a mock peer?
//!
//! The broker's interesting behaviour (session gating, retry forever, fail
//! fast, forced shutdown) only shows up against a peer that sometimes
//! misbehaves.  A real HTTP server is slow to start, hard to script, and cannot
//! be observed directly from test code.
//!
//! `MockPeer` implements [`HttpTransport`] entirely in memory and plays the
//! part of the remote server:
//!
//! - The first successful `GET` returns an empty batch at once; that is the
//!   session handshake.
//! - Later `GET`s long-poll: they block until inbound messages are queued,
//!   then return all of them as one batch.
//! - In *echo* mode (the default) every accepted `POST` body is queued as an
//!   inbound message, so whatever the broker sends comes straight back to its
//!   receiver.
//!
//! Every call is counted and recorded so tests can assert on exact request
//! counts and ordering.
//!
//! # Scripting failures
//!
//! ```ignore
//! let peer = Arc::new(MockPeer::new());
//! peer.script_get(GetScript::Status(503)); // next GET fails with 503
//! peer.script_get(GetScript::IoError);     // the one after that fails at I/O
//! peer.set_post_status(Some(500));         // every POST now fails
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use broker_core::protocol::encode_payloads;
use bytes::Bytes;
use tokio::sync::Notify;

use super::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError, SESSION_HEADER,
};

/// A scripted outcome for one upcoming `GET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetScript {
    /// Respond with this non-200 status and an empty body.
    Status(u16),
    /// Fail at the transport level, as if the connection dropped.
    IoError,
    /// Respond 200 with a body that is not a valid batch.
    Malformed,
}

#[derive(Debug, Default)]
struct PeerState {
    session_open: bool,
    session_header: Option<String>,
    echo: bool,
    post_status: Option<u16>,
    post_io_error: bool,
    hold_timeout: Option<Duration>,
    get_scripts: VecDeque<GetScript>,
    pending: VecDeque<Bytes>,
    requests: Vec<HttpRequest>,
    gets: usize,
    posts: usize,
    posts_before_session: usize,
    shutdowns: usize,
    shut_down: bool,
}

/// An in-memory remote peer implementing [`HttpTransport`].
///
/// Share it as `Arc<MockPeer>`: hand one clone to the broker and keep one for
/// assertions.
#[derive(Debug)]
pub struct MockPeer {
    state: Mutex<PeerState>,
    inbound_ready: Notify,
}

impl Default for MockPeer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPeer {
    /// Creates an echoing peer with no scripted failures.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PeerState {
                echo: true,
                ..PeerState::default()
            }),
            inbound_ready: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Scripting ─────────────────────────────────────────────────────────────

    /// Queues a scripted outcome for the next unscripted `GET`.
    pub fn script_get(&self, script: GetScript) {
        self.lock().get_scripts.push_back(script);
    }

    /// Makes the next `n` `GET`s fail with `status`.
    pub fn fail_next_gets(&self, n: usize, status: u16) {
        let mut state = self.lock();
        for _ in 0..n {
            state.get_scripts.push_back(GetScript::Status(status));
        }
    }

    /// Sets the status returned for every subsequent `POST`; `None` restores 200.
    pub fn set_post_status(&self, status: Option<u16>) {
        self.lock().post_status = status;
    }

    /// When `true`, every subsequent `POST` fails at the transport level.
    pub fn set_post_io_error(&self, fail: bool) {
        self.lock().post_io_error = fail;
    }

    /// Enables or disables echoing accepted `POST` bodies back as inbound messages.
    pub fn set_echo(&self, echo: bool) {
        self.lock().echo = echo;
    }

    /// Sets the value of the session header returned by the handshake `GET`.
    pub fn set_session_header(&self, value: impl Into<String>) {
        self.lock().session_header = Some(value.into());
    }

    /// Limits how long a long-poll `GET` waits before returning an empty batch.
    ///
    /// `None` (the default) holds the request until messages arrive or the
    /// peer is shut down.
    pub fn set_hold_timeout(&self, timeout: Option<Duration>) {
        self.lock().hold_timeout = timeout;
    }

    /// Queues one already-encoded inbound payload and wakes any waiting `GET`.
    pub fn push_inbound(&self, payload: impl Into<Bytes>) {
        self.lock().pending.push_back(payload.into());
        self.inbound_ready.notify_waiters();
    }

    // ── Observation ───────────────────────────────────────────────────────────

    /// Number of `GET`s received, including failed ones.
    pub fn get_count(&self) -> usize {
        self.lock().gets
    }

    /// Number of `POST`s received, including failed ones.
    pub fn post_count(&self) -> usize {
        self.lock().posts
    }

    /// Number of `POST`s that arrived before the handshake `GET` succeeded.
    pub fn posts_before_session(&self) -> usize {
        self.lock().posts_before_session
    }

    /// Number of times [`HttpTransport::shutdown`] was called.
    pub fn shutdown_count(&self) -> usize {
        self.lock().shutdowns
    }

    /// Returns `true` once a `GET` has completed the handshake.
    pub fn session_open(&self) -> bool {
        self.lock().session_open
    }

    /// Bodies of every `POST` received, in arrival order.
    pub fn posted_bodies(&self) -> Vec<Bytes> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.method == HttpMethod::Post)
            .map(|r| r.body.clone())
            .collect()
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.lock().requests.clone()
    }

    // ── Request handling ──────────────────────────────────────────────────────

    async fn handle_get(&self) -> Result<HttpResponse, TransportError> {
        let hold_timeout = {
            let mut state = self.lock();
            if let Some(script) = state.get_scripts.pop_front() {
                return match script {
                    GetScript::Status(status) => Ok(HttpResponse::new(status, Bytes::new())),
                    GetScript::IoError => Err(TransportError::Request {
                        url: "mock://peer".to_string(),
                        reason: "connection reset by peer".to_string(),
                    }),
                    GetScript::Malformed => Ok(HttpResponse::ok(Bytes::from_static(&[0xFF, 0xFF]))),
                };
            }

            if !state.session_open {
                state.session_open = true;
                let mut response = HttpResponse::ok(empty_batch());
                if let Some(id) = state.session_header.clone() {
                    response.headers.push((SESSION_HEADER.to_string(), id));
                }
                return Ok(response);
            }
            state.hold_timeout
        };

        let wait = self.wait_for_inbound();
        match hold_timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => Ok(HttpResponse::ok(empty_batch())),
            },
            None => wait.await,
        }
    }

    async fn wait_for_inbound(&self) -> Result<HttpResponse, TransportError> {
        loop {
            // Register interest *before* checking state so a push that lands
            // between the check and the await is not missed.
            let notified = self.inbound_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shut_down {
                    return Err(TransportError::Shutdown);
                }
                if !state.pending.is_empty() {
                    let payloads: Vec<Bytes> = state.pending.drain(..).collect();
                    let body = encode_payloads(&payloads)
                        .map_err(|e| TransportError::Body(e.to_string()))?;
                    return Ok(HttpResponse::ok(body));
                }
            }

            notified.await;
        }
    }

    fn handle_post(&self, body: Bytes) -> Result<HttpResponse, TransportError> {
        let mut state = self.lock();
        if !state.session_open {
            state.posts_before_session += 1;
        }
        if state.post_io_error {
            return Err(TransportError::Request {
                url: "mock://peer".to_string(),
                reason: "broken pipe".to_string(),
            });
        }
        if let Some(status) = state.post_status {
            return Ok(HttpResponse::new(status, Bytes::new()));
        }
        if state.echo {
            state.pending.push_back(body);
            drop(state);
            self.inbound_ready.notify_waiters();
        }
        Ok(HttpResponse::ok(Bytes::new()))
    }
}

fn empty_batch() -> Vec<u8> {
    0u32.to_be_bytes().to_vec()
}

#[async_trait]
impl HttpTransport for MockPeer {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = request.method;
        let body = request.body.clone();
        {
            let mut state = self.lock();
            state.requests.push(request);
            match method {
                HttpMethod::Get => state.gets += 1,
                HttpMethod::Post => state.posts += 1,
            }
            if state.shut_down {
                return Err(TransportError::Shutdown);
            }
        }

        match method {
            HttpMethod::Get => self.handle_get().await,
            HttpMethod::Post => self.handle_post(body),
        }
    }

    fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.shutdowns += 1;
            state.shut_down = true;
        }
        self.inbound_ready.notify_waiters();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_get_returns_empty_batch_and_opens_session() {
        // Arrange
        let peer = MockPeer::new();

        // Act
        let response = peer.execute(HttpRequest::get("mock://peer")).await.unwrap();

        // Assert
        assert!(response.is_ok());
        assert_eq!(response.body.as_ref(), &[0, 0, 0, 0]);
        assert!(peer.session_open());
        assert_eq!(peer.get_count(), 1);
    }

    #[tokio::test]
    async fn test_handshake_carries_session_header_when_configured() {
        let peer = MockPeer::new();
        peer.set_session_header("sess-42");

        let response = peer.execute(HttpRequest::get("mock://peer")).await.unwrap();

        assert_eq!(response.header(SESSION_HEADER), Some("sess-42"));
    }

    #[tokio::test]
    async fn test_echoed_post_is_returned_by_next_get() {
        // Arrange
        let peer = MockPeer::new();
        peer.execute(HttpRequest::get("mock://peer")).await.unwrap();

        // Act
        peer.execute(HttpRequest::post("mock://peer", b"hello".to_vec()))
            .await
            .unwrap();
        let response = peer.execute(HttpRequest::get("mock://peer")).await.unwrap();

        // Assert
        assert_eq!(response.body.as_ref(), b"\0\0\0\x01hello");
    }

    #[tokio::test]
    async fn test_post_before_handshake_is_counted() {
        let peer = MockPeer::new();

        peer.execute(HttpRequest::post("mock://peer", Bytes::new()))
            .await
            .unwrap();

        assert_eq!(peer.posts_before_session(), 1);
    }

    #[tokio::test]
    async fn test_scripted_get_failures_are_consumed_in_order() {
        // Arrange
        let peer = MockPeer::new();
        peer.script_get(GetScript::Status(503));
        peer.script_get(GetScript::IoError);

        // Act
        let first = peer.execute(HttpRequest::get("mock://peer")).await;
        let second = peer.execute(HttpRequest::get("mock://peer")).await;
        let third = peer.execute(HttpRequest::get("mock://peer")).await;

        // Assert
        assert_eq!(first.unwrap().status, 503);
        assert!(matches!(second, Err(TransportError::Request { .. })));
        assert!(third.unwrap().is_ok());
        assert!(peer.session_open());
    }

    #[tokio::test]
    async fn test_post_status_override_is_not_echoed() {
        // Arrange
        let peer = MockPeer::new();
        peer.execute(HttpRequest::get("mock://peer")).await.unwrap();
        peer.set_post_status(Some(500));
        peer.set_hold_timeout(Some(Duration::from_millis(20)));

        // Act
        let post = peer
            .execute(HttpRequest::post("mock://peer", b"x".to_vec()))
            .await
            .unwrap();
        let get = peer.execute(HttpRequest::get("mock://peer")).await.unwrap();

        // Assert – the long-poll timed out with nothing to deliver
        assert_eq!(post.status, 500);
        assert_eq!(get.body.as_ref(), &[0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_shutdown_releases_blocked_long_poll() {
        // Arrange – open the session so the next GET blocks
        let peer = Arc::new(MockPeer::new());
        peer.execute(HttpRequest::get("mock://peer")).await.unwrap();
        let blocked = {
            let p = Arc::clone(&peer);
            tokio::spawn(async move { p.execute(HttpRequest::get("mock://peer")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Act
        peer.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("long-poll must unblock")
            .expect("task panicked");

        // Assert
        assert_eq!(result, Err(TransportError::Shutdown));
        assert_eq!(peer.shutdown_count(), 1);
    }
}
