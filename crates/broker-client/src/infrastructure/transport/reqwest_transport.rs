//! Production [`HttpTransport`] backed by `reqwest`.
//!
//! `reqwest::Client` owns a connection pool.  There is no public API to close
//! that pool while a request is in flight, so shutdown is modelled with a
//! `watch` channel instead: every call races the HTTP future against the
//! shutdown signal with `tokio::select!`.  When the signal fires, the HTTP
//! future is dropped, which closes its connection, and the call returns
//! [`TransportError::Shutdown`].

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use super::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError};

/// An [`HttpTransport`] that executes requests with a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: ::reqwest::Client,
    shutdown_tx: watch::Sender<bool>,
}

impl ReqwestTransport {
    /// Builds a transport with an optional TCP connect timeout.
    ///
    /// No overall request timeout is set: long-poll `GET`s are expected to
    /// block for as long as the server holds them.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Request`] if the underlying client cannot be
    /// constructed (for example, the TLS backend fails to initialise).
    pub fn new(connect_timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = ::reqwest::Client::builder();
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().map_err(|e| TransportError::Request {
            url: String::new(),
            reason: format!("could not build HTTP client: {e}"),
        })?;
        Ok(Self::with_client(client))
    }

    /// Wraps an already-configured `reqwest::Client`.
    pub fn with_client(client: ::reqwest::Client) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            client,
            shutdown_tx,
        }
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.clone();
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url).body(request.body),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| TransportError::Request {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if self.is_shut_down() {
            return Err(TransportError::Shutdown);
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            result = self.send(request) => result,
            // The sender lives in `self`, so `wait_for` cannot fail here.
            _ = shutdown_rx.wait_for(|stopped| *stopped) => {
                debug!("in-flight request abandoned by transport shutdown");
                Err(TransportError::Shutdown)
            }
        }
    }

    fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
