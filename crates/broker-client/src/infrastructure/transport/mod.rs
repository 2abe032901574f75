//! HTTP transport abstraction used by the broker's two loops.
//!
//! The broker never talks to an HTTP library directly.  It builds plain
//! [`HttpRequest`] values and hands them to an [`HttpTransport`]
//! implementation injected at construction time.  This keeps the broker
//! independent of any particular client library and lets tests replace the
//! network with an in-memory peer.
//!
//! # Implementations
//!
//! - **`reqwest_transport`** – [`ReqwestTransport`], the production adapter.
//! - **`mock`** – [`MockPeer`], a scripted in-memory remote peer for tests and
//!   local experiments.
//!
//! # Forced shutdown (for beginners)
//!
//! A long-poll `GET` is *designed* to block for a long time: the server holds
//! the request open until it has something to say.  Most HTTP clients offer no
//! clean way to cancel such a call from another task.  Instead, every transport
//! must implement [`HttpTransport::shutdown`], which invalidates the transport
//! so that any in-flight or future call returns
//! [`TransportError::Shutdown`] promptly.  The broker calls it exactly once
//! during its own shutdown.

pub mod mock;
pub mod reqwest_transport;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use self::mock::{GetScript, MockPeer};
pub use self::reqwest_transport::ReqwestTransport;

/// The only HTTP status the broker treats as success.
pub const STATUS_OK: u16 = 200;

/// Response header that may carry the session id on the handshake `GET`.
pub const SESSION_HEADER: &str = "x-broker-session";

/// Errors returned by an [`HttpTransport`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be sent or no response arrived.
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The response arrived but its body could not be read.
    #[error("reading response body failed: {0}")]
    Body(String),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

/// The two request types the broker issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Long-poll for inbound messages.
    Get,
    /// Deliver one outbound message.
    Post,
}

/// A transport-agnostic HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Header name/value pairs, applied in order.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpRequest {
    /// Builds a body-less long-poll `GET`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Builds a `POST` carrying one encoded payload.
    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Appends a header.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Returns the first value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A transport-agnostic HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Builds a response with the given status and body and no headers.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Builds a `200 OK` response.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(STATUS_OK, body)
    }

    /// Returns `true` for status 200.
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Returns the first value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Executes HTTP requests on behalf of the broker.
///
/// Infrastructure implementations wrap a real HTTP client; test
/// implementations record calls and script responses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Executes one request and returns the full response.
    ///
    /// No client-side timeout is applied to `GET`s; a long-poll may legitimately
    /// block until the server answers or [`HttpTransport::shutdown`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when no complete response could be obtained.
    /// A non-200 status is *not* an error at this level.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Invalidates the transport, forcing in-flight and future calls to fail
    /// with [`TransportError::Shutdown`].
    fn shutdown(&self);
}

/// Hook applied to every request just before it is executed.
///
/// Use it to inject headers, session tokens, or credentials without the broker
/// needing to understand them.  Closures implement this trait, so
/// `|req: &mut HttpRequest| req.add_header("authorization", "Bearer ...")`
/// works directly.
pub trait RequestInitializer: Send + Sync {
    /// Mutates `request` in place.
    fn initialize(&self, request: &mut HttpRequest);
}

impl<F> RequestInitializer for F
where
    F: Fn(&mut HttpRequest) + Send + Sync,
{
    fn initialize(&self, request: &mut HttpRequest) {
        self(request)
    }
}

/// A [`RequestInitializer`] that leaves requests unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInitializer;

impl RequestInitializer for NoopInitializer {
    fn initialize(&self, _request: &mut HttpRequest) {}
}

/// A [`RequestInitializer`] that adds a fixed set of headers to every request.
///
/// Built from the `[broker.headers]` table of the configuration file.
#[derive(Debug, Clone, Default)]
pub struct StaticHeaders {
    headers: Vec<(String, String)>,
}

impl StaticHeaders {
    /// Creates an initializer from name/value pairs.
    pub fn new<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl RequestInitializer for StaticHeaders {
    fn initialize(&self, request: &mut HttpRequest) {
        for (name, value) in &self.headers {
            request.add_header(name.clone(), value.clone());
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_request_has_empty_body() {
        let req = HttpRequest::get("http://peer/broker");
        assert_eq!(req.method, HttpMethod::Get);
        assert!(req.body.is_empty());
        assert!(req.headers.is_empty());
    }

    #[test]
    fn test_post_request_carries_body() {
        let req = HttpRequest::post("http://peer/broker", vec![1u8, 2, 3]);
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.body.as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        // Arrange
        let mut req = HttpRequest::get("http://peer/broker");
        req.add_header("X-Broker-Session", "abc");

        // Act / Assert
        assert_eq!(req.header("x-broker-session"), Some("abc"));
        assert_eq!(req.header("missing"), None);
    }

    #[test]
    fn test_closure_works_as_request_initializer() {
        // Arrange
        let init = |req: &mut HttpRequest| req.add_header("authorization", "Bearer t0k3n");
        let mut req = HttpRequest::get("http://peer/broker");

        // Act
        init.initialize(&mut req);

        // Assert
        assert_eq!(req.header("Authorization"), Some("Bearer t0k3n"));
    }

    #[test]
    fn test_static_headers_are_appended_in_order() {
        // Arrange
        let init = StaticHeaders::new([("x-app", "editor"), ("x-tenant", "acme")]);
        let mut req = HttpRequest::post("http://peer/broker", Bytes::new());

        // Act
        init.initialize(&mut req);

        // Assert
        assert_eq!(
            req.headers,
            vec![
                ("x-app".to_string(), "editor".to_string()),
                ("x-tenant".to_string(), "acme".to_string()),
            ]
        );
    }

    #[test]
    fn test_noop_initializer_leaves_request_unchanged() {
        let mut req = HttpRequest::get("http://peer/broker");
        let before = req.clone();
        NoopInitializer.initialize(&mut req);
        assert_eq!(req, before);
    }

    #[test]
    fn test_response_is_ok_only_for_200() {
        assert!(HttpResponse::ok(Bytes::new()).is_ok());
        assert!(!HttpResponse::new(204, Bytes::new()).is_ok());
        assert!(!HttpResponse::new(500, Bytes::new()).is_ok());
    }
}
