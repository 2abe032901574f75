//! broker-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does the broker do? (for beginners)
//!
//! Plain HTTP is request/response: the client asks, the server answers.  The
//! broker turns one HTTP URL into a two-way message channel:
//!
//! 1. **Outbound**: every message the application sends becomes one HTTP
//!    `POST` whose body is the encoded payload.
//! 2. **Inbound**: a background task keeps a *long-poll* `GET` open at all
//!    times.  The server holds that request until it has something to say,
//!    then answers with a batch of zero or more messages.  The broker decodes
//!    them, hands each to the application's receiver, and immediately polls
//!    again.
//!
//! Two rules make the channel dependable:
//!
//! - Nothing is `POST`ed until one `GET` has succeeded (the *session*).
//! - The inbound side retries forever; the outbound side tries each message
//!   once and reports failure through an optional callback.
//!
//! # Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use broker_client::application::{BrokerBuilder, Channel, ThreadExecutor};
//! use broker_client::infrastructure::transport::ReqwestTransport;
//!
//! let broker = BrokerBuilder::<String>::new()
//!     .url("http://127.0.0.1:8080/broker")
//!     .transport(Arc::new(ReqwestTransport::new(None)?))
//!     .dispatch_executor(Arc::new(ThreadExecutor::spawn("dispatch")?))
//!     .receiver(|msg: String, ch: &Channel<String>| ch.send(format!("ack {msg}"), None))
//!     .build()?;
//! broker.channel().send("hello".to_string(), None);
//! broker.shutdown(Duration::from_secs(5)).await;
//! ```

/// Application layer: broker, channel, and the sender/poller loops.
pub mod application;

/// Infrastructure layer: HTTP transports and the configuration file.
pub mod infrastructure;
