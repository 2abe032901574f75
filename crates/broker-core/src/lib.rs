//! # broker-core
//!
//! Shared foundation for the HTTP long-poll message broker: the payload codec,
//! the delivery-batch wire format, and the session state cell.
//!
//! This crate has zero dependencies on async runtimes or network sockets, so
//! every piece here can be tested with plain `#[test]` functions.
//!
//! # Architecture overview (for beginners)
//!
//! The broker turns an ordinary HTTP endpoint into a two-way message channel:
//!
//! - Outbound messages are sent one per HTTP `POST`.
//! - Inbound messages arrive in *batches* as the body of a long-poll HTTP `GET`.
//!
//! This crate defines the pieces both directions agree on:
//!
//! - **`protocol`** – How payloads become bytes.  A [`PayloadCodec`] turns one
//!   application message into bytes (and back); the batch format puts a
//!   message count in front of zero or more encoded payloads to form one GET
//!   response body.
//!
//! - **`domain`** – Pure state with no I/O.  The [`SessionCell`] is the
//!   tri-state handshake flag (`NotEstablished → Establishing → Established`)
//!   guarded by a single compare-and-set.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `broker_core::BincodeCodec` instead of `broker_core::protocol::codec::BincodeCodec`.
pub use domain::session::{SessionCell, SessionState};
pub use protocol::batch::{decode_batch, encode_batch, encode_payloads, BatchError};
pub use protocol::codec::{BincodeCodec, CodecError, PayloadCodec};
