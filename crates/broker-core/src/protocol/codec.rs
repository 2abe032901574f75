//! Payload codec: turns one application message into bytes and back.
//!
//! The broker treats payloads as opaque.  It never looks inside a message; it
//! only needs *some* way to turn a message into the body of a `POST` and to
//! read messages back out of a `GET` response.  That "some way" is the
//! [`PayloadCodec`] trait, injected when the broker is built.
//!
//! A `GET` body carries its payloads back to back with no length in front of
//! each one, so a codec must be able to read exactly one message off the front
//! of a byte slice and say where it stopped.  That is [`PayloadCodec::decode_from`].
//!
//! # Default codec
//!
//! [`BincodeCodec`] works for any type that implements `serde::Serialize` and
//! `serde::de::DeserializeOwned`.  Bincode is compact and fast, and both ends
//! of the channel only need to agree on the Rust type definitions.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Errors that can occur while encoding or decoding a single payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The message could not be serialized.
    #[error("payload encode failed: {0}")]
    Encode(String),

    /// The bytes could not be turned back into a message.
    #[error("payload decode failed: {0}")]
    Decode(String),
}

/// Serializes and deserializes one application message.
///
/// Implementations must be `Send + Sync` because the codec is shared by the
/// sender task (encode) and the poller task (decode).
pub trait PayloadCodec<M>: Send + Sync {
    /// Encodes `message` into a self-contained byte vector.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the message cannot be serialized.
    fn encode(&self, message: &M) -> Result<Vec<u8>, CodecError>;

    /// Decodes one message from the front of `input` and advances `input`
    /// past the bytes it consumed.
    ///
    /// On error the position of `input` is unspecified.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the leading bytes do not form a valid
    /// message.
    fn decode_from(&self, input: &mut &[u8]) -> Result<M, CodecError>;

    /// Decodes one message from exactly `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes do not form a valid message
    /// or if bytes are left over after it.
    fn decode(&self, bytes: &[u8]) -> Result<M, CodecError> {
        let mut input = bytes;
        let message = self.decode_from(&mut input)?;
        if !input.is_empty() {
            return Err(CodecError::Decode(format!(
                "{} bytes left after the message",
                input.len()
            )));
        }
        Ok(message)
    }
}

/// A [`PayloadCodec`] backed by `bincode` for any serde-compatible type.
///
/// # Examples
///
/// ```rust
/// use broker_core::{BincodeCodec, PayloadCodec};
///
/// let codec = BincodeCodec;
/// let bytes = codec.encode(&"hello".to_string()).unwrap();
/// let decoded: String = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, "hello");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl<M> PayloadCodec<M> for BincodeCodec
where
    M: Serialize + DeserializeOwned,
{
    fn encode(&self, message: &M) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(message).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode_from(&self, input: &mut &[u8]) -> Result<M, CodecError> {
        // `&mut &[u8]` is a `Read` that moves the slice forward as it goes.
        bincode::deserialize_from(input).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
