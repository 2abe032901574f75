//! Delivery-batch wire format for long-poll `GET` response bodies.
//!
//! Wire format:
//! ```text
//! [count:4] then count codec-encoded payloads, back to back
//! ```
//! `count` is a big-endian `u32`.  `count == 0` is legal: the very first GET
//! of a session returns an empty batch purely to prove the channel works.
//!
//! Payloads carry no length of their own.  The codec reads one message off the
//! front of the remaining bytes ([`PayloadCodec::decode_from`]) and the next
//! message starts where it stopped.
//!
//! The same format is used in both directions of a test peer, so this module
//! offers encoders as well as the decoder.

use thiserror::Error;

use crate::protocol::codec::{CodecError, PayloadCodec};

/// Size of the message-count field at the start of every batch.
pub const COUNT_FIELD_SIZE: usize = 4;

/// Errors that can occur while encoding or decoding a delivery batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    /// The body is shorter than the count field.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// More messages than the count field can express.
    #[error("{0} messages do not fit in one batch")]
    TooManyMessages(usize),

    /// Bytes remain after the last declared payload.
    #[error("{0} trailing bytes after the last payload")]
    TrailingBytes(usize),

    /// The codec rejected one of the payloads.
    #[error("payload {index} could not be processed: {source}")]
    Codec {
        index: usize,
        #[source]
        source: CodecError,
    },
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Builds a batch body from payloads that are already codec-encoded.
///
/// Each payload is copied verbatim after the count, so every element must be
/// exactly one encoded message (for example a `POST` body a peer is echoing).
///
/// # Errors
///
/// Returns [`BatchError::TooManyMessages`] if there are more than `u32::MAX`
/// payloads.
///
/// # Examples
///
/// ```rust
/// use broker_core::protocol::encode_payloads;
///
/// let body = encode_payloads(&[b"one".as_slice(), b"two".as_slice()]).unwrap();
/// assert_eq!(body, b"\0\0\0\x02onetwo");
/// ```
pub fn encode_payloads<T: AsRef<[u8]>>(payloads: &[T]) -> Result<Vec<u8>, BatchError> {
    let count = count_field(payloads.len())?;
    let total: usize = payloads.iter().map(|p| p.as_ref().len()).sum();

    let mut buf = Vec::with_capacity(COUNT_FIELD_SIZE + total);
    buf.extend_from_slice(&count);
    for payload in payloads {
        buf.extend_from_slice(payload.as_ref());
    }
    Ok(buf)
}

/// Encodes `messages` with `codec` into one batch body.
///
/// # Errors
///
/// Returns [`BatchError::Codec`] if a message cannot be encoded, or
/// [`BatchError::TooManyMessages`] if the count does not fit.
pub fn encode_batch<M, C>(codec: &C, messages: &[M]) -> Result<Vec<u8>, BatchError>
where
    C: PayloadCodec<M> + ?Sized,
{
    let mut buf = Vec::from(count_field(messages.len())?);
    for (index, message) in messages.iter().enumerate() {
        let bytes = codec
            .encode(message)
            .map_err(|source| BatchError::Codec { index, source })?;
        buf.extend_from_slice(&bytes);
    }
    Ok(buf)
}

fn count_field(len: usize) -> Result<[u8; COUNT_FIELD_SIZE], BatchError> {
    let count = u32::try_from(len).map_err(|_| BatchError::TooManyMessages(len))?;
    Ok(count.to_be_bytes())
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decodes a batch body into messages, preserving arrival order.
///
/// Decoding is all-or-nothing: if any payload is malformed, or bytes are left
/// after the last one, no message from the batch is returned.
///
/// # Errors
///
/// - [`BatchError::InsufficientData`] if the body is shorter than the count.
/// - [`BatchError::Codec`] naming the index of the first payload the codec
///   could not read.  A count larger than the body holds ends up here too,
///   because the codec runs out of input.
/// - [`BatchError::TrailingBytes`] if bytes remain after `count` payloads.
pub fn decode_batch<M, C>(codec: &C, body: &[u8]) -> Result<Vec<M>, BatchError>
where
    C: PayloadCodec<M> + ?Sized,
{
    if body.len() < COUNT_FIELD_SIZE {
        return Err(BatchError::InsufficientData {
            needed: COUNT_FIELD_SIZE,
            available: body.len(),
        });
    }
    let (count, mut rest) = body.split_at(COUNT_FIELD_SIZE);
    let count = u32::from_be_bytes([count[0], count[1], count[2], count[3]]) as usize;

    // A corrupt count must not drive a huge allocation up front.
    let mut messages = Vec::with_capacity(count.min(rest.len()));
    for index in 0..count {
        let message = codec
            .decode_from(&mut rest)
            .map_err(|source| BatchError::Codec { index, source })?;
        messages.push(message);
    }

    if !rest.is_empty() {
        return Err(BatchError::TrailingBytes(rest.len()));
    }
    Ok(messages)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
