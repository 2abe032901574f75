//! Protocol module containing the payload codec and the batch wire format.

pub mod batch;
pub mod codec;

pub use batch::{decode_batch, encode_batch, encode_payloads, BatchError};
pub use codec::{BincodeCodec, CodecError, PayloadCodec};
