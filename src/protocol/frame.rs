//! Frame struct and frame builders.
//!
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use wirelink::protocol::{build_frame, LENGTH_PREFIX_SIZE};
//!
//! let bytes = build_frame(b"hello").unwrap();
//! assert_eq!(bytes.len(), LENGTH_PREFIX_SIZE + 5);
//! assert_eq!(&bytes[..4], &[0, 0, 0, 5]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{encode_length_prefix, payload_length, LENGTH_PREFIX_SIZE};
use crate::error::Result;

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from a payload.
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the frame, returning its payload.
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Build a complete frame as a single contiguous buffer.
///
/// Fails only if the payload does not fit a 4-byte length prefix.
pub fn build_frame(payload: &[u8]) -> Result<Bytes> {
    let len = payload_length(payload)?;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_slice(&encode_length_prefix(len));
    buf.put_slice(payload);
    Ok(buf.freeze())
}
