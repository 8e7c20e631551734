//! Wire format encoding and decoding.
//!
//! Every message travels as one frame:
//! ```text
//! ┌──────────────┬─────────────────────────┐
//! │ Length       │ Payload                 │
//! │ 4 bytes      │ `Length` bytes          │
//! │ uint32 BE    │ (may be empty)          │
//! └──────────────┴─────────────────────────┘
//! ```
//!
//! There is no other framing metadata. The format is identical in both
//! directions.

use crate::error::{Result, WirelinkError};

/// Length prefix size in bytes (fixed, exactly 4).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum payload size accepted from a peer (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Encode a payload length as a big endian prefix.
///
/// # Example
///
/// ```
/// use wirelink::protocol::encode_length_prefix;
///
/// assert_eq!(encode_length_prefix(258), [0, 0, 1, 2]);
/// ```
#[inline]
pub fn encode_length_prefix(len: u32) -> [u8; LENGTH_PREFIX_SIZE] {
    len.to_be_bytes()
}

/// Decode a big endian length prefix.
///
/// Returns `None` if the buffer is shorter than [`LENGTH_PREFIX_SIZE`].
///
/// # Example
///
/// ```
/// use wirelink::protocol::decode_length_prefix;
///
/// assert_eq!(decode_length_prefix(&[0, 0, 0, 42, 0xff]), Some(42));
/// assert_eq!(decode_length_prefix(&[0, 0]), None);
/// ```
#[inline]
pub fn decode_length_prefix(buf: &[u8]) -> Option<u32> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Validate a decoded length against the configured maximum.
pub fn validate_length(len: u32, max_frame_size: u32) -> Result<()> {
    if len > max_frame_size {
        return Err(WirelinkError::Protocol(format!(
            "Frame size {} exceeds maximum {}",
            len, max_frame_size
        )));
    }
    Ok(())
}

/// Convert an outbound payload length to its wire representation.
///
/// Payloads must fit in a `u32`.
pub fn payload_length(payload: &[u8]) -> Result<u32> {
    u32::try_from(payload.len()).map_err(|_| {
        WirelinkError::Protocol(format!(
            "Payload of {} bytes does not fit a 4-byte length prefix",
            payload.len()
        ))
    })
}
