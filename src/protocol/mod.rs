//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the length-prefixed framing shared by both sides:
//! - 4-byte big endian length prefix encoding/decoding
//! - Frame decoder for accumulating partial reads
//! - Frame struct and builders

mod frame;
mod frame_decoder;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_decoder::{ByteSource, FrameDecoder};
pub use wire_format::{
    decode_length_prefix, encode_length_prefix, payload_length, validate_length,
    DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE,
};
