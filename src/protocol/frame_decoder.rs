//! Frame decoder for accumulating partial reads.
//!
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForLength`: need at least 4 bytes
//! - `WaitingForPayload`: length parsed, need N more payload bytes
//!
//! The decoder pulls bytes from any [`ByteSource`]. It only consumes the
//! length prefix once all 4 bytes are buffered and only consumes the payload
//! once the whole payload is buffered, so a partial frame is never handed
//! out.
//!
//! # Example
//!
//! ```
//! use wirelink::protocol::{build_frame, FrameDecoder};
//!
//! let mut decoder = FrameDecoder::new();
//! let bytes = build_frame(b"hello").unwrap();
//!
//! // Data arrives in chunks from the socket
//! assert!(decoder.push(&bytes[..3]).unwrap().is_empty());
//! let frames = decoder.push(&bytes[3..]).unwrap();
//! assert_eq!(frames[0].payload(), b"hello");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{
    decode_length_prefix, validate_length, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE,
};
use super::Frame;
use crate::error::Result;

/// Non-blocking source of buffered inbound bytes.
pub trait ByteSource {
    /// Number of bytes that can be read right now.
    fn available_bytes(&self) -> usize;

    /// Copy up to `buf.len()` buffered bytes into `buf`, removing them.
    ///
    /// Never returns more than [`available_bytes`](Self::available_bytes).
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Remove exactly `n` buffered bytes.
    ///
    /// Callers must check `available_bytes() >= n` first.
    fn read_bytes(&mut self, n: usize) -> Bytes;
}

impl ByteSource for BytesMut {
    fn available_bytes(&self) -> usize {
        self.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.len());
        buf[..n].copy_from_slice(&self.split_to(n));
        n
    }

    fn read_bytes(&mut self, n: usize) -> Bytes {
        let n = n.min(self.len());
        self.split_to(n).freeze()
    }
}

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for a complete length prefix.
    WaitingForLength,
    /// Length parsed, waiting for payload bytes.
    WaitingForPayload { remaining: u32 },
}

/// Extracts complete frames from buffered bytes.
pub struct FrameDecoder {
    /// Current parsing state.
    state: State,
    /// Maximum accepted payload size.
    max_frame_size: u32,
    /// Backing buffer for [`push`](Self::push).
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a decoder with the default maximum frame size (16 MiB).
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom maximum frame size.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            state: State::WaitingForLength,
            max_frame_size,
            buffer: BytesMut::new(),
        }
    }

    /// Configured maximum frame size.
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Try to extract one frame from `source`.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a protocol violation (frame too large)
    ///
    /// After an error the stream cannot be resynchronized; the connection
    /// must be closed.
    pub fn next_frame<S: ByteSource + ?Sized>(&mut self, source: &mut S) -> Result<Option<Frame>> {
        if let State::WaitingForLength = self.state {
            if source.available_bytes() < LENGTH_PREFIX_SIZE {
                return Ok(None);
            }

            let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
            source.read(&mut prefix);
            let len = decode_length_prefix(&prefix).unwrap_or_default();
            validate_length(len, self.max_frame_size)?;

            if len == 0 {
                return Ok(Some(Frame::new(Bytes::new())));
            }

            self.state = State::WaitingForPayload { remaining: len };
        }

        let State::WaitingForPayload { remaining } = self.state else {
            return Ok(None);
        };

        let remaining = remaining as usize;
        if source.available_bytes() < remaining {
            return Ok(None);
        }

        let payload = source.read_bytes(remaining);
        self.state = State::WaitingForLength;
        Ok(Some(Frame::new(payload)))
    }

    /// Push data into the internal buffer and extract all complete frames.
    ///
    /// Partial data stays buffered for the next push.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        let outcome = loop {
            match self.next_frame(&mut buffer) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break Ok(frames),
                Err(e) => break Err(e),
            }
        };

        self.buffer = buffer;
        outcome
    }

    /// Whether the decoder sits between frames.
    pub fn is_idle(&self) -> bool {
        self.state == State::WaitingForLength
    }

    /// Number of bytes held by [`push`](Self::push) that are not yet a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear buffered bytes and reset state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_frame;

    fn frame_bytes(payload: &[u8]) -> Vec<u8> {
        build_frame(payload).unwrap().to_vec()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut decoder = FrameDecoder::new();

        let frames = decoder.push(&frame_bytes(b"hello")).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"hello");
        assert_eq!(decoder.buffered_len(), 0);
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut decoder = FrameDecoder::new();

        let mut combined = frame_bytes(b"first");
        combined.extend(frame_bytes(b"second"));
        combined.extend(frame_bytes(b"third"));

        let frames = decoder.push(&combined).unwrap();

        let payloads: Vec<&[u8]> = frames.iter().map(|f| f.payload()).collect();
        assert_eq!(payloads, vec![&b"first"[..], b"second", b"third"]);
    }

    #[test]
    fn test_fragmented_length_prefix() {
        let mut decoder = FrameDecoder::new();
        let bytes = frame_bytes(b"test");

        assert!(decoder.push(&bytes[..2]).unwrap().is_empty());
        assert_eq!(decoder.state_name(), "WaitingForLength");
        assert_eq!(decoder.buffered_len(), 2);

        let frames = decoder.push(&bytes[2..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"test");
    }

    #[test]
    fn test_fragmented_payload() {
        let mut decoder = FrameDecoder::new();
        let payload = b"this is a longer payload that will be fragmented";
        let bytes = frame_bytes(payload);

        let split = LENGTH_PREFIX_SIZE + 10;
        assert!(decoder.push(&bytes[..split]).unwrap().is_empty());
        assert_eq!(decoder.state_name(), "WaitingForPayload");

        let frames = decoder.push(&bytes[split..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), payload);
    }

    #[test]
    fn test_zero_length_frame() {
        let mut decoder = FrameDecoder::new();

        let mut bytes = frame_bytes(b"");
        bytes.extend(frame_bytes(b"after"));
        let frames = decoder.push(&bytes).unwrap();

        assert_eq!(frames.len(), 2);
        assert!(frames[0].payload().is_empty());
        assert_eq!(frames[1].payload(), b"after");
    }

    #[test]
    fn test_max_frame_size_validation() {
        let mut decoder = FrameDecoder::with_max_frame_size(100);

        let result = decoder.push(&1000u32.to_be_bytes());

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut decoder = FrameDecoder::new();
        let bytes = frame_bytes(b"hi");

        let mut all_frames = Vec::new();
        for byte in &bytes {
            all_frames.extend(decoder.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames.len(), 1);
        assert_eq!(all_frames[0].payload(), b"hi");
    }

    #[test]
    fn test_next_frame_from_external_source() {
        let mut decoder = FrameDecoder::new();
        let mut source = BytesMut::new();
        source.extend_from_slice(&frame_bytes(b"one"));
        source.extend_from_slice(&frame_bytes(b"two")[..5]);

        let first = decoder.next_frame(&mut source).unwrap().unwrap();
        assert_eq!(first.payload(), b"one");

        // The second frame is partial: the prefix is consumed, the payload waits
        assert!(decoder.next_frame(&mut source).unwrap().is_none());
        assert_eq!(source.available_bytes(), 1);

        source.extend_from_slice(b"wo");
        let second = decoder.next_frame(&mut source).unwrap().unwrap();
        assert_eq!(second.payload(), b"two");
        assert!(decoder.next_frame(&mut source).unwrap().is_none());
    }

    #[test]
    fn test_reset_clears_partial_state() {
        let mut decoder = FrameDecoder::new();
        let bytes = frame_bytes(b"test");
        decoder.push(&bytes[..LENGTH_PREFIX_SIZE + 1]).unwrap();
        assert_eq!(decoder.state_name(), "WaitingForPayload");

        decoder.reset();

        assert!(decoder.is_idle());
        assert_eq!(decoder.buffered_len(), 0);
        let frames = decoder.push(&frame_bytes(b"fresh")).unwrap();
        assert_eq!(frames[0].payload(), b"fresh");
    }

    #[test]
    fn test_bytes_mut_read_never_exceeds_available() {
        let mut source = BytesMut::from(&b"abc"[..]);
        let mut buf = [0u8; 8];

        assert_eq!(source.read(&mut buf), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(source.read(&mut buf), 0);
    }
}
