//! Outbound stub for one remote endpoint.

use bytes::Bytes;
use serde::Serialize;

use super::encode_call;
use crate::error::Result;
use crate::protocol::build_frame;
use crate::transport::ConnectionId;
use crate::writer::WriterHandle;

/// Sends frames to one connected peer.
///
/// Cheap to clone. Every clone writes into the same connection queue, so
/// frames from different clones never interleave mid-frame.
#[derive(Clone)]
pub struct Peer {
    id: ConnectionId,
    writer: WriterHandle,
    origin: Option<String>,
}

impl Peer {
    pub fn new(id: ConnectionId, writer: WriterHandle, origin: Option<String>) -> Self {
        Self { id, writer, origin }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Peer address as `ip:port`, when known.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Whether the connection's writer is still running.
    pub fn is_connected(&self) -> bool {
        !self.writer.is_closed()
    }

    /// Send a raw frame payload.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        self.writer.send(build_frame(payload)?)
    }

    /// Send an already framed buffer.
    pub fn send_encoded(&self, frame: Bytes) -> Result<()> {
        self.writer.send(frame)
    }

    /// Invoke `method` on the peer.
    pub fn call<A>(&self, method: &str, args: &A) -> Result<()>
    where
        A: Serialize + ?Sized,
    {
        self.send(&encode_call(method, args)?)
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("connected", &self.is_connected())
            .finish()
    }
}
