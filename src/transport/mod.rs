//! Transport module - socket adapters and connection lifecycle.
//!
//! - [`ByteTransport`]: buffered non-blocking adapter over one TCP socket
//! - [`ClientConnection`]: client-side resolve/connect/reconnect state machine
//!
//! Socket I/O runs in small tokio tasks (one receive loop, one writer per
//! connection). Those tasks never touch connection state: every completion
//! is sent as an [`IoEvent`] to the single owner of the connection, which
//! applies it and drains [`Notice`]s to invoke handler callbacks. Handlers
//! are passed by `&mut` at that point and are never stored.

mod byte_transport;
mod client;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::writer::WriterConfig;

pub use byte_transport::{ByteTransport, TransportState};
pub use client::{ClientConnection, ConnectionState};

/// Default size of the reusable receive scratch buffer.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 1024;

/// Process-unique identity of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Transport event delivered to the connection owner.
#[derive(Debug)]
pub enum Notice {
    /// The transport opened.
    Connected,
    /// An I/O or protocol failure. Always followed by `Disconnected` when
    /// the transport was open.
    Error(io::Error),
    /// The transport closed. Exactly once per open/close cycle.
    Disconnected,
}

/// Why a connection went away.
#[derive(Debug)]
pub enum DisconnectReason {
    /// The peer shut the connection down.
    PeerClosed,
    /// A read, write or framing error.
    Io(io::Error),
    /// Closed locally.
    Closed,
}

impl DisconnectReason {
    /// Derive the reason from the last error reported before the close.
    pub fn from_last_error(error: Option<io::Error>) -> Self {
        match error {
            None => DisconnectReason::Closed,
            Some(e) if e.kind() == io::ErrorKind::UnexpectedEof => DisconnectReason::PeerClosed,
            Some(e) => DisconnectReason::Io(e),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::PeerClosed => f.write_str("closed by peer"),
            DisconnectReason::Io(e) => write!(f, "I/O error: {}", e),
            DisconnectReason::Closed => f.write_str("closed locally"),
        }
    }
}

/// Configuration shared by server and client transports.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Size of the reusable receive buffer (bytes per read completion).
    pub receive_buffer_size: usize,
    /// Largest frame payload accepted from the peer.
    pub max_frame_size: u32,
    /// Disable Nagle batching on open.
    pub nodelay: bool,
    /// Outbound write queue settings.
    pub writer: WriterConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            nodelay: true,
            writer: WriterConfig::default(),
        }
    }
}

/// Completion reported by a connection's I/O tasks.
#[derive(Debug)]
pub(crate) struct IoEvent {
    pub(crate) conn: ConnectionId,
    /// Open cycle the completion belongs to; stale epochs are discarded.
    pub(crate) epoch: u64,
    pub(crate) kind: IoEventKind,
}

#[derive(Debug)]
pub(crate) enum IoEventKind {
    Data(Bytes),
    Eof,
    Failed(io::Error),
}

pub(crate) type EventSender = mpsc::UnboundedSender<IoEvent>;
