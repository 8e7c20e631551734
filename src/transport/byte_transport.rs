//! Buffered non-blocking byte transport over one socket.
//!
//! `read` operates in cooperative-poll mode: it only ever hands out bytes
//! that already arrived. Callers check [`ByteTransport::available_bytes`]
//! or [`ByteTransport::peek`] first and come back after the owner applied
//! more receive completions. Nothing here drives the runtime or blocks.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{ConnectionId, EventSender, IoEvent, IoEventKind, Notice, TransportConfig};
use crate::error::{Result, WirelinkError};
use crate::protocol::{build_frame, ByteSource};
use crate::writer::{writer_channel, WriterHandle};

/// Open/closed state of a byte transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Not connected; reads return nothing and writes fail.
    Closed,
    /// Receive loop running, writes accepted.
    Open,
}

/// Buffered adapter over one socket.
///
/// Owns the inbound byte buffer and the outbound write queue handle. All
/// mutation happens on the owner through [`handle_event`](Self::handle_event)
/// and the read/write/close methods.
pub struct ByteTransport {
    id: ConnectionId,
    config: TransportConfig,
    reactor: Handle,
    events: EventSender,
    state: TransportState,
    /// Bumped on every open and close so late completions can be discarded.
    epoch: u64,
    inbound: BytesMut,
    writer: Option<WriterHandle>,
    tasks: Vec<JoinHandle<()>>,
    peer_addr: Option<SocketAddr>,
    notices: VecDeque<Notice>,
}

impl ByteTransport {
    pub(crate) fn new(
        id: ConnectionId,
        config: TransportConfig,
        reactor: Handle,
        events: EventSender,
    ) -> Self {
        Self {
            id,
            config,
            reactor,
            events,
            state: TransportState::Closed,
            epoch: 0,
            inbound: BytesMut::new(),
            writer: None,
            tasks: Vec::new(),
            peer_addr: None,
            notices: VecDeque::new(),
        }
    }

    /// Identity of this connection.
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// True unless an error occurred or the transport was closed.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.state == TransportState::Open
    }

    /// Open the transport over a connected socket.
    ///
    /// Disables Nagle batching (unless configured otherwise), queues a
    /// [`Notice::Connected`], and starts the receive loop and writer task.
    /// An already open transport is closed first.
    pub(crate) fn open(&mut self, stream: TcpStream) -> Result<()> {
        if self.config.nodelay {
            stream.set_nodelay(true)?;
        }
        let peer_addr = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        self.attach(read_half, write_half, peer_addr);
        Ok(())
    }

    /// Open the transport over arbitrary stream halves.
    pub(crate) fn attach<R, W>(&mut self, reader: R, writer: W, peer_addr: Option<SocketAddr>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if self.is_open() {
            self.close();
        }

        self.epoch += 1;
        self.peer_addr = peer_addr;
        self.inbound.clear();

        let (handle, queue) = writer_channel(self.config.writer.clone());

        let receive = receive_loop(
            reader,
            self.id,
            self.epoch,
            self.events.clone(),
            self.config.receive_buffer_size,
        );

        let events = self.events.clone();
        let (conn, epoch) = (self.id, self.epoch);
        let write = async move {
            if let Err(e) = queue.run(writer).await {
                let _ = events.send(IoEvent {
                    conn,
                    epoch,
                    kind: IoEventKind::Failed(into_io_error(e)),
                });
            }
        };

        self.tasks.push(self.reactor.spawn(receive));
        self.tasks.push(self.reactor.spawn(write));
        self.writer = Some(handle);
        self.state = TransportState::Open;
        self.notices.push_back(Notice::Connected);

        tracing::debug!(conn = %self.id, peer = ?self.peer_addr, "transport open");
    }

    /// Apply one completion from this transport's I/O tasks.
    ///
    /// Completions from an earlier open cycle, or arriving after close, are
    /// ignored. Returns whether the event was applied.
    pub(crate) fn handle_event(&mut self, epoch: u64, kind: IoEventKind) -> bool {
        if epoch != self.epoch || !self.is_open() {
            tracing::trace!(
                conn = %self.id,
                epoch,
                current = self.epoch,
                "discarding stale completion"
            );
            return false;
        }

        match kind {
            IoEventKind::Data(bytes) => self.inbound.extend_from_slice(&bytes),
            IoEventKind::Eof => self.fail(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )),
            IoEventKind::Failed(error) => self.fail(error),
        }
        true
    }

    /// Report an error and close.
    ///
    /// Used for I/O failures and for framing violations, which cannot be
    /// recovered from on a byte stream.
    pub fn fail(&mut self, error: io::Error) {
        if !self.is_open() {
            return;
        }
        tracing::debug!(conn = %self.id, error = %error, "transport error");
        self.notices.push_back(Notice::Error(error));
        self.close();
    }

    /// Remove up to `buf.len()` buffered bytes into `buf`.
    ///
    /// Never returns more than [`available_bytes`](Self::available_bytes).
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        ByteSource::read(&mut self.inbound, buf)
    }

    /// Whether the transport is open and has buffered bytes.
    #[inline]
    pub fn peek(&self) -> bool {
        self.is_open() && !self.inbound.is_empty()
    }

    /// Bytes received and not yet read.
    #[inline]
    pub fn available_bytes(&self) -> usize {
        self.inbound.len()
    }

    /// Queue bytes for sending.
    ///
    /// Never waits: if a write is already in flight the bytes are coalesced
    /// and flushed after it, in enqueue order.
    pub fn write(&self, bytes: Bytes) -> Result<()> {
        match (&self.writer, self.state) {
            (Some(writer), TransportState::Open) => writer.send(bytes),
            _ => Err(WirelinkError::ConnectionClosed),
        }
    }

    /// Queue one length-prefixed frame.
    pub fn write_frame(&self, payload: &[u8]) -> Result<()> {
        self.write(build_frame(payload)?)
    }

    /// Handle to this connection's write queue, while open.
    pub fn writer_handle(&self) -> Option<WriterHandle> {
        self.writer.clone()
    }

    /// Close the transport.
    ///
    /// Cancels the receive loop and any queued writes, clears the inbound
    /// buffer and queues exactly one [`Notice::Disconnected`]. Calling it on
    /// a closed transport is a no-op.
    pub fn close(&mut self) {
        if !self.is_open() {
            return;
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.writer = None;
        self.inbound.clear();
        self.epoch += 1;
        self.state = TransportState::Closed;
        self.notices.push_back(Notice::Disconnected);

        tracing::debug!(conn = %self.id, "transport closed");
    }

    /// Peer address as `ip:port`; `None` unless known from an open socket.
    pub fn origin(&self) -> Option<String> {
        self.peer_addr.map(|addr| addr.to_string())
    }

    /// Next queued notice, oldest first.
    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notices.pop_front()
    }
}

impl ByteSource for ByteTransport {
    fn available_bytes(&self) -> usize {
        self.inbound.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        ByteTransport::read(self, buf)
    }

    fn read_bytes(&mut self, n: usize) -> Bytes {
        self.inbound.read_bytes(n)
    }
}

impl Drop for ByteTransport {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Receive loop: one read per completion into a reusable scratch buffer,
/// re-armed until EOF, error, or the owner goes away.
async fn receive_loop<R>(
    mut reader: R,
    conn: ConnectionId,
    epoch: u64,
    events: EventSender,
    buffer_size: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut scratch = vec![0u8; buffer_size.max(1)];

    loop {
        let kind = match reader.read(&mut scratch).await {
            Ok(0) => IoEventKind::Eof,
            Ok(n) => IoEventKind::Data(Bytes::copy_from_slice(&scratch[..n])),
            Err(e) => IoEventKind::Failed(e),
        };

        let rearm = matches!(kind, IoEventKind::Data(_));
        if events.send(IoEvent { conn, epoch, kind }).is_err() || !rearm {
            return;
        }
    }
}

pub(crate) fn into_io_error(error: WirelinkError) -> io::Error {
    match error {
        WirelinkError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}
