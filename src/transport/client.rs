//! Client connection lifecycle.
//!
//! ```text
//!            open()                resolved              connected
//! Closed ───────────► Resolving ───────────► Connecting ───────────► Open
//!   ▲                     │                      │                    │
//!   └─────────────────────┴──────────────────────┴────────────────────┘
//!        failure / close()                        I/O error / close()
//! ```
//!
//! Resolution and connection run in one attempt task per `open()`. The task
//! reports back through a control channel; every report carries the attempt
//! number it belongs to, and reports for an attempt that was superseded by
//! `close()` or `connect_to()` are discarded.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::net::{lookup_host, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{ByteTransport, ConnectionId, IoEvent, Notice, TransportConfig};
use crate::dispatch::encode_call;
use crate::error::Result;
use crate::protocol::{Frame, FrameDecoder};

/// Lifecycle state of a [`ClientConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Resolving,
    Connecting,
    Open,
}

#[derive(Debug)]
enum Control {
    Resolved {
        attempt: u64,
        result: io::Result<Vec<SocketAddr>>,
    },
    Connected {
        attempt: u64,
        result: io::Result<TcpStream>,
    },
    ReconnectDue {
        generation: u64,
    },
}

/// Client side of one framed connection.
///
/// The value is the single owner of its transport: completions from the
/// socket tasks and the attempt/timer tasks are applied by
/// [`poll_events`](Self::poll_events) or [`wait_event`](Self::wait_event),
/// and the resulting [`Notice`]s are drained with
/// [`take_notice`](Self::take_notice).
pub struct ClientConnection {
    host: String,
    service: String,
    state: ConnectionState,
    transport: ByteTransport,
    decoder: FrameDecoder,
    reactor: Handle,
    io_rx: mpsc::UnboundedReceiver<IoEvent>,
    ctl_tx: mpsc::UnboundedSender<Control>,
    ctl_rx: mpsc::UnboundedReceiver<Control>,
    attempt: u64,
    attempt_task: Option<JoinHandle<()>>,
    reconnect_generation: u64,
    reconnect_task: Option<JoinHandle<()>>,
    notices: VecDeque<Notice>,
}

impl ClientConnection {
    /// Create a closed connection for `host:service`.
    ///
    /// `service` must be a decimal port number such as `"9090"`. Named
    /// services (`"http"`) are not looked up: the attempt fails with
    /// [`io::ErrorKind::InvalidInput`], reported as an error notice.
    ///
    /// Nothing happens until [`open`](Self::open).
    pub fn new(
        host: impl Into<String>,
        service: impl Into<String>,
        config: TransportConfig,
        reactor: Handle,
    ) -> Self {
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let decoder = FrameDecoder::with_max_frame_size(config.max_frame_size);
        let transport = ByteTransport::new(ConnectionId::next(), config, reactor.clone(), io_tx);

        Self {
            host: host.into(),
            service: service.into(),
            state: ConnectionState::Closed,
            transport,
            decoder,
            reactor,
            io_rx,
            ctl_tx,
            ctl_rx,
            attempt: 0,
            attempt_task: None,
            reconnect_generation: 0,
            reconnect_task: None,
            notices: VecDeque::new(),
        }
    }

    /// Identity of the underlying transport.
    pub fn id(&self) -> ConnectionId {
        self.transport.id()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Configured `(host, service)`.
    pub fn endpoint(&self) -> (&str, &str) {
        (&self.host, &self.service)
    }

    /// Peer address as `ip:port` while open.
    pub fn origin(&self) -> Option<String> {
        if self.is_open() {
            self.transport.origin()
        } else {
            None
        }
    }

    /// Underlying byte transport.
    pub fn transport(&self) -> &ByteTransport {
        &self.transport
    }

    /// Start resolving and connecting.
    ///
    /// Only valid from `Closed`; returns `false` and does nothing otherwise.
    pub fn open(&mut self) -> bool {
        if self.state != ConnectionState::Closed {
            return false;
        }

        self.attempt += 1;
        self.state = ConnectionState::Resolving;

        let attempt = self.attempt;
        let host = self.host.clone();
        let service = self.service.clone();
        let tx = self.ctl_tx.clone();

        tracing::debug!(conn = %self.id(), host = %host, service = %service, "resolving");

        let task = self.reactor.spawn(async move {
            let addrs = match resolve(&host, &service).await {
                Ok(addrs) => addrs,
                Err(e) => {
                    let _ = tx.send(Control::Resolved {
                        attempt,
                        result: Err(e),
                    });
                    return;
                }
            };

            let _ = tx.send(Control::Resolved {
                attempt,
                result: Ok(addrs.clone()),
            });
            let result = connect_any(&addrs).await;
            let _ = tx.send(Control::Connected { attempt, result });
        });
        self.attempt_task = Some(task);

        true
    }

    /// Close the connection.
    ///
    /// From `Open` this queues [`Notice::Disconnected`]. A pending resolve or
    /// connect is abandoned silently. Pending reconnect timers stay armed.
    pub fn close(&mut self) {
        self.attempt += 1;
        if let Some(task) = self.attempt_task.take() {
            task.abort();
        }
        self.transport.close();
        self.sync_transport();
        self.state = ConnectionState::Closed;
    }

    /// Close, switch to a new endpoint and start connecting to it.
    pub fn connect_to(&mut self, host: impl Into<String>, service: impl Into<String>) {
        self.close();
        self.host = host.into();
        self.service = service.into();
        self.open();
    }

    /// Arm a one-shot timer that calls [`open`](Self::open) after `delay`.
    ///
    /// Replaces any timer armed earlier. When it fires, the timer only acts
    /// if the connection is still `Closed`.
    pub fn reconnect_in(&mut self, delay: Duration) {
        self.cancel_reconnect();

        let generation = self.reconnect_generation;
        let tx = self.ctl_tx.clone();
        self.reconnect_task = Some(self.reactor.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Control::ReconnectDue { generation });
        }));

        tracing::debug!(conn = %self.id(), ?delay, "reconnect armed");
    }

    /// Drop the pending reconnect timer, if any.
    pub fn cancel_reconnect(&mut self) {
        self.reconnect_generation += 1;
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }

    /// Whether a reconnect timer is armed.
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_task.is_some()
    }

    /// Closed with nothing in flight: no attempt and no reconnect timer.
    pub fn is_idle(&self) -> bool {
        self.is_closed() && self.attempt_task.is_none() && self.reconnect_task.is_none()
    }

    /// Send one raw frame.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        self.transport.write_frame(payload)
    }

    /// Send a MessagePack call frame.
    pub fn call<A>(&self, method: &str, args: &A) -> Result<()>
    where
        A: Serialize + ?Sized,
    {
        self.send(&encode_call(method, args)?)
    }

    /// Apply one completion if one was delivered, without waiting.
    ///
    /// Closing drops buffered inbound bytes, so callers that frame the input
    /// should drain complete frames between calls.
    pub fn poll_one(&mut self) -> bool {
        if let Ok(event) = self.ctl_rx.try_recv() {
            self.apply_control(event);
            return true;
        }
        if let Ok(event) = self.io_rx.try_recv() {
            self.apply_io(event);
            return true;
        }
        false
    }

    /// Completions delivered and not yet applied.
    pub fn pending_events(&self) -> usize {
        self.ctl_rx.len() + self.io_rx.len()
    }

    /// Apply the completions already delivered when called, without
    /// waiting. Completions arriving meanwhile are left for the next call.
    ///
    /// Returns the number of completions applied.
    pub fn poll_events(&mut self) -> usize {
        let budget = self.pending_events();
        let mut applied = 0;
        while applied < budget && self.poll_one() {
            applied += 1;
        }
        applied
    }

    /// Wait for the next completion and apply it.
    pub async fn wait_event(&mut self) {
        tokio::select! {
            Some(event) = self.ctl_rx.recv() => self.apply_control(event),
            Some(event) = self.io_rx.recv() => self.apply_io(event),
        }
    }

    /// Next complete inbound frame, if one is buffered.
    ///
    /// A framing violation closes the connection with an
    /// [`io::ErrorKind::InvalidData`] error.
    pub fn next_frame(&mut self) -> Option<Frame> {
        if !self.is_open() {
            return None;
        }

        match self.decoder.next_frame(&mut self.transport) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(conn = %self.id(), error = %e, "protocol error");
                self.transport
                    .fail(io::Error::new(io::ErrorKind::InvalidData, e.to_string()));
                self.sync_transport();
                None
            }
        }
    }

    /// Next queued notice, oldest first.
    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notices.pop_front()
    }

    fn apply_io(&mut self, event: IoEvent) {
        if event.conn != self.transport.id() {
            return;
        }
        self.transport.handle_event(event.epoch, event.kind);
        self.sync_transport();
    }

    fn apply_control(&mut self, event: Control) {
        match event {
            Control::Resolved { attempt, result } => {
                if attempt != self.attempt || self.state != ConnectionState::Resolving {
                    return;
                }
                match result {
                    Ok(addrs) => {
                        tracing::debug!(conn = %self.id(), ?addrs, "connecting");
                        self.state = ConnectionState::Connecting;
                    }
                    Err(e) => self.attempt_failed(e),
                }
            }
            Control::Connected { attempt, result } => {
                if attempt != self.attempt || self.state != ConnectionState::Connecting {
                    return;
                }
                self.attempt_task = None;
                let opened = result.and_then(|stream| {
                    self.transport
                        .open(stream)
                        .map_err(super::byte_transport::into_io_error)
                });
                match opened {
                    Ok(()) => {
                        self.decoder.reset();
                        self.state = ConnectionState::Open;
                        self.sync_transport();
                    }
                    Err(e) => self.attempt_failed(e),
                }
            }
            Control::ReconnectDue { generation } => {
                if generation != self.reconnect_generation {
                    return;
                }
                self.reconnect_task = None;
                if self.state == ConnectionState::Closed {
                    self.open();
                } else {
                    tracing::debug!(
                        conn = %self.id(),
                        state = ?self.state,
                        "reconnect timer ignored"
                    );
                }
            }
        }
    }

    fn attempt_failed(&mut self, error: io::Error) {
        tracing::debug!(conn = %self.id(), error = %error, "connect attempt failed");
        self.attempt_task = None;
        self.state = ConnectionState::Closed;
        self.notices.push_back(Notice::Error(error));
    }

    /// Move transport notices into our queue and follow its open/closed state.
    fn sync_transport(&mut self) {
        while let Some(notice) = self.transport.take_notice() {
            self.notices.push_back(notice);
        }
        if self.state == ConnectionState::Open && !self.transport.is_open() {
            self.state = ConnectionState::Closed;
            self.decoder.reset();
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        if let Some(task) = self.attempt_task.take() {
            task.abort();
        }
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }
}

async fn resolve(host: &str, service: &str) -> io::Result<Vec<SocketAddr>> {
    let port: u16 = service.parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid service '{}': expected a port number", service),
        )
    })?;

    let addrs: Vec<SocketAddr> = lookup_host((host, port)).await?.collect();
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses for host '{}'", host),
        ));
    }
    Ok(addrs)
}

/// Try every address in order; the last failure wins.
async fn connect_any(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses to connect to")))
}
