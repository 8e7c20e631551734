//! Server side: accept loop, per-connection framing and dispatch.
//!
//! One reactor task owns the listener, every accepted connection, the
//! dispatcher and the handler. Socket tasks report completions back to it,
//! so handler hooks and the dispatcher never run concurrently.
//!
//! For each complete inbound frame the reactor runs
//! `before_process(conn)` → `dispatcher.process(handler, payload)` →
//! `after_process()` and, if the dispatcher produced a reply, writes it back
//! as one frame.
//!
//! # Example
//!
//! ```no_run
//! use wirelink::dispatch::{Fault, Router};
//! use wirelink::session::SessionRegistry;
//! use wirelink::server::serve;
//!
//! # async fn run() -> wirelink::Result<()> {
//! let router = Router::new().method("add", |_: &mut SessionRegistry, (a, b): (i32, i32)| {
//!     Ok::<_, Fault>(a + b)
//! });
//!
//! let server = serve(router, SessionRegistry::new(), "127.0.0.1:9090".parse().unwrap()).await?;
//! println!("listening on {}", server.local_addr());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::dispatch::{Dispatcher, Peer};
use crate::error::{Result, WirelinkError};
use crate::protocol::FrameDecoder;
use crate::session::SessionRegistry;
use crate::transport::{
    ByteTransport, ConnectionId, DisconnectReason, EventSender, IoEvent, Notice, TransportConfig,
};

/// Connection lifecycle hooks, called on the server reactor.
///
/// Every method has a no-op default. Errors returned from
/// `on_client_connected` or `before_process` are logged and close the
/// offending connection; they never stop the server.
pub trait ServerHandler {
    /// A connection was accepted. `peer` can be kept to call the client.
    fn on_client_connected(&mut self, _id: ConnectionId, _peer: Peer) -> Result<()> {
        Ok(())
    }

    /// A connection that was accepted by `on_client_connected` went away.
    fn on_client_disconnected(
        &mut self,
        _id: ConnectionId,
        _reason: &DisconnectReason,
    ) -> Result<()> {
        Ok(())
    }

    /// A frame from `id` is about to be dispatched.
    fn before_process(&mut self, _id: ConnectionId) -> Result<()> {
        Ok(())
    }

    /// The frame passed to the last `before_process` was dispatched.
    fn after_process(&mut self) {}

    /// Transport or framing error on `id`. The connection closes right after.
    fn on_error(&mut self, _id: ConnectionId, _error: &io::Error) {}

    fn on_connected(&mut self, _id: ConnectionId) {}

    fn on_disconnected(&mut self, _id: ConnectionId) {}
}

impl ServerHandler for () {}

impl<T: Default> ServerHandler for SessionRegistry<T> {
    fn on_client_connected(&mut self, id: ConnectionId, peer: Peer) -> Result<()> {
        Ok(SessionRegistry::on_client_connected(self, id, peer)?)
    }

    fn on_client_disconnected(
        &mut self,
        id: ConnectionId,
        reason: &DisconnectReason,
    ) -> Result<()> {
        SessionRegistry::on_client_disconnected(self, id, reason)?;
        Ok(())
    }

    fn before_process(&mut self, id: ConnectionId) -> Result<()> {
        Ok(SessionRegistry::before_process(self, id)?)
    }

    fn after_process(&mut self) {
        SessionRegistry::after_process(self)
    }
}

/// Bind a listener on `addr` and start serving.
pub async fn serve<D, H>(dispatcher: D, handler: H, addr: SocketAddr) -> Result<ServerHandle<D, H>>
where
    D: Dispatcher<H> + Send + 'static,
    H: ServerHandler + Send + 'static,
{
    ServerBuilder::new().bind(addr).serve(dispatcher, handler).await
}

/// Builder for a server.
#[derive(Debug, Clone)]
pub struct ServerBuilder {
    bind: SocketAddr,
    config: TransportConfig,
}

impl ServerBuilder {
    /// Listen on all IPv4 interfaces, on an ephemeral port.
    pub fn new() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            config: TransportConfig::default(),
        }
    }

    /// Listen on `port` on all IPv4 interfaces.
    pub fn port(mut self, port: u16) -> Self {
        self.bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        self
    }

    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind = addr;
        self
    }

    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_frame_size(mut self, max: u32) -> Self {
        self.config.max_frame_size = max;
        self
    }

    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.config.receive_buffer_size = size;
        self
    }

    /// Bind the listener and spawn the reactor task.
    pub async fn serve<D, H>(self, dispatcher: D, handler: H) -> Result<ServerHandle<D, H>>
    where
        D: Dispatcher<H> + Send + 'static,
        H: ServerHandler + Send + 'static,
    {
        let reactor = Handle::try_current()?;
        let listener = TcpListener::bind(self.bind).await?;
        let local_addr = listener.local_addr()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tracing::info!(addr = %local_addr, "server listening");

        let server = Reactor {
            listener,
            config: self.config,
            reactor: reactor.clone(),
            events_tx,
            events_rx,
            connections: HashMap::new(),
            dispatcher,
            handler,
        };
        let task = reactor.spawn(server.run(shutdown_rx));

        Ok(ServerHandle {
            local_addr,
            shutdown: Some(shutdown_tx),
            task,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running server.
///
/// Dropping the handle shuts the server down the same way
/// [`shutdown`](Self::shutdown) does, without waiting for it.
pub struct ServerHandle<D, H> {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<(D, H)>,
}

impl<D, H> ServerHandle<D, H> {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close every connection (running the disconnect
    /// hooks) and hand back the dispatcher and handler.
    pub async fn shutdown(mut self) -> Result<(D, H)> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.task)
            .await
            .map_err(|e| WirelinkError::Io(io::Error::new(io::ErrorKind::Other, e)))
    }

    /// Kill the reactor without running any hooks.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Pause after an accept error that is not about a single connection.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long to wait before accepting again after `error`.
///
/// Errors tied to one incoming connection are retried at once. Anything
/// else (running out of file descriptors, for one) would fail again on the
/// next call, so the loop backs off instead of spinning.
fn accept_retry_delay(error: &io::Error) -> Duration {
    match error.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => Duration::ZERO,
        _ => ACCEPT_BACKOFF,
    }
}

struct ServerConnection {
    transport: ByteTransport,
    decoder: FrameDecoder,
    /// Accepted by `on_client_connected`; only then is the disconnect hook due.
    registered: bool,
    last_error: Option<io::Error>,
}

struct Reactor<D, H> {
    listener: TcpListener,
    config: TransportConfig,
    reactor: Handle,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<IoEvent>,
    connections: HashMap<ConnectionId, ServerConnection>,
    dispatcher: D,
    handler: H,
}

impl<D, H> Reactor<D, H>
where
    D: Dispatcher<H>,
    H: ServerHandler,
{
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> (D, H) {
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr),
                    Err(e) => {
                        let delay = accept_retry_delay(&e);
                        tracing::error!(error = %e, retry_in = ?delay, "accept failed");
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }

        tracing::info!(connections = self.connections.len(), "server shutting down");
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.close(id);
            self.drain_notices(id);
        }

        (self.dispatcher, self.handler)
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = ConnectionId::next();
        let mut transport = ByteTransport::new(
            id,
            self.config.clone(),
            self.reactor.clone(),
            self.events_tx.clone(),
        );
        if let Err(e) = transport.open(stream) {
            tracing::error!(conn = %id, %addr, error = %e, "failed to open accepted socket");
            return;
        }
        let Some(writer) = transport.writer_handle() else {
            return;
        };

        tracing::debug!(conn = %id, %addr, "accepted");

        let peer = Peer::new(id, writer, transport.origin());
        let registered = match self.handler.on_client_connected(id, peer) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(conn = %id, error = %e, "on_client_connected failed, closing");
                transport.close();
                false
            }
        };

        self.connections.insert(
            id,
            ServerConnection {
                transport,
                decoder: FrameDecoder::with_max_frame_size(self.config.max_frame_size),
                registered,
                last_error: None,
            },
        );
        self.drain_notices(id);
    }

    fn handle_event(&mut self, event: IoEvent) {
        let Some(conn) = self.connections.get_mut(&event.conn) else {
            return;
        };
        conn.transport.handle_event(event.epoch, event.kind);

        self.process_frames(event.conn);
        self.drain_notices(event.conn);
    }

    /// Dispatch every complete frame buffered on `id`.
    fn process_frames(&mut self, id: ConnectionId) {
        let Self {
            connections,
            dispatcher,
            handler,
            ..
        } = self;

        while let Some(conn) = connections.get_mut(&id) {
            if !conn.transport.is_open() {
                return;
            }

            let frame = match conn.decoder.next_frame(&mut conn.transport) {
                Ok(Some(frame)) => frame,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(conn = %id, error = %e, "protocol error");
                    conn.transport
                        .fail(io::Error::new(io::ErrorKind::InvalidData, e.to_string()));
                    return;
                }
            };

            if let Err(e) = handler.before_process(id) {
                tracing::error!(conn = %id, error = %e, "before_process failed, closing");
                conn.transport.close();
                return;
            }
            let reply = dispatcher.process(handler, frame.into_payload());
            handler.after_process();

            if let Some(reply) = reply {
                if let Err(e) = conn.transport.write_frame(&reply) {
                    tracing::debug!(conn = %id, error = %e, "reply not sent");
                }
            }
        }
    }

    /// Turn queued transport notices of `id` into handler calls.
    fn drain_notices(&mut self, id: ConnectionId) {
        loop {
            let Some(conn) = self.connections.get_mut(&id) else {
                return;
            };
            let Some(notice) = conn.transport.take_notice() else {
                return;
            };

            match notice {
                Notice::Connected => self.handler.on_connected(id),
                Notice::Error(e) => {
                    self.handler.on_error(id, &e);
                    conn.last_error = Some(e);
                }
                Notice::Disconnected => {
                    let Some(conn) = self.connections.remove(&id) else {
                        return;
                    };
                    self.handler.on_disconnected(id);

                    if conn.registered {
                        let reason = DisconnectReason::from_last_error(conn.last_error);
                        tracing::debug!(conn = %id, %reason, "disconnected");
                        if let Err(e) = self.handler.on_client_disconnected(id, &reason) {
                            tracing::error!(
                                conn = %id,
                                error = %e,
                                "on_client_disconnected failed"
                            );
                        }
                    }
                    return;
                }
            }
        }
    }

    fn close(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.transport.close();
        }
    }
}
