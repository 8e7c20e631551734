//! Client builder and pump loop.
//!
//! A [`Client`] owns one [`ClientConnection`], the application handler and a
//! [`Dispatcher`]. Nothing runs in the background on its behalf except the
//! socket tasks: the embedding application drives it, either by calling
//! [`Client::update`] / [`Client::update_one`] from its own loop, or by
//! awaiting [`Client::run`].
//!
//! # Example
//!
//! ```no_run
//! use wirelink::dispatch::{Fault, Router};
//! use wirelink::{Client, ClientHandler};
//!
//! #[derive(Default)]
//! struct Sums {
//!     last: Option<i32>,
//! }
//!
//! impl ClientHandler for Sums {}
//!
//! # async fn run() -> wirelink::Result<()> {
//! let router = Router::new().oneway("on_added", |sums: &mut Sums, sum: i32| {
//!     sums.last = Some(sum);
//!     Ok::<_, Fault>(())
//! });
//!
//! let mut client = Client::connect("localhost", "9090", Sums::default(), router)?;
//! client.run_until(|c| c.link().is_open()).await;
//! client.link().call("add", &(20, 22))?;
//! # Ok(())
//! # }
//! ```

use std::io;

use tokio::runtime::Handle;

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::protocol::Frame;
use crate::transport::{ClientConnection, Notice, TransportConfig};

/// Transport hooks for the client side.
///
/// Each hook gets the connection itself, so a handler can send calls once
/// connected, or schedule a reconnect after a failure.
pub trait ClientHandler {
    fn on_connected(&mut self, _link: &mut ClientConnection) {}

    /// Resolve, connect, read, write or framing failure.
    fn on_error(&mut self, _link: &mut ClientConnection, _error: &io::Error) {}

    /// An open connection closed. Not called for attempts that never opened.
    fn on_disconnected(&mut self, _link: &mut ClientConnection) {}
}

impl ClientHandler for () {}

/// Builder for configuring and creating a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    host: String,
    service: String,
    config: TransportConfig,
    reactor: Option<Handle>,
}

impl ClientBuilder {
    /// Target `host:service`; `service` is a numeric port.
    pub fn new(host: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
            config: TransportConfig::default(),
            reactor: None,
        }
    }

    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.config.receive_buffer_size = size;
        self
    }

    pub fn max_frame_size(mut self, max: u32) -> Self {
        self.config.max_frame_size = max;
        self
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.nodelay = nodelay;
        self
    }

    /// Runtime to spawn socket tasks on. Defaults to the current one.
    pub fn reactor(mut self, reactor: Handle) -> Self {
        self.reactor = Some(reactor);
        self
    }

    /// Create the client and start connecting.
    ///
    /// Fails with [`WirelinkError::NoReactor`](crate::WirelinkError::NoReactor)
    /// when no runtime was given and none is current.
    pub fn build<H, D>(self, handler: H, dispatcher: D) -> Result<Client<H, D>>
    where
        H: ClientHandler,
        D: Dispatcher<H>,
    {
        let reactor = match self.reactor {
            Some(reactor) => reactor,
            None => Handle::try_current()?,
        };

        let mut link = ClientConnection::new(self.host, self.service, self.config, reactor);
        link.open();

        Ok(Client {
            link,
            handler,
            dispatcher,
        })
    }
}

/// A framed client connection with its handler and dispatcher.
pub struct Client<H, D> {
    link: ClientConnection,
    handler: H,
    dispatcher: D,
}

impl<H, D> Client<H, D>
where
    H: ClientHandler,
    D: Dispatcher<H>,
{
    /// Create a client with default settings and start connecting.
    ///
    /// `service` is a decimal port number; see [`ClientConnection::new`].
    pub fn connect(
        host: impl Into<String>,
        service: impl Into<String>,
        handler: H,
        dispatcher: D,
    ) -> Result<Self> {
        ClientBuilder::new(host, service).build(handler, dispatcher)
    }

    pub fn link(&self) -> &ClientConnection {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut ClientConnection {
        &mut self.link
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Process what is ready, without waiting.
    ///
    /// Applies the completions delivered before the call, runs the handler
    /// hooks and dispatches every complete frame they carry. Bytes that
    /// arrive while dispatching wait for the next call, so the time spent
    /// here does not grow with the peer's send rate. Returns the number of
    /// frames dispatched.
    pub fn update(&mut self) -> usize {
        let mut budget = self.link.pending_events();
        let mut processed = 0;
        loop {
            while let Some(frame) = self.link.next_frame() {
                self.dispatch(frame);
                processed += 1;
            }
            self.fire_notices();
            if budget == 0 || !self.link.poll_one() {
                return processed;
            }
            budget -= 1;
        }
    }

    /// Like [`update`](Self::update), but dispatch at most one frame.
    pub fn update_one(&mut self) -> bool {
        let mut budget = self.link.pending_events();
        loop {
            if let Some(frame) = self.link.next_frame() {
                self.dispatch(frame);
                self.fire_notices();
                return true;
            }
            self.fire_notices();
            if budget == 0 || !self.link.poll_one() {
                return false;
            }
            budget -= 1;
        }
    }

    /// Pump until the connection is closed with nothing left to wait for:
    /// no attempt in flight and no reconnect armed.
    pub async fn run(&mut self) {
        loop {
            self.update();
            if self.link.is_idle() {
                return;
            }
            self.link.wait_event().await;
        }
    }

    /// Pump until `done` holds. Returns `false` if the client went idle
    /// first.
    pub async fn run_until<F>(&mut self, mut done: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        loop {
            self.update();
            if done(self) {
                return true;
            }
            if self.link.is_idle() {
                return false;
            }
            self.link.wait_event().await;
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        if let Some(reply) = self.dispatcher.process(&mut self.handler, frame.into_payload()) {
            if let Err(e) = self.link.send(&reply) {
                tracing::debug!(conn = %self.link.id(), error = %e, "reply not sent");
            }
        }
    }

    fn fire_notices(&mut self) {
        while let Some(notice) = self.link.take_notice() {
            match notice {
                Notice::Connected => self.handler.on_connected(&mut self.link),
                Notice::Error(e) => self.handler.on_error(&mut self.link, &e),
                Notice::Disconnected => self.handler.on_disconnected(&mut self.link),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::{Duration, Instant};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Events {
        log: Vec<&'static str>,
        frames: Vec<Bytes>,
        reconnect_once: bool,
    }

    impl ClientHandler for Events {
        fn on_connected(&mut self, _link: &mut ClientConnection) {
            self.log.push("connected");
        }

        fn on_error(&mut self, link: &mut ClientConnection, _error: &io::Error) {
            self.log.push("error");
            if std::mem::take(&mut self.reconnect_once) {
                link.reconnect_in(Duration::from_millis(10));
            }
        }

        fn on_disconnected(&mut self, _link: &mut ClientConnection) {
            self.log.push("disconnected");
        }
    }

    fn collect(events: &mut Events, input: Bytes) -> Option<Bytes> {
        events.frames.push(input);
        None
    }

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn connect<D>(port: u16, events: Events, dispatcher: D) -> Client<Events, D>
    where
        D: Dispatcher<Events>,
    {
        Client::connect("127.0.0.1", port.to_string(), events, dispatcher).unwrap()
    }

    #[tokio::test]
    async fn test_frames_before_peer_close_are_dispatched() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut client = connect(port, Events::default(), collect);

        let (mut peer, _) = listener.accept().await.unwrap();
        peer.write_all(&[0, 0, 0, 1, b'a', 0, 0, 0, 0, 0, 0, 0, 2, b'b'])
            .await
            .unwrap();
        peer.write_all(b"c").await.unwrap();
        drop(peer);

        timeout(WAIT, client.run()).await.unwrap();

        let frames: Vec<&[u8]> = client.handler().frames.iter().map(|f| &f[..]).collect();
        assert_eq!(frames, vec![&b"a"[..], b"", b"bc"]);
        assert_eq!(client.handler().log, vec!["connected", "error", "disconnected"]);
    }

    #[tokio::test]
    async fn test_update_one_dispatches_single_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut client = connect(port, Events::default(), collect);

        let (mut peer, _) = listener.accept().await.unwrap();
        assert!(timeout(WAIT, client.run_until(|c| c.link().is_open())).await.unwrap());

        peer.write_all(&[0, 0, 0, 1, b'x', 0, 0, 0, 1, b'y']).await.unwrap();
        timeout(WAIT, async {
            while client.link().transport().available_bytes() < 10 {
                client.link_mut().wait_event().await;
            }
        })
        .await
        .unwrap();

        assert!(client.update_one());
        assert_eq!(client.handler().frames.len(), 1);
        assert!(client.update_one());
        assert!(!client.update_one());
        assert_eq!(client.handler().frames.len(), 2);
    }

    #[tokio::test]
    async fn test_run_returns_after_failed_connect() {
        let mut client = connect(unused_port().await, Events::default(), collect);

        timeout(WAIT, client.run()).await.unwrap();

        assert_eq!(client.handler().log, vec!["error"]);
        assert!(client.link().is_closed());
    }

    #[tokio::test]
    async fn test_handler_schedules_reconnect() {
        let events = Events {
            reconnect_once: true,
            ..Default::default()
        };
        let mut client = connect(unused_port().await, events, collect);

        timeout(WAIT, client.run()).await.unwrap();

        assert_eq!(client.handler().log, vec!["error", "error"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_update_returns_while_peer_keeps_sending() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let slow = |events: &mut Events, input: Bytes| -> Option<Bytes> {
            std::thread::sleep(Duration::from_millis(3));
            events.frames.push(input);
            None
        };
        let mut client = connect(port, Events::default(), slow);

        let (mut peer, _) = listener.accept().await.unwrap();
        assert!(timeout(WAIT, client.run_until(|c| c.link().is_open())).await.unwrap());

        let feeder = tokio::spawn(async move {
            let deadline = Instant::now() + Duration::from_secs(3);
            while Instant::now() < deadline {
                if peer.write_all(&[0, 0, 0, 1, b'x']).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        let dispatched = client.update();
        let elapsed = started.elapsed();
        feeder.abort();

        assert!(dispatched > 0);
        assert_eq!(dispatched, client.handler().frames.len());
        assert!(
            elapsed < Duration::from_millis(500),
            "update() ran for {:?} and dispatched {} frames",
            elapsed,
            dispatched
        );
    }

    #[test]
    fn test_build_without_runtime_fails() {
        let ignore = |_: &mut (), _: Bytes| -> Option<Bytes> { None };
        let result = Client::connect("127.0.0.1", "1", (), ignore);
        assert!(matches!(result, Err(crate::WirelinkError::NoReactor(_))));
    }
}
