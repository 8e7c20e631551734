//! # wirelink
//!
//! Non-blocking, length-prefixed RPC plumbing on tokio.
//!
//! Every message on the wire is one frame: a 4-byte big-endian payload
//! length followed by the payload. Above the framing sits a pluggable
//! [`Dispatcher`](dispatch::Dispatcher) that maps an inbound payload to an
//! optional reply payload.
//!
//! ## Architecture
//!
//! - **Transport** ([`transport`]): buffered byte transport over one socket,
//!   plus the client connection state machine
//!   (`Closed → Resolving → Connecting → Open`) with delayed reconnects
//! - **Framing** ([`protocol`]): length prefix codec and frame decoder
//! - **Write queue** ([`writer`]): one writer task per connection that
//!   coalesces queued writes
//! - **Dispatch** ([`dispatch`]): the dispatcher boundary and a MessagePack
//!   call router
//! - **Sessions** ([`session`]): per-connection session registry with
//!   broadcast and directed sends
//! - **Server** ([`server`]) and **Client** ([`client`](Client)) drivers
//!
//! Each connection set has exactly one owner (the server reactor task, or the
//! [`Client`] value). Socket tasks only report completions to it, so handler
//! code runs without locks and never concurrently with itself.
//!
//! ## Example
//!
//! ```no_run
//! use wirelink::dispatch::{Fault, Router};
//! use wirelink::server::ServerBuilder;
//! use wirelink::session::SessionRegistry;
//!
//! #[tokio::main]
//! async fn main() -> wirelink::Result<()> {
//!     let router = Router::new().method("add", |_: &mut SessionRegistry, (a, b): (i32, i32)| {
//!         Ok::<_, Fault>(a + b)
//!     });
//!
//!     let server = ServerBuilder::new()
//!         .port(9090)
//!         .serve(router, SessionRegistry::new())
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;
pub mod writer;

mod client;

pub use client::{Client, ClientBuilder, ClientHandler};
pub use dispatch::{Dispatcher, Fault, Peer, Router};
pub use error::{Result, WirelinkError};
pub use server::{serve, ServerBuilder, ServerHandle, ServerHandler};
pub use session::{Session, SessionRegistry};
pub use transport::{ClientConnection, ConnectionId, ConnectionState, DisconnectReason, Notice};
