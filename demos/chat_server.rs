//! Chat server - sessions, names and broadcast.
//!
//! This example demonstrates:
//! - A `ServerHandler` that keeps a `SessionRegistry`
//! - Request/response methods that fail in-band with a `Fault`
//! - Broadcasting to every other session and whispering by name
//!
//! # Running
//!
//! ```sh
//! RUST_LOG=debug cargo run --example chat_server -- 9090
//! cargo run --example chat_client -- localhost 9090
//! ```

use wirelink::dispatch::{Fault, Peer, Router};
use wirelink::server::{ServerBuilder, ServerHandler};
use wirelink::session::SessionRegistry;
use wirelink::{ConnectionId, DisconnectReason};

#[derive(Default)]
struct Chat {
    sessions: SessionRegistry,
}

impl ServerHandler for Chat {
    fn on_client_connected(&mut self, id: ConnectionId, peer: Peer) -> wirelink::Result<()> {
        tracing::info!(conn = %id, origin = ?peer.origin(), "client connected");
        Ok(self.sessions.on_client_connected(id, peer)?)
    }

    fn on_client_disconnected(
        &mut self,
        id: ConnectionId,
        reason: &DisconnectReason,
    ) -> wirelink::Result<()> {
        let session = self.sessions.on_client_disconnected(id, reason)?;
        tracing::info!(conn = %id, %reason, "client left");

        if let Some(name) = session.name() {
            if let Err(e) = self.sessions.broadcast("left", name) {
                tracing::warn!(error = %e, "failed to announce departure");
            }
        }
        Ok(())
    }

    fn before_process(&mut self, id: ConnectionId) -> wirelink::Result<()> {
        Ok(self.sessions.before_process(id)?)
    }

    fn after_process(&mut self) {
        self.sessions.after_process();
    }
}

fn sender_name(chat: &Chat) -> Result<String, Fault> {
    let session = chat.sessions.current()?;
    Ok(session
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| session.id().to_string()))
}

fn router() -> Router<Chat> {
    Router::new()
        .method("login", |chat: &mut Chat, name: String| {
            chat.sessions.claim_name(&name)?;
            chat.sessions.broadcast("joined", &name)?;
            Ok(())
        })
        .method("say", |chat: &mut Chat, text: String| {
            let from = sender_name(chat)?;
            Ok(chat.sessions.broadcast("said", &(from, text))?)
        })
        .method("whisper", |chat: &mut Chat, (to, text): (String, String)| {
            let from = sender_name(chat)?;
            Ok(chat.sessions.send_to(&to, "whispered", &(from, text))?)
        })
        .method("who", |chat: &mut Chat, (): ()| {
            let names: Vec<String> = chat
                .sessions
                .iter()
                .filter_map(|s| s.name().map(str::to_string))
                .collect();
            Ok::<_, Fault>(names)
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let port = std::env::args()
        .nth(1)
        .map(|p| p.parse::<u16>())
        .transpose()?
        .unwrap_or(9090);

    let server = ServerBuilder::new()
        .port(port)
        .serve(router(), Chat::default())
        .await?;
    tracing::info!(addr = %server.local_addr(), "chat server ready, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    let (_, chat) = server.shutdown().await?;
    tracing::info!(remaining = chat.sessions.len(), "stopped");

    Ok(())
}
