//! Calculator - one server, two calling styles.
//!
//! `add` answers with a reply frame that the client consumes through
//! `on_reply`. `add_push` sends nothing back directly; the server calls
//! `on_added` on the caller's session instead.
//!
//! ```sh
//! cargo run --example calculator
//! ```

use wirelink::dispatch::{Fault, Router};
use wirelink::session::SessionRegistry;
use wirelink::{Client, ClientConnection, ClientHandler, ServerBuilder};

#[derive(Default)]
struct Sums {
    replied: Option<i64>,
    pushed: Option<i64>,
}

impl ClientHandler for Sums {
    fn on_connected(&mut self, link: &mut ClientConnection) {
        for method in ["add", "add_push"] {
            if let Err(e) = link.call(method, &(20i64, 22i64)) {
                tracing::error!(method, error = %e, "call failed");
            }
        }
    }
}

fn server_router() -> Router<SessionRegistry> {
    Router::new()
        .method("add", |_: &mut SessionRegistry, (a, b): (i64, i64)| {
            a.checked_add(b).ok_or_else(|| Fault::application("overflow"))
        })
        .oneway("add_push", |sessions: &mut SessionRegistry, (a, b): (i64, i64)| {
            let sum = a.checked_add(b).ok_or_else(|| Fault::application("overflow"))?;
            sessions.current()?.call("on_added", &sum)?;
            Ok(())
        })
}

fn client_router() -> Router<Sums> {
    Router::new()
        .on_reply("add", |sums: &mut Sums, result: Result<i64, Fault>| match result {
            Ok(sum) => sums.replied = Some(sum),
            Err(fault) => tracing::warn!(%fault, "add failed"),
        })
        .oneway("on_added", |sums: &mut Sums, sum: i64| {
            sums.pushed = Some(sum);
            Ok(())
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

    let server = ServerBuilder::new()
        .bind("127.0.0.1:0".parse()?)
        .serve(server_router(), SessionRegistry::new())
        .await?;
    let port = server.local_addr().port().to_string();
    tracing::info!(addr = %server.local_addr(), "calculator listening");

    let mut client = Client::connect("127.0.0.1", port, Sums::default(), client_router())?;
    let done = client
        .run_until(|c| c.handler().replied.is_some() && c.handler().pushed.is_some())
        .await;

    if done {
        let sums = client.handler();
        println!("add      -> {:?}", sums.replied);
        println!("add_push -> {:?}", sums.pushed);
    } else {
        println!("connection closed before both answers arrived");
    }

    client.link_mut().close();
    server.shutdown().await?;
    Ok(())
}
