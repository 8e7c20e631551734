//! Chat client - interactive terminal client for the chat server.
//!
//! This example demonstrates:
//! - Driving a `Client` from an application loop next to another input
//!   source (stdin)
//! - Handler-owned reconnection policy via `reconnect_in`
//! - Consuming replies with `on_reply` and server pushes with `oneway`
//!
//! Commands: `/nick <name>`, `/w <name> <text>`, `/who`, `/quit`; anything
//! else is said to the room.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use wirelink::dispatch::{Fault, Router};
use wirelink::{Client, ClientConnection, ClientHandler};

const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Terminal {
    nick: Option<String>,
}

impl ClientHandler for Terminal {
    fn on_connected(&mut self, link: &mut ClientConnection) {
        println!("* connected to {}", link.origin().unwrap_or_default());
        if let Some(nick) = &self.nick {
            if let Err(e) = link.call("login", nick) {
                println!("* could not log in again: {}", e);
            }
        }
    }

    fn on_error(&mut self, link: &mut ClientConnection, error: &io::Error) {
        println!("* connection error: {}", error);
        if !link.is_open() {
            link.reconnect_in(RETRY_DELAY);
        }
    }

    fn on_disconnected(&mut self, link: &mut ClientConnection) {
        println!("* disconnected, retrying in {:?}", RETRY_DELAY);
        link.reconnect_in(RETRY_DELAY);
    }
}

fn router() -> Router<Terminal> {
    Router::new()
        .oneway("said", |_: &mut Terminal, (from, text): (String, String)| {
            println!("<{}> {}", from, text);
            Ok(())
        })
        .oneway("whispered", |_: &mut Terminal, (from, text): (String, String)| {
            println!("*{}* {}", from, text);
            Ok(())
        })
        .oneway("joined", |_: &mut Terminal, name: String| {
            println!("* {} joined", name);
            Ok(())
        })
        .oneway("left", |_: &mut Terminal, name: String| {
            println!("* {} left", name);
            Ok(())
        })
        .on_reply("login", |_: &mut Terminal, result: Result<(), Fault>| {
            if let Err(fault) = result {
                println!("* {}", fault);
            }
        })
        .on_reply("say", |_: &mut Terminal, result: Result<usize, Fault>| match result {
            Ok(0) => println!("* nobody is listening"),
            Ok(_) => {}
            Err(fault) => println!("* {}", fault),
        })
        .on_reply("whisper", |_: &mut Terminal, result: Result<(), Fault>| {
            if let Err(fault) = result {
                println!("* {}", fault);
            }
        })
        .on_reply("who", |_: &mut Terminal, result: Result<Vec<String>, Fault>| match result {
            Ok(names) => println!("* online: {}", names.join(", ")),
            Err(fault) => println!("* {}", fault),
        })
}

/// Returns `false` when the user asked to quit.
fn command(client: &mut Client<Terminal, Router<Terminal>>, line: &str) -> wirelink::Result<bool> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(true);
    }

    match line.split_once(' ').unwrap_or((line, "")) {
        ("/quit", _) => return Ok(false),
        ("/who", _) => client.link().call("who", &())?,
        ("/nick", name) if !name.is_empty() => {
            client.handler_mut().nick = Some(name.to_string());
            client.link().call("login", name)?;
        }
        ("/w", rest) => match rest.split_once(' ') {
            Some((to, text)) => client.link().call("whisper", &(to, text))?,
            None => println!("* usage: /w <name> <text>"),
        },
        _ => client.link().call("say", line)?,
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let service = args.next().unwrap_or_else(|| "9090".to_string());

    let mut client = Client::connect(host, service, Terminal::default(), router())?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        client.update();

        let input = tokio::select! {
            line = lines.next_line() => Some(line?),
            _ = client.link_mut().wait_event() => None,
        };

        match input {
            Some(Some(line)) => match command(&mut client, &line) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => println!("* {}", e),
            },
            Some(None) => break,
            None => {}
        }
    }

    client.link_mut().cancel_reconnect();
    client.link_mut().close();
    Ok(())
}
