//! PING/PONG server.
//!
//! Answers every `PING` with a `PONG` carrying the same id, and logs
//! every other message it receives.
//!
//! Run with:
//!   cargo run --example ping-server
//!
//! In another terminal:
//!   cargo run --example ping-client

use fastsocket::peer::{HandlerResult, ServerConfig, WILDCARD_TAG};
use fastsocket::{Connection, Message, Server};
use serde_json::json;

async fn ping(message: Message, connection: Connection) -> HandlerResult {
    eprintln!("PING {} from {}: {}", message.id(), connection.peer(), message.data());
    connection
        .send(&message.reply("PONG", json!({"data": "Hello from server!"})))
        .await?;
    Ok(())
}

async fn log_all(message: Message, connection: Connection) -> HandlerResult {
    eprintln!(
        "{} {} on /{}",
        message.kind(),
        message.id(),
        connection.path().unwrap_or_default()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let server = Server::with_config(ServerConfig {
        bind_addr: "127.0.0.1:8765".to_string(),
        ..ServerConfig::default()
    });
    server.on_message("PING", ping);
    server.on_message(WILDCARD_TAG, log_all);

    let handle = server.start().await?;
    eprintln!("Listening on {}", handle.url());

    tokio::signal::ctrl_c().await?;
    handle.stop().await;
    Ok(())
}
