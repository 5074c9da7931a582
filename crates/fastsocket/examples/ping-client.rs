//! PING/PONG client.
//!
//! Sends one blocking PING and prints the PONG, then a non-blocking message
//! that the server only logs.
//!
//! Run `ping-server` first, then:
//!   cargo run --example ping-client

use std::time::Duration;

use fastsocket::peer::HandlerResult;
use fastsocket::{Client, Connection, Message};
use serde_json::json;

async fn unsolicited(message: Message, _connection: Connection) -> HandlerResult {
    eprintln!("server sent {} {}: {}", message.kind(), message.id(), message.data());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let mut client = Client::new("ws://127.0.0.1:8765");
    client.on("ALL", unsolicited);
    client.connect().await?;

    let ping = Message::new(2, "PING", json!({"data": "Hello"}));
    match client
        .send_msg(&ping, true, Some(Duration::from_secs(5)))
        .await?
    {
        Some(pong) => println!("{} {}: {}", pong.kind(), pong.id(), pong.data()),
        None => eprintln!("no reply within 5s"),
    }

    let note = Message::new(1, "NOTE", json!({"data": "fire and forget"}));
    client.send_msg(&note, false, None).await?;

    client.disconnect().await;
    Ok(())
}
