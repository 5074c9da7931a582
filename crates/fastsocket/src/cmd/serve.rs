use fastsocket_message::Message;
use fastsocket_peer::{Connection, HandlerError, HandlerResult, Server, ServerConfig, WILDCARD_TAG};
use serde_json::json;
use tracing::info;

use crate::cmd::{parse_duration, shutdown_signal, ServeArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};

const PING: &str = "PING";
const PONG: &str = "PONG";

pub async fn run(args: ServeArgs) -> CliResult<i32> {
    let handshake_timeout = parse_duration(&args.handshake_timeout)?;
    let server = Server::with_config(ServerConfig {
        bind_addr: args.addr.clone(),
        handshake_timeout,
        ..ServerConfig::default()
    });

    let greeting = args.greeting;
    server.on_message(PING, move |message: Message, connection: Connection| {
        let reply = message.reply(PONG, json!({ "data": greeting.clone() }));
        async move {
            connection.send(&reply).await?;
            Ok::<(), HandlerError>(())
        }
    });
    if args.echo {
        server.on_message(WILDCARD_TAG, echo);
    }

    let handle = server
        .start()
        .await
        .map_err(|err| peer_error("bind failed", err))?;
    info!(url = %handle.url(), echo = args.echo, "serving");

    shutdown_signal().await?;
    info!("shutting down");
    handle.stop().await;
    Ok(SUCCESS)
}

async fn echo(message: Message, connection: Connection) -> HandlerResult {
    if message.kind() == PING {
        return Ok(());
    }
    connection.send(&message).await?;
    Ok(())
}
