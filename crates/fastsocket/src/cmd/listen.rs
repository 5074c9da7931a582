use fastsocket_message::Message;
use fastsocket_peer::{Connection, HandlerError, Server, ServerConfig, WILDCARD_TAG};
use tokio::sync::mpsc;
use tracing::info;

use crate::cmd::{shutdown_signal, ListenArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_message, Origin, OutputFormat};

struct Received {
    message: Message,
    peer: String,
    path: Option<String>,
}

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let server = Server::with_config(ServerConfig {
        bind_addr: args.addr.clone(),
        ..ServerConfig::default()
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    server.on_message(WILDCARD_TAG, move |message: Message, connection: Connection| {
        let received = Received {
            message,
            peer: connection.peer().to_string(),
            path: connection.path().map(str::to_string),
        };
        let _ = tx.send(received);
        async { Ok::<(), HandlerError>(()) }
    });

    let handle = server
        .start()
        .await
        .map_err(|err| peer_error("bind failed", err))?;
    info!(url = %handle.url(), "listening");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut printed = 0usize;

    loop {
        let received = tokio::select! {
            signal = &mut shutdown => {
                signal?;
                break;
            }
            received = rx.recv() => match received {
                Some(received) => received,
                None => break,
            },
        };

        if let Some(types) = &args.types {
            if !types.iter().any(|kind| kind == received.message.kind()) {
                continue;
            }
        }

        let origin = Origin {
            peer: &received.peer,
            path: received.path.as_deref(),
        };
        print_message(&received.message, &origin, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    handle.stop().await;
    Ok(SUCCESS)
}
