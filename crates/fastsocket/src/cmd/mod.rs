use std::time::Duration;

use clap::{Args, Subcommand};
use fastsocket_peer::DEFAULT_BIND_ADDR;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod serve;
pub mod version;

const DEFAULT_URL: &str = "ws://127.0.0.1:8765";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a server that answers PING with PONG.
    Serve(ServeArgs),
    /// Send a single message, optionally waiting for its reply.
    Send(SendArgs),
    /// Run a server and print every message it receives.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Listen(args) => listen::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "FASTSOCKET_ADDR", default_value = DEFAULT_BIND_ADDR)]
    pub addr: String,
    /// Text carried in the PONG payload.
    #[arg(long, default_value = "Hello from server!")]
    pub greeting: String,
    /// Echo every non-PING message back to its sender.
    #[arg(long)]
    pub echo: bool,
    /// Maximum time for a client's WebSocket handshake (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub handshake_timeout: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Server URL.
    #[arg(env = "FASTSOCKET_URL", default_value = DEFAULT_URL)]
    pub url: String,
    /// Message type tag.
    #[arg(long = "type", short = 't', default_value = "PING")]
    pub kind: String,
    /// Correlation id; digits are sent as a number, anything else as a string.
    #[arg(long, default_value = "1")]
    pub id: String,
    /// JSON object payload.
    #[arg(long, conflicts_with = "data")]
    pub json: Option<String>,
    /// Text payload, sent as {"data": TEXT}.
    #[arg(long, conflicts_with = "json")]
    pub data: Option<String>,
    /// Wait for the reply and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
    /// Maximum time to connect (e.g. 5s, 500ms).
    #[arg(long, default_value = "10s")]
    pub connect_timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to listen on.
    #[arg(long, env = "FASTSOCKET_ADDR", default_value = DEFAULT_BIND_ADDR)]
    pub addr: String,
    /// Only print these type tags (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub types: Option<Vec<String>>,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Resolves on Ctrl-C.
pub(crate) async fn shutdown_signal() -> CliResult<()> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}
