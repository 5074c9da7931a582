use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

/// Crates whose events follow `--log-level`.
const FASTSOCKET_TARGETS: [&str; 4] = [
    "fastsocket",
    "fastsocket_transport",
    "fastsocket_message",
    "fastsocket_peer",
];

/// WebSocket protocol crates. Their per-frame chatter only shows at `trace`.
const WIRE_TARGETS: [&str; 2] = ["tungstenite", "tokio_tungstenite"];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Per-target filter for `level`.
///
/// fastsocket's own crates log at `level`. The WebSocket crates stay at
/// `warn` unless tracing the wire. Everything else stays at `warn`.
fn log_targets(level: LogLevel) -> Targets {
    let wire = if level == LogLevel::Trace {
        LevelFilter::TRACE
    } else {
        LevelFilter::WARN.min(level.as_filter())
    };
    let other = LevelFilter::WARN.min(level.as_filter());

    let targets = FASTSOCKET_TARGETS
        .iter()
        .fold(Targets::new().with_default(other), |targets, target| {
            targets.with_target(*target, level.as_filter())
        });
    WIRE_TARGETS
        .iter()
        .fold(targets, |targets, target| targets.with_target(*target, wire))
}

/// Install the stderr subscriber. Stdout is reserved for command output.
///
/// At `debug` and above each line names the module that logged it, which
/// tells transport, codec and dispatch events apart.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let show_module = level >= LogLevel::Debug;
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(show_module);
    let registry = tracing_subscriber::registry().with(log_targets(level));

    let _ = match format {
        LogFormat::Text => registry.with(layer).try_init(),
        LogFormat::Json => registry.with(layer.json()).try_init(),
    };
}
