use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use fastsocket_message::{encode_message, Message};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    id: Value,
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a Value,
    peer: &'a str,
    path: Option<&'a str>,
    timestamp: String,
}

/// Where a printed message came from.
pub struct Origin<'a> {
    pub peer: &'a str,
    pub path: Option<&'a str>,
}

pub fn print_message(message: &Message, origin: &Origin<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                id: Value::from(message.id()),
                kind: message.kind(),
                data: message.data(),
                peer: origin.peer,
                path: origin.path,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "TYPE", "PEER", "DATA"])
                .add_row(vec![
                    message.id().to_string(),
                    message.kind().to_string(),
                    origin.peer.to_string(),
                    message.data().to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let data = serde_json::to_string_pretty(message.data())
                .unwrap_or_else(|_| message.data().to_string());
            println!(
                "id={} type={} peer={}{}\n{}",
                message.id(),
                message.kind(),
                origin.peer,
                origin
                    .path
                    .map(|path| format!(" path=/{path}"))
                    .unwrap_or_default(),
                data
            );
        }
        OutputFormat::Raw => match encode_message(message) {
            Ok(frame) => {
                let mut frame = frame.to_vec();
                frame.push(b'\n');
                print_raw(&frame);
            }
            Err(err) => warn!(id = %message.id(), error = %err, "message has no wire form"),
        },
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
