use fastsocket_message::{Message, MessageId};
use fastsocket_peer::{Client, ClientConfig};
use serde_json::{json, Map, Number, Value};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_message, Origin, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let connect_timeout = parse_duration(&args.connect_timeout)?;
    let data = resolve_data(&args)?;
    let message = Message::new(parse_id(&args.id), args.kind.clone(), data);

    let mut client = Client::with_config(
        args.url.clone(),
        ClientConfig {
            connect_timeout,
            ..ClientConfig::default()
        },
    );
    client
        .connect()
        .await
        .map_err(|err| peer_error("connect failed", err))?;

    let sent = client.send_msg(&message, args.wait, Some(timeout)).await;
    client.disconnect().await;

    match sent.map_err(|err| peer_error("send failed", err))? {
        Some(reply) => {
            let origin = Origin {
                peer: &args.url,
                path: None,
            };
            print_message(&reply, &origin, format);
            Ok(SUCCESS)
        }
        None if args.wait => Err(CliError::new(
            TIMEOUT,
            format!(
                "no reply to message {} within {}",
                message.id(),
                args.timeout
            ),
        )),
        None => Ok(SUCCESS),
    }
}

/// Integers of any width become numeric ids; anything else is sent as text.
fn parse_id(raw: &str) -> MessageId {
    serde_json::from_str::<Number>(raw)
        .ok()
        .and_then(|number| MessageId::try_from(Value::Number(number)).ok())
        .unwrap_or_else(|| MessageId::from(raw))
}

fn resolve_data(args: &SendArgs) -> CliResult<Value> {
    if let Some(json) = &args.json {
        let value: Value = serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return match value {
            Value::Object(_) => Ok(value),
            Value::Null => Ok(Value::Object(Map::new())),
            _ => Err(CliError::new(USAGE, "--json must be a JSON object")),
        };
    }
    if let Some(text) = &args.data {
        return Ok(json!({ "data": text }));
    }
    Ok(Value::Object(Map::new()))
}
