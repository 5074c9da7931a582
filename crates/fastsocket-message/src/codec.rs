use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::{CodecError, DecodeError, DecodeReason, Result};
use crate::message::{Message, MessageId};

/// Default maximum frame size: 16 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Envelope field carrying the correlation id.
pub const ID_FIELD: &str = "id";
/// Envelope field carrying the type tag.
pub const TYPE_FIELD: &str = "type";
/// Envelope field carrying the payload.
pub const DATA_FIELD: &str = "data";

/// Older peers name the id `uuid` and the tag `code`. Accepted on input only.
const LEGACY_ID_FIELD: &str = "uuid";
const LEGACY_TYPE_FIELD: &str = "code";

/// Encode a message into its JSON wire form.
///
/// Wire format:
/// ```text
/// {"data": {...}, "id": 2 | "abc", "type": "PING"}
/// ```
///
/// Fails for messages no receiver could decode: an empty type tag or a
/// payload that is not an object.
pub fn encode_message(message: &Message) -> Result<Bytes> {
    if message.kind().is_empty() {
        return Err(CodecError::EmptyType);
    }
    if !message.data().is_object() {
        return Err(CodecError::PayloadNotObject(json_type_name(message.data())));
    }

    let mut envelope = Map::new();
    envelope.insert(DATA_FIELD.to_string(), message.data().clone());
    envelope.insert(ID_FIELD.to_string(), Value::from(message.id()));
    envelope.insert(TYPE_FIELD.to_string(), Value::String(message.kind().to_string()));
    Ok(Bytes::from(Value::Object(envelope).to_string()))
}

/// Decode a message from one inbound frame.
pub fn decode_message(
    frame: Bytes,
    max_frame_size: usize,
) -> std::result::Result<Message, DecodeError> {
    if frame.len() > max_frame_size {
        let reason = DecodeReason::FrameTooLarge {
            size: frame.len(),
            max: max_frame_size,
        };
        return Err(DecodeError::new(frame, reason));
    }

    let value: Value = match serde_json::from_slice(&frame) {
        Ok(value) => value,
        Err(err) => return Err(DecodeError::new(frame, DecodeReason::Malformed(err))),
    };
    let mut envelope = match value {
        Value::Object(envelope) => envelope,
        other => {
            let reason = DecodeReason::EnvelopeNotObject(json_type_name(&other));
            return Err(DecodeError::new(frame, reason));
        }
    };

    let kind = match take_field(&mut envelope, TYPE_FIELD, LEGACY_TYPE_FIELD) {
        Some(Value::String(kind)) if !kind.is_empty() => kind,
        None | Some(Value::Null) | Some(Value::String(_)) => {
            return Err(DecodeError::new(frame, DecodeReason::MissingType));
        }
        Some(other) => {
            let reason = DecodeReason::InvalidField {
                field: TYPE_FIELD,
                found: json_type_name(&other),
            };
            return Err(DecodeError::new(frame, reason));
        }
    };
    let id = match take_field(&mut envelope, ID_FIELD, LEGACY_ID_FIELD) {
        None | Some(Value::Null) => {
            return Err(DecodeError::new(frame, DecodeReason::MissingId));
        }
        Some(value) => match MessageId::try_from(value) {
            Ok(id) => id,
            Err(err) => {
                let reason = DecodeReason::InvalidField {
                    field: ID_FIELD,
                    found: err.found,
                };
                return Err(DecodeError::new(frame, reason));
            }
        },
    };
    let data = match envelope.remove(DATA_FIELD) {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::Object(map)) => Value::Object(map),
        Some(other) => {
            let reason = DecodeReason::PayloadNotObject(json_type_name(&other));
            return Err(DecodeError::new(frame, reason));
        }
    };

    Ok(Message::new(id, kind, data))
}

fn take_field(envelope: &mut Map<String, Value>, name: &str, legacy: &str) -> Option<Value> {
    envelope.remove(name).or_else(|| envelope.remove(legacy))
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Configuration for the message codec.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Maximum encoded frame size in bytes, both directions. Default: 16 MiB.
    pub max_frame_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Size-checked encoder/decoder shared by one connection.
#[derive(Debug, Clone, Default)]
pub struct MessageCodec {
    config: CodecConfig,
}

impl MessageCodec {
    /// Create a codec with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with explicit configuration.
    pub fn with_config(config: CodecConfig) -> Self {
        Self { config }
    }

    /// Encode a message, enforcing the maximum frame size.
    pub fn encode(&self, message: &Message) -> Result<Bytes> {
        let frame = encode_message(message)?;
        if frame.len() > self.config.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: frame.len(),
                max: self.config.max_frame_size,
            });
        }
        Ok(frame)
    }

    /// Decode one inbound frame.
    pub fn decode(&self, frame: Bytes) -> std::result::Result<Message, DecodeError> {
        decode_message(frame, self.config.max_frame_size)
    }

    /// Current codec configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn decode(raw: &'static str) -> std::result::Result<Message, DecodeError> {
        decode_message(Bytes::from_static(raw.as_bytes()), DEFAULT_MAX_FRAME_SIZE)
    }

    #[test]
    fn encode_decode_roundtrip_preserves_numeric_id() {
        let msg = Message::new(2, "PING", json!({"data": "Hello"}));
        let frame = encode_message(&msg).unwrap();

        let decoded = decode_message(frame, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.id(), &MessageId::from(2));
    }

    #[test]
    fn text_id_stays_text() {
        let frame = encode_message(&Message::new("2", "PING", json!({}))).unwrap();
        let value: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value["id"], json!("2"));
    }

    #[test]
    fn wire_envelope_uses_id_type_data() {
        let frame = encode_message(&Message::new(1, "PING", json!({"data": "Hello"}))).unwrap();
        let value: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(
            value,
            json!({"id": 1, "type": "PING", "data": {"data": "Hello"}})
        );
    }

    #[test]
    fn decode_accepts_legacy_field_names() {
        let msg = decode(r#"{"uuid": 9, "code": "PONG", "data": {"ok": true}}"#).unwrap();
        assert_eq!(msg.id(), &MessageId::from(9));
        assert_eq!(msg.kind(), "PONG");
        assert_eq!(msg.data(), &json!({"ok": true}));
    }

    #[test]
    fn decode_defaults_missing_data_to_empty_object() {
        let msg = decode(r#"{"id": "a", "type": "PING"}"#).unwrap();
        assert_eq!(msg.data(), &json!({}));
    }

    #[test]
    fn decode_rejects_missing_type() {
        let err = decode(r#"{"id": 1, "data": {}}"#).unwrap_err();
        assert!(matches!(err.reason, DecodeReason::MissingType));
        assert_eq!(err.raw.as_ref(), br#"{"id": 1, "data": {}}"#);
    }

    #[test]
    fn decode_rejects_empty_type() {
        let err = decode(r#"{"id": 1, "type": ""}"#).unwrap_err();
        assert!(matches!(err.reason, DecodeReason::MissingType));
    }

    #[test]
    fn decode_rejects_missing_id() {
        let err = decode(r#"{"type": "PING"}"#).unwrap_err();
        assert!(matches!(err.reason, DecodeReason::MissingId));
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode("\u{1}not json at all").unwrap_err();
        assert!(matches!(err.reason, DecodeReason::Malformed(_)));
    }

    #[test]
    fn decode_rejects_non_object_envelope() {
        let err = decode("[1, \"PING\", {}]").unwrap_err();
        assert!(matches!(err.reason, DecodeReason::EnvelopeNotObject("array")));
    }

    #[test]
    fn decode_rejects_wrongly_typed_id() {
        let err = decode(r#"{"id": true, "type": "PING"}"#).unwrap_err();
        assert!(matches!(
            err.reason,
            DecodeReason::InvalidField {
                field: "id",
                found: "boolean"
            }
        ));

        let err = decode(r#"{"id": 1.5, "type": "PING"}"#).unwrap_err();
        assert!(matches!(err.reason, DecodeReason::InvalidField { field: "id", .. }));
    }

    #[test]
    fn decode_rejects_non_string_type() {
        let err = decode(r#"{"id": 1, "type": 7}"#).unwrap_err();
        assert!(matches!(
            err.reason,
            DecodeReason::InvalidField {
                field: "type",
                found: "number"
            }
        ));
    }

    #[test]
    fn decode_accepts_uuid4_sized_legacy_id() {
        let raw = r#"{"uuid": 215278923415648318740235587412587496321, "code": "PING", "data": {}}"#;
        let msg = decode(raw).unwrap();
        let expected = MessageId::from_u128(215278923415648318740235587412587496321).unwrap();
        assert_eq!(msg.id(), &expected);

        // The reply goes back with every digit intact.
        let reply = encode_message(&msg.reply("PONG", json!({}))).unwrap();
        let value: Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(value["id"].to_string(), "215278923415648318740235587412587496321");
    }

    #[test]
    fn decode_accepts_negative_id() {
        let msg = decode(r#"{"id": -3, "type": "PING"}"#).unwrap();
        assert_eq!(msg.id().to_string(), "-3");
        let frame = encode_message(&msg).unwrap();
        assert_eq!(decode_message(frame, DEFAULT_MAX_FRAME_SIZE).unwrap(), msg);
    }

    #[test]
    fn encode_rejects_what_decode_would_reject() {
        let payloads = [json!("hello"), json!([1, 2]), json!(3), json!(true)];
        for data in payloads {
            let msg = Message::new(1, "NOTE", data);
            assert!(matches!(
                encode_message(&msg),
                Err(CodecError::PayloadNotObject(_))
            ));
        }

        let untagged = Message::new(1, "", json!({}));
        assert!(matches!(encode_message(&untagged), Err(CodecError::EmptyType)));
        assert!(matches!(
            MessageCodec::new().encode(&untagged),
            Err(CodecError::EmptyType)
        ));
    }

    #[test]
    fn every_encodable_message_decodes_to_itself() {
        let codec = MessageCodec::new();
        let messages = [
            Message::new(0, "PING", json!({})),
            Message::new("req-1", "NOTE", json!({"nested": {"list": [1, 2.5, null]}})),
            Message::new(u64::MAX, "MAX", Value::Null),
            Message::new(
                MessageId::from_u128(u128::MAX).unwrap(),
                "WIDE",
                json!({"x": 1}),
            ),
        ];
        for msg in messages {
            let frame = codec.encode(&msg).unwrap();
            assert_eq!(codec.decode(frame).unwrap(), msg);
        }
    }

    #[test]
    fn decode_rejects_non_object_data() {
        let err = decode(r#"{"id": 1, "type": "PING", "data": [1]}"#).unwrap_err();
        assert!(matches!(err.reason, DecodeReason::PayloadNotObject("array")));
    }

    #[test]
    fn decode_rejects_oversized_frame() {
        let err = decode_message(Bytes::from_static(br#"{"id":1,"type":"X"}"#), 4).unwrap_err();
        assert!(matches!(
            err.reason,
            DecodeReason::FrameTooLarge { size: 19, max: 4 }
        ));
    }

    #[test]
    fn codec_rejects_oversized_encode() {
        let codec = MessageCodec::with_config(CodecConfig { max_frame_size: 8 });
        let result = codec.encode(&Message::new(1, "PING", json!({"data": "Hello"})));
        assert!(matches!(result, Err(CodecError::FrameTooLarge { max: 8, .. })));
    }

    #[test]
    fn decode_error_preview_is_bounded() {
        let long = format!("{{\"junk\": \"{}\"", "x".repeat(1000));
        let err = decode_message(Bytes::from(long), DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        let preview = err.preview();
        assert!(preview.ends_with("..."));
        assert!(preview.chars().count() <= 259);
    }
}
