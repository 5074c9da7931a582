use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::codec::json_type_name;
use crate::error::InvalidMessageId;

/// Correlation identifier carried by every message.
///
/// Integers and strings are both accepted on the wire and round-trip
/// unchanged: an id received as `2` is sent back as `2`, never as `"2"`.
/// Integers keep every digit, so 128-bit ids from older peers survive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Integer id; never a fraction or exponent form.
    Number(Number),
    Text(String),
}

impl MessageId {
    /// Integer id wider than `u64`.
    pub fn from_u128(value: u128) -> Option<Self> {
        Number::from_u128(value).map(Self::Number)
    }

    /// The id as `u64`, if it is an integer in range.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            MessageId::Number(n) => n.as_u64(),
            MessageId::Text(_) => None,
        }
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl TryFrom<Value> for MessageId {
    type Error = InvalidMessageId;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Number(n) if n.as_i128().is_some() || n.as_u128().is_some() => {
                Ok(Self::Number(n))
            }
            Value::String(s) => Ok(Self::Text(s)),
            Value::Number(_) => Err(InvalidMessageId {
                found: "non-integer number",
            }),
            other => Err(InvalidMessageId {
                found: json_type_name(&other),
            }),
        }
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        MessageId::try_from(value).map_err(de::Error::custom)
    }
}

impl From<&MessageId> for Value {
    fn from(id: &MessageId) -> Self {
        match id {
            MessageId::Number(n) => Value::Number(n.clone()),
            MessageId::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{n}"),
            MessageId::Text(s) => write!(f, "{s}"),
        }
    }
}

/// The message envelope: correlation id, type tag, structured payload.
///
/// Messages are immutable once built. Two messages *correlate* when their ids
/// are equal, regardless of tag or payload; see [`Message::correlates_with`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    id: MessageId,
    #[serde(rename = "type")]
    kind: String,
    data: Value,
}

impl Message {
    /// Build a message. A `null` payload is normalized to an empty object.
    ///
    /// Only messages with a non-empty tag and an object payload can be
    /// encoded; see [`encode_message`](crate::encode_message).
    pub fn new(id: impl Into<MessageId>, kind: impl Into<String>, data: Value) -> Self {
        let data = if data.is_null() {
            Value::Object(Map::new())
        } else {
            data
        };
        Self {
            id: id.into(),
            kind: kind.into(),
            data,
        }
    }

    /// Build a reply that carries this message's id.
    pub fn reply(&self, kind: impl Into<String>, data: Value) -> Self {
        Self::new(self.id.clone(), kind, data)
    }

    /// Correlation identifier.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Type tag used for handler routing.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Structured payload.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// True when both messages carry the same correlation id.
    pub fn correlates_with(&self, other: &Message) -> bool {
        self.id == other.id
    }

    /// Consume the message and return `(id, kind, data)`.
    pub fn into_parts(self) -> (MessageId, String, Value) {
        (self.id, self.kind, self.data)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn null_payload_becomes_empty_object() {
        let msg = Message::new(1, "PING", Value::Null);
        assert_eq!(msg.data(), &json!({}));
    }

    #[test]
    fn reply_keeps_the_request_id() {
        let request = Message::new(2, "PING", json!({"data": "Hello"}));
        let reply = request.reply("PONG", json!({"data": "Hello from server!"}));

        assert_eq!(reply.id(), &MessageId::from(2));
        assert_eq!(reply.kind(), "PONG");
        assert!(reply.correlates_with(&request));
        assert_ne!(reply, request);
    }

    #[test]
    fn correlation_ignores_tag_and_payload() {
        let a = Message::new("abc", "A", json!({"x": 1}));
        let b = Message::new("abc", "B", json!({"y": 2}));
        let c = Message::new(7, "A", json!({"x": 1}));

        assert!(a.correlates_with(&b));
        assert!(!a.correlates_with(&c));
    }

    #[test]
    fn id_display_matches_wire_value() {
        assert_eq!(MessageId::from(42).to_string(), "42");
        assert_eq!(MessageId::from("req-1").to_string(), "req-1");
    }

    #[test]
    fn numeric_and_text_ids_are_distinct() {
        assert_ne!(MessageId::from(2), MessageId::from("2"));
    }

    #[test]
    fn wide_and_negative_integer_ids_are_accepted() {
        let wide = MessageId::try_from(json!(215278923415648318740235587412587496321u128))
            .expect("128-bit id should be accepted");
        assert_eq!(wide.to_string(), "215278923415648318740235587412587496321");
        assert_eq!(
            wide,
            MessageId::from_u128(215278923415648318740235587412587496321)
                .expect("128-bit id should be representable")
        );
        assert_eq!(wide.as_u64(), None);

        let negative = MessageId::try_from(json!(-5)).expect("negative id should be accepted");
        assert_eq!(negative.to_string(), "-5");
    }

    #[test]
    fn fractional_and_structured_ids_are_rejected() {
        let err = MessageId::try_from(json!(1.5)).expect_err("fraction should be rejected");
        assert_eq!(err.found, "non-integer number");
        let err = MessageId::try_from(json!(true)).expect_err("boolean should be rejected");
        assert_eq!(err.found, "boolean");
        let err = MessageId::try_from(json!({"a": 1})).expect_err("object should be rejected");
        assert_eq!(err.found, "object");
    }
}
