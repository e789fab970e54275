//! Wire envelope codec.
//!
//! Every frame on the socket is a JSON object of the form
//!
//! ```json
//! {"type": "event", "payload": {"objectId": 42, "instanceId": 0, "name": "...", "data": {}}}
//! ```
//!
//! | Tag | Variant | Direction |
//! |---|---|---|
//! | `event` | [`Message::Event`] | both |
//! | `action` | [`Message::Action`] | both |
//! | `def` | [`Message::Definition`] | both |
//! | `sub` | [`Message::Subscription`] | client → hub only |
//! | `unsub` | [`Message::Unsubscription`] | client → hub only |
//!
//! Decoding happens in two stages: the outer envelope is parsed first, then
//! the payload is populated into the variant selected by the tag. How the
//! second stage treats unknown tags and ill-fitting payloads is governed by
//! [`DecodePolicy`].

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uavlink_types::{
    Action, Definition, Event, Message, MessageKind, Subscription, Unsubscription,
};

/// Errors produced while translating between [`Message`] and wire frames.
///
/// None of these are fatal to a connection; the offending frame or message
/// is dropped and the flow carries on.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The hub never sends this kind to clients.
    #[error("message kind `{0}` has no outbound tag")]
    NotOutbound(MessageKind),

    /// `serde_json` refused to serialise the message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The frame is not a `{type, payload}` JSON object.
    #[error("malformed envelope: {0}")]
    Envelope(String),

    /// The envelope tag is outside the known vocabulary (strict mode only).
    #[error("unknown message tag `{0}`")]
    UnknownTag(String),

    /// The payload does not fit the variant selected by the tag.
    #[error("payload does not match `{kind}`: {details}")]
    Payload { kind: MessageKind, details: String },
}

/// How [`decode`] treats input it cannot map exactly onto a [`Message`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Unknown tags are dropped silently; payloads are populated field by
    /// field and whatever fails to fit is left zero-valued.
    #[default]
    Lenient,
    /// Unknown tags and ill-fitting payloads are reported as errors.
    Strict,
}

impl std::fmt::Display for DecodePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DecodePolicy::Lenient => "lenient",
            DecodePolicy::Strict => "strict",
        })
    }
}

impl std::str::FromStr for DecodePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(DecodePolicy::Lenient),
            "strict" => Ok(DecodePolicy::Strict),
            other => Err(format!("unknown decode policy `{other}`")),
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    payload: Value,
}

/// Encode a hub message as a single text frame.
///
/// # Errors
///
/// * [`CodecError::NotOutbound`] for subscriptions and unsubscriptions.
/// * [`CodecError::Serialization`] if `serde_json` fails.
pub fn encode(message: &Message) -> Result<String, CodecError> {
    let kind = message.kind();
    if !kind.is_outbound() {
        return Err(CodecError::NotOutbound(kind));
    }
    serde_json::to_string(message).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decode one text frame.
///
/// Returns `Ok(None)` when the frame was valid but carried nothing to
/// deliver (an unknown tag under [`DecodePolicy::Lenient`]).
pub fn decode(text: &str, policy: DecodePolicy) -> Result<Option<Message>, CodecError> {
    let envelope: RawEnvelope =
        serde_json::from_str(text).map_err(|e| CodecError::Envelope(e.to_string()))?;

    let Some(kind) = MessageKind::from_tag(&envelope.tag) else {
        return match policy {
            DecodePolicy::Lenient => {
                debug!(tag = %envelope.tag, "dropping frame with unknown tag");
                Ok(None)
            }
            DecodePolicy::Strict => Err(CodecError::UnknownTag(envelope.tag)),
        };
    };

    let payload = envelope.payload;
    let message = match kind {
        MessageKind::Event => Message::Event(decode_payload::<Event>(kind, payload, policy)?),
        MessageKind::Action => Message::Action(decode_payload::<Action>(kind, payload, policy)?),
        MessageKind::Subscription => {
            Message::Subscription(decode_payload::<Subscription>(kind, payload, policy)?)
        }
        MessageKind::Unsubscription => {
            Message::Unsubscription(decode_payload::<Unsubscription>(kind, payload, policy)?)
        }
        MessageKind::Definition => {
            Message::Definition(decode_payload::<Definition>(kind, payload, policy)?)
        }
    };
    Ok(Some(message))
}

fn decode_payload<T>(kind: MessageKind, payload: Value, policy: DecodePolicy) -> Result<T, CodecError>
where
    T: DeserializeOwned + Serialize + Default,
{
    match serde_json::from_value::<T>(payload.clone()) {
        Ok(decoded) => Ok(decoded),
        Err(e) => match policy {
            DecodePolicy::Strict => Err(CodecError::Payload {
                kind,
                details: e.to_string(),
            }),
            DecodePolicy::Lenient => {
                warn!(kind = %kind, error = %e, "payload partially decoded");
                Ok(populate_best_effort(payload))
            }
        },
    }
}

/// Overlay every payload field that deserialises cleanly onto `T::default()`.
///
/// Only reached on a type mismatch, since omitted keys already default.
/// Fields that are unknown to `T` or hold a value of the wrong shape are
/// skipped.
fn populate_best_effort<T>(payload: Value) -> T
where
    T: DeserializeOwned + Serialize + Default,
{
    let Value::Object(fields) = payload else {
        return T::default();
    };
    let mut accepted = match serde_json::to_value(T::default()) {
        Ok(Value::Object(base)) => base,
        _ => return T::default(),
    };

    for (key, value) in fields {
        let Some(slot) = accepted.get(&key) else {
            continue;
        };
        let previous = slot.clone();
        accepted.insert(key.clone(), value);
        if serde_json::from_value::<T>(Value::Object(accepted.clone())).is_err() {
            accepted.insert(key, previous);
        }
    }

    serde_json::from_value(Value::Object(accepted)).unwrap_or_default()
}
