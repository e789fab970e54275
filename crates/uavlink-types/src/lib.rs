use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A telemetry update for one instance of a vehicle object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Event {
    pub object_id: u32,
    pub instance_id: u16,
    /// Human-readable object name, e.g. "AttitudeActual".
    pub name: String,
    pub data: Map<String, Value>,
}

/// A control request addressed to one instance of a vehicle object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Action {
    pub object_id: u32,
    pub instance_id: u16,
    /// Verb understood by the vehicle link, e.g. "set" or "request".
    pub action: String,
    pub data: Map<String, Value>,
}

/// Asks the hub to start forwarding events for `object_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subscription {
    pub object_id: u32,
}

/// Asks the hub to stop forwarding events for `object_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Unsubscription {
    pub object_id: u32,
}

/// Schema of a vehicle object as announced by the vehicle link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Definition {
    pub object_id: u32,
    pub name: String,
    pub description: String,
    pub single_instance: bool,
    pub settings: bool,
    pub fields: Vec<FieldDefinition>,
}

/// One field of a [`Definition`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldDefinition {
    pub name: String,
    /// Wire type name, e.g. "float32" or "enum".
    pub field_type: String,
    pub units: String,
    pub elements: u16,
}

/// Every message that can travel through the hub.
///
/// Serialises as the wire envelope `{"type": <tag>, "payload": {...}}`.
/// Keys missing from a payload, at any depth, decode as zero values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    #[serde(rename = "event")]
    Event(Event),
    #[serde(rename = "action")]
    Action(Action),
    #[serde(rename = "sub")]
    Subscription(Subscription),
    #[serde(rename = "unsub")]
    Unsubscription(Unsubscription),
    #[serde(rename = "def")]
    Definition(Definition),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Event(_) => MessageKind::Event,
            Message::Action(_) => MessageKind::Action,
            Message::Subscription(_) => MessageKind::Subscription,
            Message::Unsubscription(_) => MessageKind::Unsubscription,
            Message::Definition(_) => MessageKind::Definition,
        }
    }
}

impl From<Event> for Message {
    fn from(event: Event) -> Self {
        Message::Event(event)
    }
}

impl From<Action> for Message {
    fn from(action: Action) -> Self {
        Message::Action(action)
    }
}

impl From<Subscription> for Message {
    fn from(sub: Subscription) -> Self {
        Message::Subscription(sub)
    }
}

impl From<Unsubscription> for Message {
    fn from(unsub: Unsubscription) -> Self {
        Message::Unsubscription(unsub)
    }
}

impl From<Definition> for Message {
    fn from(def: Definition) -> Self {
        Message::Definition(def)
    }
}

/// Payload-free discriminant of [`Message`], doubling as the wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Event,
    Action,
    Subscription,
    Unsubscription,
    Definition,
}

impl MessageKind {
    /// The `type` tag used in the wire envelope.
    pub fn tag(self) -> &'static str {
        match self {
            MessageKind::Event => "event",
            MessageKind::Action => "action",
            MessageKind::Subscription => "sub",
            MessageKind::Unsubscription => "unsub",
            MessageKind::Definition => "def",
        }
    }

    /// Parse a wire tag. Returns `None` for anything outside the vocabulary.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "event" => Some(MessageKind::Event),
            "action" => Some(MessageKind::Action),
            "sub" => Some(MessageKind::Subscription),
            "unsub" => Some(MessageKind::Unsubscription),
            "def" => Some(MessageKind::Definition),
            _ => None,
        }
    }

    /// Whether the hub ever sends this kind to clients.
    ///
    /// Subscriptions only flow from clients into the hub.
    pub fn is_outbound(self) -> bool {
        matches!(
            self,
            MessageKind::Event | MessageKind::Action | MessageKind::Definition
        )
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Errors raised by the transport and connection plumbing.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Bind Error on {addr}: {details}")]
    Bind { addr: String, details: String },

    #[error("Handshake Error from {peer}: {details}")]
    Handshake { peer: String, details: String },

    #[error("Queue Closed: {0}")]
    QueueClosed(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}
