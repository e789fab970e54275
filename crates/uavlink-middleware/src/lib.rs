//! `uavlink-middleware` – The WebSocket Bridge
//!
//! Connects remote clients to the in-process message hub over WebSocket,
//! translating between typed [`Message`] values and the JSON wire envelope.
//!
//! # Modules
//!
//! - [`codec`] – `{type, payload}` envelope encoding and decoding.
//! - [`connection`] – Per-client endpoint: an outward and an inward queue.
//! - [`dispatcher`] – The [`Dispatcher`] seam and the [`Hub`] that routes
//!   events to subscribed clients.
//! - [`session`] – Lifecycle of one bridged connection: the outbound and
//!   inbound flows and their shutdown.
//! - [`bridge`] – TCP accept loop and WebSocket upgrade.
//!
//! [`Message`]: uavlink_types::Message

pub mod bridge;
pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod session;

pub use bridge::{BridgeConfig, WsBridge, DEFAULT_PORT};
pub use codec::{CodecError, DecodePolicy};
pub use connection::{Connection, ConnectionHandle};
pub use dispatcher::{Dispatcher, Hub};
pub use session::{ConnectionState, FlowExit, Session, SessionReport};
