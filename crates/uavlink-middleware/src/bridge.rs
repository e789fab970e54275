//! [`WsBridge`] – WebSocket front door of the hub.
//!
//! Listens on `0.0.0.0:8000` by default. Every accepted TCP connection is
//! handled on its own task:
//!
//! 1. The HTTP upgrade is completed on the configured path (`/uav`), with
//!    fixed read/write buffer sizes. Requests from any `Origin` are accepted.
//! 2. A fresh endpoint is created and its dispatcher side is handed to
//!    [`Dispatcher::register`].
//! 3. The socket and the bridge side of the endpoint are driven by a
//!    [`Session`] until both flows stop.
//!
//! A failed upgrade only drops that one connection; the accept loop keeps
//! running.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async_with_config};
use tracing::{debug, error, info, warn};
use uavlink_types::LinkError;

use crate::codec::DecodePolicy;
use crate::connection;
use crate::dispatcher::Dispatcher;
use crate::session::{Session, SessionReport};

/// Default TCP port for the WebSocket endpoint.
pub const DEFAULT_PORT: u16 = 8000;

/// Default request path accepted for upgrades.
pub const DEFAULT_PATH: &str = "/uav";

/// Default socket read and write buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Default capacity of each endpoint queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Tunables for [`WsBridge`].
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub port: u16,
    pub path: String,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    /// Capacity of both the outward and the inward queue of every endpoint.
    pub queue_capacity: usize,
    pub decode_policy: DecodePolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            decode_policy: DecodePolicy::default(),
        }
    }
}

impl BridgeConfig {
    fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.read_buffer_size = self.read_buffer_size;
        config.write_buffer_size = self.write_buffer_size;
        config
    }
}

/// Accepts WebSocket clients and bridges each one to a [`Dispatcher`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use uavlink_middleware::{Hub, WsBridge};
///
/// #[tokio::main]
/// async fn main() {
///     let hub = Arc::new(Hub::default());
///     WsBridge::new(Arc::clone(&hub))
///         .with_port(8000)
///         .run()
///         .await
///         .expect("bridge failed");
/// }
/// ```
pub struct WsBridge<D> {
    dispatcher: Arc<D>,
    config: BridgeConfig,
}

impl<D> WsBridge<D>
where
    D: Dispatcher + 'static,
{
    /// Create a bridge with [`BridgeConfig::default`].
    pub fn new(dispatcher: Arc<D>) -> Self {
        Self {
            dispatcher,
            config: BridgeConfig::default(),
        }
    }

    /// Replace the whole configuration (builder-style).
    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Bind `0.0.0.0:<port>` and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Bind`] if the TCP listener cannot bind.
    pub async fn run(self) -> Result<(), LinkError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| LinkError::Bind {
            addr: addr.to_string(),
            details: e.to_string(),
        })?;
        info!(%addr, path = %self.config.path, "WebSocket bridge listening");
        self.serve(listener).await;
        Ok(())
    }

    /// Accept connections on an already bound listener. Never returns.
    pub async fn serve(self, listener: TcpListener) {
        let config = Arc::new(self.config);
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection received");
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let config = Arc::clone(&config);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, peer, dispatcher, config).await {
                            warn!(%peer, error = %e, "connection attempt dropped");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }
    }
}

async fn handle_client<D: Dispatcher>(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<D>,
    config: Arc<BridgeConfig>,
) -> Result<SessionReport, LinkError> {
    let ws = upgrade(stream, &config)
        .await
        .map_err(|e| LinkError::Handshake {
            peer: peer.to_string(),
            details: e.to_string(),
        })?;

    let (handle, connection) = connection::channel(config.queue_capacity, config.queue_capacity);
    dispatcher.register(handle);

    Ok(Session::new(ws, connection, config.decode_policy, peer.to_string())
        .run()
        .await)
}

async fn upgrade(
    stream: TcpStream,
    config: &BridgeConfig,
) -> Result<WebSocketStream<TcpStream>, tokio_tungstenite::tungstenite::Error> {
    let path = config.path.clone();
    // Any Origin is accepted; there is no browser-origin restriction.
    let check_path = move |request: &Request, response: Response| {
        if request.uri().path() == path {
            Ok(response)
        } else {
            let mut rejection: ErrorResponse =
                ErrorResponse::new(Some(format!("no endpoint at {}", request.uri().path())));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };
    accept_hdr_async_with_config(stream, check_path, Some(config.websocket_config())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use crate::dispatcher::Hub;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use uavlink_types::{Action, Event, Message};

    const DEADLINE: Duration = Duration::from_secs(5);

    /// Hands every registered endpoint to the test.
    struct Capture(mpsc::UnboundedSender<ConnectionHandle>);

    impl Dispatcher for Capture {
        fn register(&self, handle: ConnectionHandle) {
            let _ = self.0.send(handle);
        }
    }

    async fn start<D: Dispatcher + 'static>(dispatcher: Arc<D>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(WsBridge::new(dispatcher).serve(listener));
        addr
    }

    fn action_frame(object_id: u32) -> WsMessage {
        let frame = serde_json::json!({
            "type": "action",
            "payload": {"objectId": object_id, "instanceId": 0, "action": "set", "data": {}}
        });
        WsMessage::Text(frame.to_string().into())
    }

    fn event(object_id: u32) -> Message {
        Message::Event(Event {
            object_id,
            instance_id: 0,
            name: "GPSPosition".to_string(),
            data: serde_json::Map::new(),
        })
    }

    #[test]
    fn default_config_matches_published_constants() {
        let config = BridgeConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.path, "/uav");
        assert_eq!(config.read_buffer_size, 2048);
        assert_eq!(config.write_buffer_size, 2048);
        assert_eq!(config.decode_policy, DecodePolicy::Lenient);
    }

    #[test]
    fn with_port_overrides_default() {
        let bridge = WsBridge::new(Arc::new(Hub::default())).with_port(9999);
        assert_eq!(bridge.config().port, 9999);
    }

    #[tokio::test]
    async fn upgrade_registers_an_endpoint_with_the_dispatcher() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let addr = start(Arc::new(Capture(tx))).await;

        let (mut client, _) = connect_async(format!("ws://{addr}/uav")).await.unwrap();
        let mut handle = tokio::time::timeout(DEADLINE, rx.recv())
            .await
            .unwrap()
            .expect("endpoint registered");

        client.send(action_frame(21)).await.unwrap();
        let inward = tokio::time::timeout(DEADLINE, handle.recv_inward())
            .await
            .unwrap();
        assert!(matches!(
            inward,
            Some(Message::Action(Action { object_id: 21, .. }))
        ));
    }

    #[tokio::test]
    async fn wrong_path_is_rejected_and_listener_survives() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let addr = start(Arc::new(Capture(tx))).await;

        assert!(connect_async(format!("ws://{addr}/elsewhere")).await.is_err());

        // The listener is still accepting.
        let (_client, _) = connect_async(format!("ws://{addr}/uav")).await.unwrap();
        assert!(
            tokio::time::timeout(DEADLINE, rx.recv())
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn plain_http_request_does_not_take_down_the_listener() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (tx, mut rx) = mpsc::unbounded_channel();
        let addr = start(Arc::new(Capture(tx))).await;

        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(b"GET /uav HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut buf = Vec::new();
        let _ = tokio::time::timeout(DEADLINE, raw.read_to_end(&mut buf)).await;

        let (_client, _) = connect_async(format!("ws://{addr}/uav")).await.unwrap();
        let handle = tokio::time::timeout(DEADLINE, rx.recv()).await.unwrap();
        assert!(handle.is_some(), "only the valid upgrade registers an endpoint");
    }

    #[tokio::test]
    async fn hub_round_trip_over_tcp() {
        let hub = Arc::new(Hub::default());
        let addr = start(Arc::clone(&hub)).await;

        let (mut client, _) = connect_async(format!("ws://{addr}/uav")).await.unwrap();
        client
            .send(WsMessage::Text(
                r#"{"type":"sub","payload":{"objectId":31}}"#.to_string().into(),
            ))
            .await
            .unwrap();

        // Wait for the subscription to reach the hub.
        tokio::time::timeout(DEADLINE, async {
            while hub.publish(event(31)) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let frame = loop {
            match tokio::time::timeout(DEADLINE, client.next()).await.unwrap() {
                Some(Ok(WsMessage::Text(text))) => break text,
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        };
        let value: Value = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["payload"]["objectId"], 31);

        drop(client);
        tokio::time::timeout(DEADLINE, async {
            while hub.connection_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("hub releases the endpoint after the client leaves");
    }

    #[tokio::test]
    async fn dropped_client_leaves_other_connections_running() {
        let hub = Arc::new(Hub::default());
        let mut upstream = hub.subscribe_upstream();
        let addr = start(Arc::clone(&hub)).await;

        let (leaving, _) = connect_async(format!("ws://{addr}/uav")).await.unwrap();
        let (mut staying, _) = connect_async(format!("ws://{addr}/uav")).await.unwrap();
        tokio::time::timeout(DEADLINE, async {
            while hub.connection_count() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("both endpoints registered");

        drop(leaving);
        tokio::time::timeout(DEADLINE, async {
            while hub.connection_count() > 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("the departed client is released");

        // Client → hub still flows for the survivor.
        staying.send(action_frame(52)).await.unwrap();
        let received = tokio::time::timeout(DEADLINE, upstream.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            received,
            Message::Action(Action { object_id: 52, .. })
        ));

        // Hub → client too.
        staying
            .send(WsMessage::Text(
                r#"{"type":"sub","payload":{"objectId":53}}"#.to_string().into(),
            ))
            .await
            .unwrap();
        tokio::time::timeout(DEADLINE, async {
            while hub.publish(event(53)) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let frame = loop {
            match tokio::time::timeout(DEADLINE, staying.next()).await.unwrap() {
                Some(Ok(WsMessage::Text(text))) => break text,
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        };
        let value: Value = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["payload"]["objectId"], 53);
        assert_eq!(hub.connection_count(), 1);
    }

    #[tokio::test]
    async fn hundred_connections_see_only_their_own_stream() {
        const CLIENTS: u32 = 100;
        const PER_CLIENT: u32 = 5;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let addr = start(Arc::new(Capture(tx))).await;

        let mut clients = Vec::new();
        for index in 0..CLIENTS {
            let (mut client, _) = connect_async(format!("ws://{addr}/uav")).await.unwrap();
            // Announce the client index so the test can pair it with its endpoint.
            client.send(action_frame(index)).await.unwrap();
            clients.push(client);
        }

        let mut feeders = Vec::new();
        for _ in 0..CLIENTS {
            let mut handle = tokio::time::timeout(DEADLINE, rx.recv())
                .await
                .unwrap()
                .expect("endpoint registered");
            feeders.push(tokio::spawn(async move {
                let Some(Message::Action(hello)) = handle.recv_inward().await else {
                    panic!("expected the announcing action");
                };
                for k in 0..PER_CLIENT {
                    handle
                        .send_outward(event(hello.object_id * 1000 + k))
                        .await
                        .unwrap();
                }
                handle
            }));
        }

        let readers = clients.into_iter().enumerate().map(|(index, mut client)| {
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while seen.len() < PER_CLIENT as usize {
                    match tokio::time::timeout(DEADLINE, client.next()).await.unwrap() {
                        Some(Ok(WsMessage::Text(text))) => {
                            let value: Value = serde_json::from_str(text.as_str()).unwrap();
                            seen.push(value["payload"]["objectId"].as_u64().unwrap() as u32);
                        }
                        Some(Ok(_)) => continue,
                        other => panic!("unexpected frame: {other:?}"),
                    }
                }
                (index as u32, seen)
            })
        });
        let readers: Vec<_> = readers.collect();

        // Keep the endpoints alive until every reader is done.
        let mut handles = Vec::new();
        for feeder in feeders {
            handles.push(feeder.await.unwrap());
        }
        for reader in readers {
            let (index, seen) = reader.await.unwrap();
            let expected: Vec<u32> = (0..PER_CLIENT).map(|k| index * 1000 + k).collect();
            assert_eq!(seen, expected, "client {index} saw a foreign or reordered stream");
        }
        drop(handles);
    }
}
