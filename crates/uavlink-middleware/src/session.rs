//! Per-connection lifecycle: two flows sharing one WebSocket.
//!
//! A [`Session`] owns an upgraded socket and the bridge side of a
//! [`Connection`]. [`Session::run`] splits both:
//!
//! * the **outbound flow** owns the socket's write half and the outward queue,
//! * the **inbound flow** owns the socket's read half and the inward queue,
//!
//! so reads and writes never contend and no lock guards the socket. The two
//! flows run as separate Tokio tasks and the session waits for both to stop.
//! One flow stopping does not interrupt the other, with a single exception:
//! a failed socket write fires a stop signal that releases an inbound flow
//! still parked on a read. Everything the flows own is dropped when they
//! return (or unwind), so the socket and the endpoint are released exactly
//! once on every path.
//!
//! ```text
//! Connecting ──▶ Active ──▶ Draining ──▶ Closed
//! ```

use std::fmt;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Notify, watch};
use tokio::task::JoinError;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{Instrument, debug, info, instrument, warn};

use crate::codec::{self, DecodePolicy};
use crate::connection::{Connection, InwardQueue, OutwardQueue};

/// Lifecycle of one bridged connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    /// Both flows running.
    Active,
    /// One flow stopped, waiting on the other.
    Draining,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Active => "active",
            ConnectionState::Draining => "draining",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a flow stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowExit {
    /// The queue the flow consumes or feeds was closed by the dispatcher.
    QueueClosed,
    /// Writing a frame to the socket failed.
    WriteFailed,
    /// Reading from the socket failed.
    ReadFailed,
    /// The socket stream ended.
    StreamEnded,
    /// Stopped by the write-failure signal.
    Cancelled,
    /// The flow's task panicked.
    Panicked,
}

/// How each flow of a finished session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub outbound: FlowExit,
    pub inbound: FlowExit,
}

/// One client connection bridged to the dispatcher.
pub struct Session<S> {
    ws: WebSocketStream<S>,
    connection: Connection,
    policy: DecodePolicy,
    peer: String,
    state: watch::Sender<ConnectionState>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        ws: WebSocketStream<S>,
        connection: Connection,
        policy: DecodePolicy,
        peer: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            ws,
            connection,
            policy,
            peer: peer.into(),
            state,
        }
    }

    /// Observe state transitions of this session.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run both flows to completion.
    #[instrument(skip_all, fields(peer = %self.peer, connection = %self.connection.id()))]
    pub async fn run(self) -> SessionReport {
        let (sink, stream) = self.ws.split();
        let (outward, inward) = self.connection.split();
        let stop = Arc::new(Notify::new());

        let mut outbound = tokio::spawn(
            outbound_flow(sink, outward, Arc::clone(&stop)).in_current_span(),
        );
        let mut inbound =
            tokio::spawn(inbound_flow(stream, inward, self.policy, stop).in_current_span());
        self.state.send_replace(ConnectionState::Active);
        info!("session active");

        let report = tokio::select! {
            result = &mut outbound => {
                let outbound = flow_exit("outbound", result);
                self.state.send_replace(ConnectionState::Draining);
                debug!(exit = ?outbound, "outbound flow stopped, waiting for inbound");
                SessionReport { outbound, inbound: flow_exit("inbound", inbound.await) }
            }
            result = &mut inbound => {
                let inbound = flow_exit("inbound", result);
                self.state.send_replace(ConnectionState::Draining);
                debug!(exit = ?inbound, "inbound flow stopped, waiting for outbound");
                SessionReport { outbound: flow_exit("outbound", outbound.await), inbound }
            }
        };

        self.state.send_replace(ConnectionState::Closed);
        info!(outbound = ?report.outbound, inbound = ?report.inbound, "session closed");
        report
    }
}

fn flow_exit(flow: &str, result: Result<FlowExit, JoinError>) -> FlowExit {
    result.unwrap_or_else(|e| {
        warn!(flow, error = %e, "flow task aborted");
        FlowExit::Panicked
    })
}

/// Hub → client. Encodes each outward message and writes it as a text frame.
async fn outbound_flow<S>(
    mut sink: SplitSink<WebSocketStream<S>, WsMessage>,
    mut outward: OutwardQueue,
    stop: Arc<Notify>,
) -> FlowExit
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = outward.recv().await {
        let frame = match codec::encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "skipping outbound message");
                continue;
            }
        };
        if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
            warn!(error = %e, "socket write failed");
            stop.notify_one();
            return FlowExit::WriteFailed;
        }
    }
    debug!("outward queue closed");
    FlowExit::QueueClosed
}

/// Client → hub. Decodes text frames and enqueues them for the dispatcher.
async fn inbound_flow<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    inward: InwardQueue,
    policy: DecodePolicy,
    stop: Arc<Notify>,
) -> FlowExit
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.notified() => {
                debug!("inbound flow stopped after write failure");
                return FlowExit::Cancelled;
            }
            frame = stream.next() => frame,
        };

        let text = match frame {
            Some(Ok(WsMessage::Text(text))) => text,
            // Binary, ping, pong and close frames carry nothing for the hub.
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "socket read failed");
                return FlowExit::ReadFailed;
            }
            None => {
                debug!("socket stream ended");
                return FlowExit::StreamEnded;
            }
        };

        match codec::decode(text.as_str(), policy) {
            Ok(Some(message)) => {
                if let Err(e) = inward.send(message).await {
                    warn!(error = %e, "dispatcher stopped accepting messages");
                    return FlowExit::QueueClosed;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "dropping inbound frame"),
        }
    }
}
