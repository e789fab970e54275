//! Per-client connection endpoint.
//!
//! An endpoint is a pair of bounded queues shared between the dispatcher and
//! one WebSocket bridge:
//!
//! ```text
//!            outward (hub → client)
//! Dispatcher ──────────────────────▶ Bridge ──▶ socket
//!            ◀────────────────────── Bridge ◀── socket
//!            inward (client → hub)
//! ```
//!
//! [`channel`] creates both ends at once. The dispatcher keeps the
//! [`ConnectionHandle`]; the bridge keeps the [`Connection`] and splits it
//! into an [`OutwardQueue`] and an [`InwardQueue`] so that each flow owns
//! exactly the half it uses. Dropping the bridge side closes the endpoint,
//! which is how the dispatcher learns the client went away.

use tokio::sync::mpsc;
use tracing::debug;
use uavlink_types::{LinkError, Message};
use uuid::Uuid;

/// Create a fresh endpoint with the given queue capacities.
///
/// # Panics
///
/// Panics if either capacity is zero (a [`tokio::sync::mpsc`] restriction).
pub fn channel(outward_capacity: usize, inward_capacity: usize) -> (ConnectionHandle, Connection) {
    let id = Uuid::new_v4();
    let (outward_tx, outward_rx) = mpsc::channel(outward_capacity);
    let (inward_tx, inward_rx) = mpsc::channel(inward_capacity);
    (
        ConnectionHandle {
            id,
            outward: outward_tx,
            inward: inward_rx,
        },
        Connection {
            id,
            outward: OutwardQueue { id, rx: outward_rx },
            inward: InwardQueue { id, tx: inward_tx },
        },
    )
}

// ---------------------------------------------------------------------------
// Bridge side
// ---------------------------------------------------------------------------

/// The bridge's end of an endpoint.
#[derive(Debug)]
pub struct Connection {
    id: Uuid,
    outward: OutwardQueue,
    inward: InwardQueue,
}

impl Connection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next hub message destined for the client.
    ///
    /// Returns `None` once the dispatcher has dropped its sender.
    pub async fn recv_outward(&mut self) -> Option<Message> {
        self.outward.recv().await
    }

    /// Deliver a client message to the dispatcher.
    pub async fn send_inward(&self, message: Message) -> Result<(), LinkError> {
        self.inward.send(message).await
    }

    /// Split into independently owned halves, one per flow.
    pub fn split(self) -> (OutwardQueue, InwardQueue) {
        (self.outward, self.inward)
    }

    /// Release the endpoint. The dispatcher observes the inward queue ending.
    pub fn close(self) {
        debug!(connection = %self.id, "connection closed");
    }
}

/// Receiving half of the outward queue, owned by the outbound flow.
#[derive(Debug)]
pub struct OutwardQueue {
    id: Uuid,
    rx: mpsc::Receiver<Message>,
}

impl OutwardQueue {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

/// Sending half of the inward queue, owned by the inbound flow.
#[derive(Debug)]
pub struct InwardQueue {
    id: Uuid,
    tx: mpsc::Sender<Message>,
}

impl InwardQueue {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for capacity and enqueue `message`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::QueueClosed`] if the dispatcher has dropped the
    /// receiving end.
    pub async fn send(&self, message: Message) -> Result<(), LinkError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| LinkError::QueueClosed(format!("inward queue of {}", self.id)))
    }
}

// ---------------------------------------------------------------------------
// Dispatcher side
// ---------------------------------------------------------------------------

/// The dispatcher's end of an endpoint.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: Uuid,
    outward: mpsc::Sender<Message>,
    inward: mpsc::Receiver<Message>,
}

impl ConnectionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a hub message for the client, waiting for capacity.
    pub async fn send_outward(&self, message: Message) -> Result<(), LinkError> {
        self.outward
            .send(message)
            .await
            .map_err(|_| LinkError::QueueClosed(format!("outward queue of {}", self.id)))
    }

    /// Wait for the next client message. `None` once the bridge has closed.
    pub async fn recv_inward(&mut self) -> Option<Message> {
        self.inward.recv().await
    }

    /// Take the raw channel ends, e.g. to move them into separate tasks.
    pub fn into_parts(self) -> (Uuid, mpsc::Sender<Message>, mpsc::Receiver<Message>) {
        (self.id, self.outward, self.inward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uavlink_types::{Event, Subscription};

    fn event(object_id: u32) -> Message {
        Message::Event(Event {
            object_id,
            ..Event::default()
        })
    }

    #[test]
    fn both_ends_share_an_id() {
        let (handle, conn) = channel(4, 4);
        assert_eq!(handle.id(), conn.id());
        let (outward, inward) = conn.split();
        assert_eq!(outward.id(), handle.id());
        assert_eq!(inward.id(), handle.id());
    }

    #[test]
    fn endpoints_get_distinct_ids() {
        let (a, _ca) = channel(1, 1);
        let (b, _cb) = channel(1, 1);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn outward_queue_is_fifo() {
        let (handle, mut conn) = channel(8, 8);
        for id in 1..=3 {
            handle.send_outward(event(id)).await.unwrap();
        }
        for id in 1..=3 {
            assert_eq!(conn.recv_outward().await, Some(event(id)));
        }
    }

    #[tokio::test]
    async fn inward_messages_reach_the_dispatcher() {
        let (mut handle, conn) = channel(8, 8);
        let sub = Message::Subscription(Subscription { object_id: 3 });
        conn.send_inward(sub.clone()).await.unwrap();
        assert_eq!(handle.recv_inward().await, Some(sub));
    }

    #[tokio::test]
    async fn dropping_the_handle_ends_the_outward_queue() {
        let (handle, mut conn) = channel(8, 8);
        drop(handle);
        assert_eq!(conn.recv_outward().await, None);
        assert!(conn.send_inward(event(1)).await.is_err());
    }

    #[tokio::test]
    async fn closing_the_connection_ends_the_inward_queue() {
        let (mut handle, conn) = channel(8, 8);
        conn.close();
        assert_eq!(handle.recv_inward().await, None);
        assert!(matches!(
            handle.send_outward(event(1)).await,
            Err(LinkError::QueueClosed(_))
        ));
    }

    #[tokio::test]
    async fn split_halves_close_independently() {
        let (mut handle, conn) = channel(8, 8);
        let (outward, inward) = conn.split();
        drop(inward);
        assert_eq!(handle.recv_inward().await, None);
        // The outward half is still alive.
        handle.send_outward(event(9)).await.unwrap();
        drop(outward);
    }
}
