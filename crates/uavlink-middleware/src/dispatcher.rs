//! In-process message hub that owns connection registration and routing.
//!
//! The bridge only needs the [`Dispatcher`] trait. [`Hub`] is the concrete
//! implementation used by the `uavlink` binary:
//!
//! | Message from a client | Effect |
//! |---|---|
//! | [`Message::Subscription`] | Adds the object id to the peer's subscriptions |
//! | [`Message::Unsubscription`] | Removes the object id |
//! | `Event` / `Action` / `Definition` | Re-published upstream for the vehicle link |
//!
//! | Message from the hub ([`Hub::publish`]) | Delivered to |
//! |---|---|
//! | [`Message::Event`] | Peers subscribed to its object id |
//! | `Action` / `Definition` | Every peer |
//!
//! Delivery to peers never blocks: a peer whose outward queue is full misses
//! the message and a warning is logged.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uavlink_types::{LinkError, Message};
use uuid::Uuid;

use crate::connection::ConnectionHandle;

/// Default capacity of the upstream broadcast channel.
const DEFAULT_UPSTREAM_CAPACITY: usize = 256;

/// Anything that can accept newly connected clients.
pub trait Dispatcher: Send + Sync {
    /// Take ownership of the dispatcher side of a fresh endpoint.
    fn register(&self, handle: ConnectionHandle);
}

impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    fn register(&self, handle: ConnectionHandle) {
        (**self).register(handle)
    }
}

struct Peer {
    outward: mpsc::Sender<Message>,
    subscriptions: HashSet<u32>,
}

/// Shared hub. Clone it cheaply – all clones route through the same peers.
#[derive(Clone)]
pub struct Hub {
    peers: Arc<Mutex<HashMap<Uuid, Peer>>>,
    upstream: broadcast::Sender<Message>,
}

impl Hub {
    /// Create a hub whose upstream channel buffers `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (upstream, _) = broadcast::channel(capacity);
        Self {
            peers: Arc::new(Mutex::new(HashMap::new())),
            upstream,
        }
    }

    /// Fan a hub-originated message out to the relevant peers.
    ///
    /// Returns the number of peers that were handed the message.
    pub fn publish(&self, message: Message) -> usize {
        let peers = self.lock_peers();
        let mut delivered = 0;
        for (id, peer) in peers.iter() {
            let wanted = match &message {
                Message::Event(event) => peer.subscriptions.contains(&event.object_id),
                _ => true,
            };
            if !wanted {
                continue;
            }
            match peer.outward.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection = %id, kind = %message.kind(), "peer queue full, message dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(connection = %id, "peer queue closed");
                }
            }
        }
        delivered
    }

    /// Subscribe to client-originated events, actions and definitions.
    pub fn subscribe_upstream(&self) -> broadcast::Receiver<Message> {
        self.upstream.subscribe()
    }

    /// Number of currently registered peers.
    pub fn connection_count(&self) -> usize {
        self.lock_peers().len()
    }

    #[cfg(test)]
    fn is_subscribed(&self, connection: Uuid, object_id: u32) -> bool {
        self.lock_peers()
            .get(&connection)
            .is_some_and(|peer| peer.subscriptions.contains(&object_id))
    }

    fn route_inbound(&self, from: Uuid, message: Message) -> Result<(), LinkError> {
        match message {
            Message::Subscription(sub) => {
                if let Some(peer) = self.lock_peers().get_mut(&from) {
                    peer.subscriptions.insert(sub.object_id);
                }
                debug!(connection = %from, object_id = sub.object_id, "subscribed");
                Ok(())
            }
            Message::Unsubscription(unsub) => {
                if let Some(peer) = self.lock_peers().get_mut(&from) {
                    peer.subscriptions.remove(&unsub.object_id);
                }
                debug!(connection = %from, object_id = unsub.object_id, "unsubscribed");
                Ok(())
            }
            other => self
                .upstream
                .send(other)
                .map(|_| ())
                .map_err(|_| LinkError::QueueClosed("no upstream listeners".to_string())),
        }
    }

    fn remove(&self, id: Uuid) {
        if self.lock_peers().remove(&id).is_some() {
            info!(connection = %id, "connection removed");
        }
    }

    fn lock_peers(&self) -> MutexGuard<'_, HashMap<Uuid, Peer>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_UPSTREAM_CAPACITY)
    }
}

impl Dispatcher for Hub {
    /// Store the peer and drain its inward queue on a background task.
    ///
    /// Must be called from within a Tokio runtime.
    fn register(&self, handle: ConnectionHandle) {
        let (id, outward, mut inward) = handle.into_parts();
        self.lock_peers().insert(
            id,
            Peer {
                outward,
                subscriptions: HashSet::new(),
            },
        );
        info!(connection = %id, "connection registered");

        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(message) = inward.recv().await {
                if let Err(e) = hub.route_inbound(id, message) {
                    debug!(connection = %id, error = %e, "inbound message not routed");
                }
            }
            hub.remove(id);
        });
    }
}
