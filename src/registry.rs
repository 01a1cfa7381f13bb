//! Push fan-out registry.
//!
//! Holds the set of open subscriber connections. Every operation (register,
//! unregister, broadcast, drain) runs inside one critical section on a single
//! mutex, so a broadcast never iterates a set that is being modified.
//! [`SubscriberConnection::send_text`] must not block: the WebSocket
//! implementation only enqueues onto the session's outbound channel.
//!
//! A connection is OPEN while it is in the set. It becomes CLOSED when it is
//! unregistered or when a send to it fails, and is never re-admitted under the
//! same handle.

use crate::types::CompletionEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Identity of one subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("connection {0:?} is closed")]
pub struct SendError(pub ConnectionId);

/// A live push endpoint.
pub trait SubscriberConnection: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Queue a text frame for delivery. Must not block.
    fn send_text(&self, text: &str) -> Result<(), SendError>;
}

/// Connection backed by an unbounded channel drained by the socket task.
#[derive(Debug, Clone)]
pub struct ChannelConnection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelConnection {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::next(),
                tx,
            },
            rx,
        )
    }
}

impl SubscriberConnection for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send_text(&self, text: &str) -> Result<(), SendError> {
        self.tx
            .send(text.to_string())
            .map_err(|_| SendError(self.id))
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: Vec<ConnectionId>,
}

#[derive(Default)]
pub struct PushRegistry {
    open: Mutex<HashMap<ConnectionId, Arc<dyn SubscriberConnection>>>,
}

impl PushRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<dyn SubscriberConnection>>> {
        self.open.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a connection to the open set.
    pub fn register(&self, connection: Arc<dyn SubscriberConnection>) {
        let id = connection.id();
        self.lock().insert(id, connection);
        debug!(connection = id.0, "Subscriber registered");
    }

    /// Remove a connection. Unknown ids are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        if self.lock().remove(&id).is_some() {
            debug!(connection = id.0, "Subscriber unregistered");
        }
    }

    /// Deliver the event to every open connection, pruning those that fail.
    pub fn broadcast(&self, event: &CompletionEvent) -> BroadcastReport {
        let text = event.push_text();
        let mut report = BroadcastReport::default();
        let mut open = self.lock();
        open.retain(|id, connection| match connection.send_text(&text) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(e) => {
                debug!(connection = id.0, error = %e, "Pruning subscriber after failed send");
                report.pruned.push(*id);
                false
            }
        });
        drop(open);
        report.pruned.sort();
        info!(
            content_id = %event.content_id,
            delivered = report.delivered,
            pruned = report.pruned.len(),
            "Broadcast completion"
        );
        report
    }

    /// Close out every connection. Returns how many were open.
    ///
    /// Dropping the registry's handle is what closes a channel-backed
    /// connection once its socket task holds the last receiver.
    pub fn drain(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }
}
