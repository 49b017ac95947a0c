//! Event fan-out to connected clients.
//!
//! Each connection owns one [`OutboundQueue`]; the session's writer task
//! drains it onto the socket. [`BroadcastRouter`] encodes an event once and
//! pushes the bytes to every connection in the target room, so a slow
//! consumer never blocks publishers or its peers. Queues are bounded and
//! drop their oldest entry on overflow; a client that falls that far behind
//! re-syncs from a fresh snapshot rather than stalling the room.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use taskboard_proto::event::{self, ServerEvent};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

use crate::presence::{ConnectionId, PresenceRegistry};

/// Default per-connection outbound queue depth.
pub const DEFAULT_OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Bounded single-consumer byte queue between the router and one writer
/// task. Overflow evicts the oldest entry instead of blocking the producer.
pub struct OutboundQueue {
    queue: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl OutboundQueue {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues encoded bytes. Returns `true` if an older entry was evicted
    /// to make room. Pushes after [`close`](Self::close) are dropped.
    pub fn push(&self, bytes: Vec<u8>) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let evicted = {
            let mut queue = self.queue.lock();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(bytes);
            evicted
        };
        self.notify.notify_one();
        evicted
    }

    /// Dequeues the next entry, waiting until one arrives. Returns `None`
    /// once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Vec<u8>> {
        loop {
            if let Some(bytes) = self.queue.lock().pop_front() {
                return Some(bytes);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Marks the queue closed and wakes the consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// Routes server events to the outbound queues of room members.
pub struct BroadcastRouter {
    presence: Arc<PresenceRegistry>,
    outboxes: RwLock<HashMap<ConnectionId, Arc<OutboundQueue>>>,
    queue_depth: usize,
}

impl BroadcastRouter {
    /// Creates a router with the default queue depth.
    #[must_use]
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self::with_queue_depth(presence, DEFAULT_OUTBOUND_QUEUE_DEPTH)
    }

    /// Creates a router with an explicit per-connection queue depth.
    #[must_use]
    pub fn with_queue_depth(presence: Arc<PresenceRegistry>, queue_depth: usize) -> Self {
        Self {
            presence,
            outboxes: RwLock::new(HashMap::new()),
            queue_depth,
        }
    }

    /// Creates and registers the outbound queue for a connection. The
    /// session hands the returned queue to its writer task.
    pub async fn attach(&self, connection: ConnectionId) -> Arc<OutboundQueue> {
        let outbox = Arc::new(OutboundQueue::new(self.queue_depth));
        self.outboxes.write().await.insert(connection, Arc::clone(&outbox));
        outbox
    }

    /// Unregisters and closes a connection's queue. Idempotent.
    pub async fn detach(&self, connection: ConnectionId) {
        if let Some(outbox) = self.outboxes.write().await.remove(&connection) {
            outbox.close();
        }
    }

    /// Publishes an event to every connection in the room, optionally
    /// excluding one (normally the originator).
    ///
    /// Delivery is best-effort: encode failures and overflowing consumers
    /// are logged, never propagated to the caller.
    pub async fn publish(
        &self,
        team_id: &str,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) {
        let bytes = match event::encode(event) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(team_id, error = %e, "failed to encode event, dropping");
                return;
            }
        };

        let connections = self.presence.connections_in(team_id).await;
        let outboxes = self.outboxes.read().await;
        let mut delivered = 0usize;
        let mut evictions = 0usize;
        for connection in connections {
            if Some(connection) == exclude {
                continue;
            }
            if let Some(outbox) = outboxes.get(&connection) {
                if outbox.push(bytes.clone()) {
                    evictions += 1;
                }
                delivered += 1;
            }
        }
        if evictions > 0 {
            warn!(team_id, evictions, "slow consumers dropped oldest queued events");
        }
        debug!(team_id, delivered, "published event to room");
    }

    /// Sends an event to a single connection.
    pub async fn send_to(&self, connection: ConnectionId, event: &ServerEvent) {
        let bytes = match event::encode(event) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%connection, error = %e, "failed to encode event, dropping");
                return;
            }
        };
        let outboxes = self.outboxes.read().await;
        if let Some(outbox) = outboxes.get(&connection) {
            if outbox.push(bytes) {
                warn!(%connection, "slow consumer dropped oldest queued event");
            }
        }
    }
}
