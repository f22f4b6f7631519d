//! Correlation registry: request id -> single-use result slot.
//!
//! The connection that receives a request creates a [`Slot`] before the
//! command is queued. The executor later calls
//! [`CorrelationRegistry::fulfill`] from the host thread, which removes the
//! entry and hands the reply to whoever holds the slot. Dropping a slot
//! removes its entry too, so every exit path of a connection (delivery,
//! timeout, disconnect, write failure) leaves nothing behind.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, never, select};
use parking_lot::Mutex;
use tracing::debug;

use crate::protocol::Reply;

pub type RequestId = u64;

pub struct CorrelationRegistry {
    slots: Mutex<HashMap<RequestId, Sender<Reply>>>,
    next_id: AtomicU64,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh request id and installs an empty slot for it.
    pub fn create(self: &Arc<Self>) -> Slot {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // Capacity 1: the slot is written at most once.
        let (reply_tx, reply_rx) = bounded(1);
        self.slots.lock().insert(id, reply_tx);
        Slot {
            id,
            created_at: Instant::now(),
            reply_rx,
            registry: Arc::clone(self),
        }
    }

    /// Publishes the result for `id`.
    ///
    /// Returns `false` when there is no live slot, i.e. it was already
    /// fulfilled or its requester discarded it. The reply is dropped then.
    pub fn fulfill(&self, id: RequestId, reply: Reply) -> bool {
        let Some(reply_tx) = self.slots.lock().remove(&id) else {
            debug!(request_id = id, "no live slot; result discarded");
            return false;
        };
        // Cannot be full: the sender was just taken out of the map, so this
        // is the only send it will ever see.
        reply_tx.try_send(reply).is_ok()
    }

    /// Removes a slot whose waiter is gone. Wakes the waiter if still parked.
    pub fn discard(&self, id: RequestId) -> bool {
        self.slots.lock().remove(&id).is_some()
    }

    /// Number of slots created but not yet fulfilled or discarded.
    pub fn live(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CorrelationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationRegistry")
            .field("live", &self.live())
            .finish()
    }
}

/// Why waiting on a [`Slot`] produced no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitError {
    TimedOut,
    /// The slot was discarded before a result arrived.
    Discarded,
    /// The caller's close signal fired while waiting.
    Closed,
}

impl fmt::Display for AwaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AwaitError::TimedOut => {
                write!(f, "command processing timeout - host thread may be busy")
            }
            AwaitError::Discarded => write!(f, "request discarded before completion"),
            AwaitError::Closed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for AwaitError {}

/// Receiving end of one correlation slot. Dropping it discards the slot.
pub struct Slot {
    id: RequestId,
    created_at: Instant,
    reply_rx: Receiver<Reply>,
    registry: Arc<CorrelationRegistry>,
}

impl Slot {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Blocks the calling thread until the result arrives or `timeout` passes.
    pub fn wait(&self, timeout: Duration) -> Result<Reply, AwaitError> {
        self.wait_or_closed(timeout, &never())
    }

    /// Like [`Slot::wait`], but also returns early once `closed` fires or
    /// disconnects.
    pub fn wait_or_closed(
        &self,
        timeout: Duration,
        closed: &Receiver<()>,
    ) -> Result<Reply, AwaitError> {
        select! {
            recv(self.reply_rx) -> reply => reply.map_err(|_| AwaitError::Discarded),
            recv(closed) -> _ => Err(AwaitError::Closed),
            default(timeout) => Err(AwaitError::TimedOut),
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.registry.discard(self.id) {
            debug!(request_id = self.id, "slot discarded before fulfilment");
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").field("id", &self.id).finish()
    }
}
