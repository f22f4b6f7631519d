//! Multi-producer, single-consumer command queue.
//!
//! Connection threads push `(request_id, command)` envelopes; the executor
//! drains them on the host thread. Ordering is FIFO across all producers.
//! The default queue is unbounded and never refuses a command; a bounded
//! variant rejects when full instead of applying backpressure.

use std::fmt;
use std::num::NonZeroUsize;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};

use crate::protocol::Command;
use crate::registry::RequestId;

#[derive(Debug)]
pub struct Envelope {
    pub request_id: RequestId,
    pub command: Command,
    pub enqueued_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    Full { capacity: usize },
}

impl fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Full { capacity } => {
                write!(f, "command queue full ({capacity} pending)")
            }
        }
    }
}

impl std::error::Error for EnqueueError {}

pub struct CommandQueue {
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
    capacity: Option<NonZeroUsize>,
}

impl CommandQueue {
    pub fn unbounded() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            capacity: None,
        }
    }

    pub fn bounded(capacity: NonZeroUsize) -> Self {
        let (tx, rx) = bounded(capacity.get());
        Self {
            tx,
            rx,
            capacity: Some(capacity),
        }
    }

    pub fn with_capacity(capacity: Option<NonZeroUsize>) -> Self {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Self::unbounded(),
        }
    }

    /// Appends a command. Never blocks; only a bounded queue can refuse.
    pub fn enqueue(&self, request_id: RequestId, command: Command) -> Result<(), EnqueueError> {
        let envelope = Envelope {
            request_id,
            command,
            enqueued_at: Instant::now(),
        };
        match self.tx.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EnqueueError::Full {
                capacity: self.capacity.map_or(0, NonZeroUsize::get),
            }),
            // Both ends live in `self`, so the channel cannot be disconnected
            // while anyone can still call this.
            Err(TrySendError::Disconnected(_)) => Ok(()),
        }
    }

    /// Takes everything queued so far, oldest first, without blocking.
    ///
    /// At most `limit` entries are taken when a limit is given. Entries that
    /// arrive while draining are left for the next call, so one drain is
    /// bounded by the queue length at the moment it started.
    pub fn drain_available(&self, limit: Option<usize>) -> Vec<Envelope> {
        let present = self.rx.len();
        let take = limit.map_or(present, |limit| limit.min(present));
        self.rx.try_iter().take(take).collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
