//! Per-connection handling.
//!
//! Each accepted socket gets a reader (the thread the listener spawned) and a
//! writer thread. The reader turns frames into queued commands and hands the
//! writer one [`Outbound`] per request, in the order the requests arrived.
//! The writer waits on each slot in turn and writes the replies back, so a
//! client may pipeline as many requests as it likes and still read the
//! answers in request order.
//!
//! A peer that half-closes its socket after sending still gets every reply it
//! is owed: the writer drains what the reader handed it, each slot bounded by
//! the request timeout. A read error, a failed write or server shutdown fires
//! the close signal instead; the writer wakes at once, and every slot still
//! in flight for this connection is dropped and thereby discarded.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, select, unbounded};
use tracing::{debug, info, warn};

use crate::executor::ActionSet;
use crate::frame::{FrameReader, is_timeout, write_frame};
use crate::protocol::{Reply, parse_request};
use crate::queue::CommandQueue;
use crate::registry::{AwaitError, CorrelationRegistry, Slot};

/// State every connection of one server shares.
#[derive(Debug)]
pub(crate) struct Shared {
    pub queue: Arc<CommandQueue>,
    pub registry: Arc<CorrelationRegistry>,
    /// Accepted actions, built-ins included. `None` lets everything through.
    pub actions: Option<ActionSet>,
    pub request_timeout: Duration,
    pub idle_poll: Duration,
    pub running: AtomicBool,
}

/// One unit of work for the writer, in request order.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Answered locally without touching the queue.
    Ready(Reply),
    /// Queued; the reply arrives through the slot.
    Pending(Slot),
}

/// How the reader stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadEnd {
    /// The peer finished sending; replies already owed are still written.
    Eof,
    /// Shutdown began or the writer gave up; nothing more is written.
    Abort,
}

/// Serves one client until it disconnects or the server shuts down.
pub(crate) fn serve(stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) -> io::Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(shared.idle_poll))?;
    stream.set_write_timeout(Some(shared.request_timeout))?;

    let write_half = stream.try_clone()?;
    let (outbound_tx, outbound_rx) = unbounded();
    let (closed_tx, closed_rx) = bounded::<()>(0);
    let (done_tx, done_rx) = bounded::<()>(0);
    let request_timeout = shared.request_timeout;
    let writer = thread::Builder::new()
        .name(format!("bridge-writer-{peer}"))
        .spawn(move || {
            let _done = done_tx;
            write_loop(write_half, peer, outbound_rx, closed_rx, request_timeout)
        })?;

    info!(%peer, "client connected");
    let result = read_loop(&stream, &shared, &outbound_tx);
    drop(outbound_tx);

    if matches!(result, Ok(ReadEnd::Eof)) {
        debug!(%peer, "peer finished sending; flushing owed replies");
        wait_for_writer(&done_rx, &shared);
    }
    drop(closed_tx);

    if writer.join().is_err() {
        warn!(%peer, "connection writer panicked");
    }
    info!(%peer, "client disconnected");
    result.map(|_| ())
}

/// Blocks until the writer has nothing left to send, or the server stops.
fn wait_for_writer(done: &Receiver<()>, shared: &Shared) {
    while shared.running.load(Ordering::Acquire) {
        match done.recv_timeout(shared.idle_poll) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn read_loop(
    stream: &TcpStream,
    shared: &Shared,
    outbound: &Sender<Outbound>,
) -> io::Result<ReadEnd> {
    let mut reader = FrameReader::new(stream);
    loop {
        let read = reader.read_frame();
        // Frames that arrive after shutdown began are not accepted.
        if !shared.running.load(Ordering::Acquire) {
            debug!("server stopping; closing connection");
            return Ok(ReadEnd::Abort);
        }

        let frame = match read {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(ReadEnd::Eof),
            // Idle poll interval elapsed; quiet clients are never dropped.
            Err(err) if is_timeout(&err) => continue,
            Err(err) => return Err(err),
        };

        if outbound.send(accept_frame(&frame, shared)).is_err() {
            // Writer already gave up on this socket.
            return Ok(ReadEnd::Abort);
        }
    }
}

/// Validates one frame and, when it is a runnable command, queues it.
pub(crate) fn accept_frame(frame: &[u8], shared: &Shared) -> Outbound {
    let command = match parse_request(frame) {
        Ok(command) => command,
        Err(err) => {
            debug!(%err, "rejected request");
            return Outbound::Ready(err.into());
        }
    };

    if let Some(actions) = &shared.actions {
        if !actions.contains(command.action()) {
            debug!(action = command.action(), "unknown action");
            return Outbound::Ready(Reply::unknown_action(command.action(), actions.names()));
        }
    }

    let slot = shared.registry.create();
    match shared.queue.enqueue(slot.id(), command) {
        Ok(()) => Outbound::Pending(slot),
        Err(err) => {
            warn!(%err, "command rejected");
            Outbound::Ready(Reply::error(err.to_string()))
        }
    }
}

fn write_loop(
    mut stream: TcpStream,
    peer: SocketAddr,
    outbound: Receiver<Outbound>,
    closed: Receiver<()>,
    request_timeout: Duration,
) {
    loop {
        let next = select! {
            recv(outbound) -> next => match next {
                Ok(next) => next,
                Err(_) => return,
            },
            recv(closed) -> _ => return,
        };

        let reply = match next {
            Outbound::Ready(reply) => reply,
            Outbound::Pending(slot) => {
                let remaining = request_timeout.saturating_sub(slot.age());
                match slot.wait_or_closed(remaining, &closed) {
                    Ok(reply) => reply,
                    Err(AwaitError::Closed) => return,
                    Err(err) => {
                        warn!(%peer, request_id = slot.id(), %err, "no result for request");
                        Reply::error(err.to_string())
                    }
                }
            }
        };

        if let Err(err) = write_frame(&mut stream, &reply) {
            debug!(%peer, error = ?err, "failed to write reply");
            // Wakes the reader so the whole connection winds down.
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use serde_json::json;

    use super::*;

    fn shared(actions: Option<ActionSet>, capacity: Option<NonZeroUsize>) -> Shared {
        Shared {
            queue: Arc::new(CommandQueue::with_capacity(capacity)),
            registry: Arc::new(CorrelationRegistry::new()),
            actions,
            request_timeout: Duration::from_secs(1),
            idle_poll: Duration::from_millis(50),
            running: AtomicBool::new(true),
        }
    }

    fn ready(outbound: Outbound) -> Reply {
        match outbound {
            Outbound::Ready(reply) => reply,
            Outbound::Pending(slot) => panic!("expected a local reply, got slot {}", slot.id()),
        }
    }

    #[test]
    fn malformed_frames_never_reach_the_queue() {
        let shared = shared(None, None);
        let reply = ready(accept_frame(b"not json", &shared));
        assert_eq!(reply.error_message(), Some("invalid request"));
        let reply = ready(accept_frame(br#"{"value":1}"#, &shared));
        assert_eq!(reply.error_message(), Some("missing action"));
        assert!(shared.queue.is_empty());
        assert_eq!(shared.registry.live(), 0);
    }

    #[test]
    fn valid_frames_are_queued_with_a_live_slot() {
        let shared = shared(None, None);
        let Outbound::Pending(slot) = accept_frame(br#"{"action":"echo","value":"hi"}"#, &shared)
        else {
            panic!("expected a queued command");
        };
        assert_eq!(shared.registry.live(), 1);

        let queued = shared.queue.drain_available(None);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].request_id, slot.id());
        assert_eq!(queued[0].command.params().get("value"), Some(&json!("hi")));

        drop(slot);
        assert_eq!(shared.registry.live(), 0);
    }

    #[test]
    fn unknown_actions_are_rejected_when_the_catalog_is_known() {
        let actions: ActionSet = ["echo"].into_iter().collect();
        let shared = shared(Some(actions.with_builtins()), None);
        let reply = ready(accept_frame(br#"{"action":"fly"}"#, &shared));
        assert_eq!(reply.error_message(), Some("Unknown action: fly"));
        assert_eq!(
            reply.get("available_actions"),
            Some(&json!(["echo", "health_check", "ping"]))
        );
        assert!(shared.queue.is_empty());
    }

    #[test]
    fn full_queue_answers_immediately_and_frees_the_slot() {
        let shared = shared(None, NonZeroUsize::new(1));
        let first = accept_frame(br#"{"action":"a"}"#, &shared);
        assert!(matches!(first, Outbound::Pending(_)));

        let reply = ready(accept_frame(br#"{"action":"b"}"#, &shared));
        assert!(
            reply
                .error_message()
                .is_some_and(|message| message.starts_with("command queue full"))
        );
        assert_eq!(shared.registry.live(), 1);
        assert_eq!(shared.queue.len(), 1);
    }
}
