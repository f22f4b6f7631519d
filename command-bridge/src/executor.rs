//! The executor loop: the only consumer of the command queue.
//!
//! [`Dispatcher::tick`] is a plain synchronous call with no threads or timers
//! of its own. The embedding host calls it from whatever periodic callback it
//! already runs on its privileged thread; each call drains the queue, runs
//! the commands in arrival order, and publishes every result to the
//! correlation registry.

use std::any::Any;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::protocol::{Command, Reply};
use crate::queue::CommandQueue;
use crate::registry::CorrelationRegistry;

/// Actions answered by the dispatcher itself.
pub const BUILTIN_ACTIONS: [&str; 2] = ["ping", "health_check"];

/// The host-side collaborator that turns a command into a reply.
///
/// Only ever called from the thread running [`Dispatcher::tick`]. Failures
/// should come back as `Reply::error`; a panic is caught and converted, but
/// is logged as a bug in the executor.
pub trait CommandExecutor {
    fn execute(&mut self, command: &Command) -> Reply;

    /// The actions this executor understands, if it can list them.
    ///
    /// When `Some`, connections reject other actions before queueing them.
    fn actions(&self) -> Option<ActionSet> {
        None
    }
}

/// Immutable set of action names, cheap to clone across threads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSet(Arc<BTreeSet<String>>);

impl ActionSet {
    pub fn contains(&self, action: &str) -> bool {
        self.0.contains(action)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// This set plus the dispatcher's built-in actions.
    pub fn with_builtins(&self) -> Self {
        self.names().chain(BUILTIN_ACTIONS).collect()
    }
}

impl<S: Into<String>> FromIterator<S> for ActionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(Arc::new(iter.into_iter().map(Into::into).collect()))
    }
}

/// What one [`Dispatcher::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub executed: usize,
    /// Results handed to a waiting connection.
    pub delivered: usize,
    /// Results whose requester was already gone.
    pub abandoned: usize,
}

pub struct Dispatcher<E> {
    executor: E,
    queue: Arc<CommandQueue>,
    registry: Arc<CorrelationRegistry>,
    max_per_tick: Option<NonZeroUsize>,
    action_count: Option<usize>,
    executed: u64,
}

impl<E: CommandExecutor> Dispatcher<E> {
    pub fn new(
        executor: E,
        queue: Arc<CommandQueue>,
        registry: Arc<CorrelationRegistry>,
        max_per_tick: Option<NonZeroUsize>,
    ) -> Self {
        let action_count = executor.actions().map(|actions| actions.len());
        Self {
            executor,
            queue,
            registry,
            max_per_tick,
            action_count,
            executed: 0,
        }
    }

    /// Runs one drain-and-execute pass. Returns immediately on an empty queue.
    pub fn tick(&mut self) -> TickReport {
        let batch = self.queue.drain_available(self.max_per_tick.map(NonZeroUsize::get));
        if batch.is_empty() {
            return TickReport::default();
        }

        let started = Instant::now();
        let mut report = TickReport::default();
        for envelope in batch {
            trace!(
                request_id = envelope.request_id,
                action = envelope.command.action(),
                queued_for = ?envelope.enqueued_at.elapsed(),
                "executing command"
            );
            let reply = self.run(&envelope.command);
            report.executed += 1;
            self.executed += 1;

            if self.registry.fulfill(envelope.request_id, reply) {
                report.delivered += 1;
            } else {
                report.abandoned += 1;
            }
        }

        debug!(
            executed = report.executed,
            abandoned = report.abandoned,
            remaining = self.queue.len(),
            elapsed = ?started.elapsed(),
            "tick finished"
        );
        report
    }

    fn run(&mut self, command: &Command) -> Reply {
        if let Some(reply) = self.builtin(command) {
            return reply;
        }

        let executor = &mut self.executor;
        match panic::catch_unwind(AssertUnwindSafe(|| executor.execute(command))) {
            Ok(reply) => reply,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(action = command.action(), %message, "executor panicked");
                Reply::error(message)
            }
        }
    }

    fn builtin(&self, command: &Command) -> Option<Reply> {
        match command.action() {
            "ping" => Some(Reply::ok().with("message", "pong")),
            "health_check" => {
                let action_count = self
                    .action_count
                    .map_or(Value::Null, |count| Value::from(count + BUILTIN_ACTIONS.len()));
                Some(
                    Reply::ok()
                        .with("message", "command bridge running")
                        .with("action_count", action_count)
                        .with("queue_size", self.queue.len())
                        .with("executed", self.executed),
                )
            }
            _ => None,
        }
    }

    /// Total commands executed since construction.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn into_executor(self) -> E {
        self.executor
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "command panicked".to_string()
    }
}
