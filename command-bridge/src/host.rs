//! A stand-in for the host's periodic callback.
//!
//! Real hosts call [`Dispatcher::tick`] from a timer they own. This loop does
//! the same on whatever thread runs it, at a fixed cadence, until stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::executor::{CommandExecutor, Dispatcher};

pub struct HostLoop {
    interval: Duration,
    stop: Arc<AtomicBool>,
}

/// Cloneable stop switch for a running [`HostLoop`].
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl HostLoop {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop))
    }

    /// Ticks `dispatcher` every interval until a stop handle fires.
    pub fn run<E: CommandExecutor>(&self, dispatcher: &mut Dispatcher<E>) {
        info!(interval = ?self.interval, "host loop running");
        while !self.stop.load(Ordering::Acquire) {
            let started = Instant::now();
            let report = dispatcher.tick();
            let elapsed = started.elapsed();
            if elapsed > self.interval {
                debug!(?elapsed, executed = report.executed, "tick overran its interval");
            }
            thread::sleep(self.interval.saturating_sub(elapsed));
        }
        info!(executed = dispatcher.executed(), "host loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;
    use crate::protocol::{Command, Reply};
    use crate::queue::CommandQueue;
    use crate::registry::CorrelationRegistry;

    struct Nop;

    impl CommandExecutor for Nop {
        fn execute(&mut self, _command: &Command) -> Reply {
            Reply::ok()
        }
    }

    #[test]
    fn loop_ticks_until_stopped() {
        let queue = Arc::new(CommandQueue::unbounded());
        let registry = Arc::new(CorrelationRegistry::new());
        let slot = registry.create();
        queue
            .enqueue(slot.id(), Command::new("anything", Map::new()))
            .expect("enqueue");

        let host = HostLoop::new(Duration::from_millis(1));
        let stop = host.stop_handle();
        let runner = thread::spawn(move || {
            let mut dispatcher = Dispatcher::new(Nop, queue, registry, None);
            host.run(&mut dispatcher);
            dispatcher.executed()
        });

        assert!(slot.wait(Duration::from_secs(2)).expect("reply").is_ok());
        stop.stop();
        assert_eq!(runner.join().expect("host thread"), 1);
    }
}
