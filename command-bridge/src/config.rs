//! Runtime settings shared by the listener, connections and host loop.

use std::net::{Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 9004;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(25);
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(500);
/// Roughly 60 host ticks per second.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Everything the listener, connections and host loop need to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub listen: SocketAddr,
    /// Upper bound a connection waits for one command's result.
    pub request_timeout: Duration,
    /// Socket read timeout; only used to notice shutdown, never to drop idle clients.
    pub idle_poll: Duration,
    /// `None` keeps the queue unbounded.
    pub queue_capacity: Option<NonZeroUsize>,
    /// `None` drains everything queued when a tick starts.
    pub max_per_tick: Option<NonZeroUsize>,
    pub tick_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            idle_poll: DEFAULT_IDLE_POLL,
            queue_capacity: None,
            max_per_tick: None,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}
