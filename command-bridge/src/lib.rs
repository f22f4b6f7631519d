//! Thread-safe bridge between network clients and a single-threaded host.
//!
//! Clients send newline-delimited JSON commands over TCP. Every command is
//! executed on one privileged thread, the one that calls
//! [`executor::Dispatcher::tick`], in global arrival order, and each client
//! gets back exactly the reply to its own request.
//!
//! - [`protocol`] defines commands, replies and request parsing.
//! - [`frame`] reassembles newline-delimited frames from partial reads.
//! - [`queue`] is the multi-producer, single-consumer command queue.
//! - [`registry`] correlates request ids with single-use result slots.
//! - [`executor`] holds the collaborator trait and the tick-driven dispatcher.
//! - [`table`] builds static action tables over host state.
//! - `connection` serves one socket with a reader and writer thread.
//! - [`server`] binds, accepts, and owns the server lifecycle.
//! - [`config`] and [`cli`] describe the configuration surface.
//! - [`client`] is a blocking client for tools and tests.
//! - [`session`] and [`host`] provide a demo host for the binary.
//!
//! Integration tests under `tests/` drive a real server over loopback TCP.

pub mod cli;
pub mod client;
pub mod config;
mod connection;
pub mod executor;
pub mod frame;
pub mod host;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod server;
pub mod session;
pub mod table;

pub use config::BridgeConfig;
pub use executor::{CommandExecutor, Dispatcher};
pub use protocol::{Command, Reply};
pub use server::{Server, ServerHandle};
