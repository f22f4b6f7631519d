//! Command-line surface of the `command-bridge` binary.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};

use crate::config::BridgeConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log filter (e.g. `debug`, `command_bridge=trace`). Overrides RUST_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the bridge, driving a demo session on the main thread.
    Serve(ServeArgs),
    /// Send one command to a running bridge and print the reply.
    Send(SendArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:9004")]
    pub listen: SocketAddr,

    /// How long a connection waits for one command's result.
    #[arg(long, default_value_t = 25_000)]
    pub timeout_ms: u64,

    /// Socket poll interval used to notice shutdown.
    #[arg(long, default_value_t = 500)]
    pub idle_poll_ms: u64,

    /// Reject commands once this many are queued (unbounded by default).
    #[arg(long)]
    pub queue_capacity: Option<NonZeroUsize>,

    /// Execute at most this many commands per host tick (all by default).
    #[arg(long)]
    pub max_per_tick: Option<NonZeroUsize>,

    /// Host tick interval.
    #[arg(long, default_value_t = 16)]
    pub tick_ms: u64,

    /// Accept peers that are not on a loopback address.
    #[arg(long)]
    pub allow_remote: bool,
}

impl ServeArgs {
    pub fn config(&self) -> BridgeConfig {
        BridgeConfig {
            listen: self.listen,
            request_timeout: Duration::from_millis(self.timeout_ms),
            idle_poll: Duration::from_millis(self.idle_poll_ms),
            queue_capacity: self.queue_capacity,
            max_per_tick: self.max_per_tick,
            tick_interval: Duration::from_millis(self.tick_ms),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Address of the bridge to connect to.
    #[arg(long, default_value = "127.0.0.1:9004")]
    pub server: SocketAddr,

    /// Connect and reply timeout.
    #[arg(long, default_value_t = 30_000)]
    pub timeout_ms: u64,

    /// Action to run, e.g. `ping` or `set_tempo`.
    pub action: String,

    /// Parameters as `key=value`. Values are parsed as JSON when possible.
    #[arg(value_parser = parse_param)]
    pub params: Vec<(String, Value)>,
}

impl SendArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The request document this invocation describes.
    pub fn request(&self) -> Value {
        let mut fields: Map<String, Value> = self.params.iter().cloned().collect();
        fields.insert("action".to_string(), Value::String(self.action.clone()));
        Value::Object(fields)
    }
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
