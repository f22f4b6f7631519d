//! Listener and server lifecycle.
//!
//! [`Server::start`] binds the socket, spawns the accept thread and returns
//! two halves: a [`ServerHandle`] for the embedding code and the
//! [`Dispatcher`] that the host must drive from its own thread. The server
//! never calls `tick` itself.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::connection::{self, Shared};
use crate::executor::{CommandExecutor, Dispatcher};
use crate::frame::write_frame;
use crate::protocol::Reply;
use crate::queue::CommandQueue;
use crate::registry::CorrelationRegistry;

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Admission check run for every accepted peer before a handler is spawned.
pub trait ConnectionGate: Send + Sync + 'static {
    fn admit(&self, peer: &SocketAddr) -> bool;
}

impl<F> ConnectionGate for F
where
    F: Fn(&SocketAddr) -> bool + Send + Sync + 'static,
{
    fn admit(&self, peer: &SocketAddr) -> bool {
        self(peer)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ConnectionGate for AllowAll {
    fn admit(&self, _peer: &SocketAddr) -> bool {
        true
    }
}

/// Refuses any peer that is not on a loopback address.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackOnly;

impl ConnectionGate for LoopbackOnly {
    fn admit(&self, peer: &SocketAddr) -> bool {
        peer.ip().is_loopback()
    }
}

pub struct Server {
    config: BridgeConfig,
    gate: Arc<dyn ConnectionGate>,
}

impl Server {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            gate: Arc::new(AllowAll),
        }
    }

    pub fn gate(mut self, gate: impl ConnectionGate) -> Self {
        self.gate = Arc::new(gate);
        self
    }

    /// Binds and starts accepting. A bind failure is the only fatal error.
    pub fn start<E: CommandExecutor>(self, executor: E) -> Result<(ServerHandle, Dispatcher<E>)> {
        let config = self.config;
        let listener = TcpListener::bind(config.listen)
            .with_context(|| format!("failed to bind {}", config.listen))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read listener address")?;

        let queue = Arc::new(CommandQueue::with_capacity(config.queue_capacity));
        let registry = Arc::new(CorrelationRegistry::new());
        let shared = Arc::new(Shared {
            queue: Arc::clone(&queue),
            registry: Arc::clone(&registry),
            actions: executor.actions().map(|actions| actions.with_builtins()),
            request_timeout: config.request_timeout,
            idle_poll: config.idle_poll,
            running: AtomicBool::new(true),
        });
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_thread = thread::Builder::new()
            .name("bridge-listener".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                let connections = Arc::clone(&connections);
                let gate = self.gate;
                move || accept_loop(listener, shared, gate, connections)
            })
            .context("failed to spawn listener thread")?;

        let dispatcher = Dispatcher::new(executor, queue, registry, config.max_per_tick);
        let handle = ServerHandle {
            local_addr,
            shared,
            connections,
            accept_thread: Some(accept_thread),
        };
        Ok((handle, dispatcher))
    }
}

fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    gate: Arc<dyn ConnectionGate>,
    connections: Arc<AtomicUsize>,
) {
    for stream in listener.incoming() {
        if !shared.running.load(Ordering::Acquire) {
            break;
        }

        let mut stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = ?err, "failed to accept connection");
                continue;
            }
        };
        let peer = match stream.peer_addr() {
            Ok(peer) => peer,
            Err(err) => {
                debug!(error = ?err, "peer vanished before it could be served");
                continue;
            }
        };

        if !gate.admit(&peer) {
            warn!(%peer, "connection refused");
            let _ = write_frame(&mut stream, &Reply::error("connection refused"));
            continue;
        }

        let shared = Arc::clone(&shared);
        let active = Arc::clone(&connections);
        active.fetch_add(1, Ordering::AcqRel);
        let spawned = thread::Builder::new()
            .name(format!("bridge-conn-{peer}"))
            .spawn(move || {
                if let Err(err) = connection::serve(stream, peer, shared) {
                    warn!(%peer, error = ?err, "client connection closed with error");
                }
                active.fetch_sub(1, Ordering::AcqRel);
            });
        if let Err(err) = spawned {
            connections.fetch_sub(1, Ordering::AcqRel);
            warn!(%peer, error = ?err, "failed to spawn connection handler");
        }
    }
    info!("listener stopped");
}

/// Control surface of a running server. Dropping it shuts the server down.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    connections: Arc<AtomicUsize>,
    accept_thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Correlation slots currently waiting for a result.
    pub fn live_slots(&self) -> usize {
        self.shared.registry.live()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// Stops accepting and asks every connection to close.
    ///
    /// Returns once the listener thread has exited. Connections notice within
    /// one idle poll interval and discard whatever they still had in flight.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(addr = %self.local_addr, "shutting down");

        // `incoming()` only returns on a new connection; make one.
        if let Err(err) = TcpStream::connect_timeout(&wake_addr(self.local_addr), WAKE_TIMEOUT) {
            debug!(error = ?err, "failed to wake listener");
        }
        if let Some(accept_thread) = self.accept_thread.take() {
            if accept_thread.join().is_err() {
                warn!("listener thread panicked");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wake_addr(local: SocketAddr) -> SocketAddr {
    match local {
        SocketAddr::V4(addr) if addr.ip().is_unspecified() => {
            SocketAddr::from((Ipv4Addr::LOCALHOST, addr.port()))
        }
        SocketAddr::V6(addr) if addr.ip().is_unspecified() => {
            SocketAddr::from((Ipv6Addr::LOCALHOST, addr.port()))
        }
        other => other,
    }
}
