use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use command_bridge::{
    cli::{Cli, Command, ServeArgs},
    client,
    host::HostLoop,
    server::{LoopbackOnly, Server},
    session::{self, Session},
};

fn init_tracing(level: Option<&str>) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Command::Serve(args) => serve(args),
        Command::Send(args) => client::run(args),
    }
}

fn serve(args: ServeArgs) -> Result<()> {
    let config = args.config();
    let mut server = Server::new(config.clone());
    if !args.allow_remote {
        server = server.gate(LoopbackOnly);
    }

    let host = HostLoop::new(config.tick_interval);
    let stop = host.stop_handle();
    if let Err(err) = ctrlc::set_handler(move || stop.stop()) {
        warn!(error = ?err, "failed to install ctrl-c handler");
    }

    let executor = session::action_table().bind(Session::default());
    let (handle, mut dispatcher) = server.start(executor)?;
    info!("bridge listening on {}", handle.local_addr());

    // This thread plays the host: the session is only ever touched from here.
    host.run(&mut dispatcher);
    info!("bridge shutting down");
    handle.shutdown();
    info!("bridge stopped");
    Ok(())
}
