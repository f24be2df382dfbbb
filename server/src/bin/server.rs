use clap::Parser;
use r2_net::config::EndpointConfig;
use r2_net::logging::terminal_logger;
use r2_net::queue::InboundEvent;
use r2_net::Server;
use slog::info;

#[derive(Parser)]
#[command(name = "r2-server", about = "Reliable UDP transport server")]
struct Args {
    /// Path to a TOML config file. Falls back to built-in defaults for anything it omits.
    #[arg(long)]
    config: Option<String>,

    /// Overrides `bind_address` from the config file.
    #[arg(long)]
    bind: Option<String>,
}

fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EndpointConfig::from_toml_file(path).unwrap_or_else(|err| {
            eprintln!("failed to read config file {}: {}, using defaults", path, err);
            EndpointConfig::default()
        }),
        None => EndpointConfig::default(),
    };

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    let logger = terminal_logger(&config.log_level);
    info!(logger, "starting server"; "bind_address" => &config.bind_address);

    let (server, handle) = Server::bind(config, logger.clone()).expect("failed to bind server socket");

    loop {
        match handle.inbound_rx.recv() {
            Ok(InboundEvent::PeerConnected { peer_id, remote, name }) => {
                info!(logger, "peer joined"; "peer_id" => peer_id, "addr" => %remote, "name" => %name);
            }
            Ok(InboundEvent::PeerDisconnected { peer_id, reason }) => {
                info!(logger, "peer left"; "peer_id" => peer_id, "reason" => %reason);
            }
            Ok(InboundEvent::Component(peer_id, update)) => {
                info!(logger, "component update"; "peer_id" => peer_id, "key" => &update.component_key);
            }
            Ok(InboundEvent::Event(peer_id, update)) => {
                info!(logger, "event"; "peer_id" => peer_id, "event_id" => &update.event_id);
            }
            Err(_) => break,
        }
    }

    server.shutdown();
}
