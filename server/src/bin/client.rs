use clap::Parser;
use r2_net::config::EndpointConfig;
use r2_net::logging::terminal_logger;
use r2_net::queue::{InboundEvent, OutboundCommand, Target};
use r2_net::wire::EventUpdate;
use r2_net::Client;
use slog::info;

#[derive(Parser)]
#[command(name = "r2-client", about = "Reliable UDP transport client")]
struct Args {
    /// Address of the server to connect to.
    #[arg(long)]
    server: String,

    /// Player name presented in CONNECT.
    #[arg(long, default_value = "player")]
    name: String,

    /// Client-chosen user id carried in GETCHALLENGE.
    #[arg(long, default_value_t = 1)]
    user_id: u32,

    #[arg(long)]
    config: Option<String>,
}

fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EndpointConfig::from_toml_file(path).unwrap_or_else(|err| {
            eprintln!("failed to read config file {}: {}, using defaults", path, err);
            EndpointConfig::default()
        }),
        None => EndpointConfig::default(),
    };

    let logger = terminal_logger(&config.log_level);
    info!(logger, "connecting"; "server" => &args.server);

    let (client, handle) = Client::connect(config, &args.server, args.user_id, args.name, logger.clone())
        .expect("failed to start client socket");

    handle
        .outbound_tx
        .send(OutboundCommand::Event(
            Target::Broadcast,
            EventUpdate { event_id: "hello".into(), data: Vec::new() },
        ))
        .ok();

    loop {
        match handle.inbound_rx.recv() {
            Ok(InboundEvent::PeerConnected { peer_id, .. }) => {
                info!(logger, "connected"; "peer_id" => peer_id);
            }
            Ok(InboundEvent::PeerDisconnected { reason, .. }) => {
                info!(logger, "disconnected"; "reason" => %reason);
                break;
            }
            Ok(InboundEvent::Component(_, update)) => {
                info!(logger, "component update"; "key" => &update.component_key);
            }
            Ok(InboundEvent::Event(_, update)) => {
                info!(logger, "event"; "event_id" => &update.event_id);
            }
            Err(_) => break,
        }
    }

    client.shutdown();
}
