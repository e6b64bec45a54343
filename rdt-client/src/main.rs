mod cli;
mod client;
mod logging;

use clap::Parser;

use client::{Client, ClientConfig};
use rdt_core::config;
use rdt_core::protocol::OperationMode;

/// Reliable data transport client.
#[derive(Parser, Debug)]
#[command(name = "rdt-client", author = "Bush Hammer Industries", version)]
struct Args {
    /// Server address to connect to.
    #[arg(default_value = "localhost")]
    host: String,

    /// Server port to connect to.
    #[arg(default_value_t = 8888)]
    port: u16,

    /// Maximum application message size offered during handshake.
    #[arg(long = "max-size", default_value_t = config::DEFAULT_MAX_MESSAGE_SIZE)]
    max_size: usize,

    /// Flow-control mode requested during handshake.
    #[arg(long, value_parser = ["GO_BACK_N", "SELECTIVE_REPEAT"], default_value = "GO_BACK_N")]
    mode: String,

    /// Enable payload encryption.
    #[arg(long)]
    encrypt: bool,

    /// Enable fault injection from startup.
    #[arg(long = "error-sim")]
    error_sim: bool,

    /// Fault injection strategy.
    #[arg(long = "error-type", value_parser = ["random", "bit_flip", "character_change"], default_value = "random")]
    error_type: String,

    /// Fault injection probability (0.0-1.0).
    #[arg(long = "error-prob", default_value_t = 0.1)]
    error_prob: f64,

    /// Characters per packet (1-4).
    #[arg(long = "chunk-size", default_value_t = config::MAX_PAYLOAD_SIZE)]
    chunk_size: usize,

    /// Enable debug-level logging.
    #[arg(long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();
    let log = logging::init(args.debug);

    let operation_mode = match args.mode.as_str() {
        "SELECTIVE_REPEAT" => OperationMode::SelectiveRepeat,
        _ => OperationMode::GoBackN,
    };

    let client_config = ClientConfig {
        host: args.host.clone(),
        port: args.port,
        max_message_size: args.max_size,
        operation_mode,
        encryption_enabled: args.encrypt,
        chunk_size: args.chunk_size.clamp(1, config::MAX_PAYLOAD_SIZE),
    };

    let mut client = match Client::connect(client_config, log.clone()) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("failed to connect to {}:{}: {}", args.host, args.port, err);
            std::process::exit(1);
        }
    };

    if let Err(err) = client.handshake() {
        eprintln!("handshake failed: {}", err);
        client.disconnect();
        std::process::exit(1);
    }

    if args.error_sim {
        let kind = match args.error_type.as_str() {
            "bit_flip" => rdt_core::fault::ErrorKind::BitFlip,
            "character_change" => rdt_core::fault::ErrorKind::CharacterChange,
            _ => rdt_core::fault::ErrorKind::Random,
        };
        client.set_error_simulation(true, kind, args.error_prob);
    }

    cli::run(&client);
    client.disconnect();
}
