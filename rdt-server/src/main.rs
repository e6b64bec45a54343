mod cli;
mod logging;
mod peer;
mod server;

use std::sync::Arc;

use clap::Parser;

use server::Server;

/// Reliable data transport server.
#[derive(Parser, Debug)]
#[command(name = "rdt-server", author = "Bush Hammer Industries", version)]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port to bind.
    #[arg(long, default_value_t = 8888)]
    port: u16,

    /// Enable debug-level logging.
    #[arg(long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();
    let log = logging::init(args.debug);

    let server = Arc::new(Server::new(args.host.clone(), args.port, log.clone()));

    if let Err(err) = server.start() {
        eprintln!("failed to start server on {}:{}: {}", args.host, args.port, err);
        std::process::exit(1);
    }

    cli::run(&server);
    server.stop();
}
