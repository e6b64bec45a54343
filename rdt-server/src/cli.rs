//! Interactive admin command loop, grounded on `server.py`'s
//! `_handle_user_input`.

use std::io::{self, BufRead, Write};

use rdt_core::protocol::OperationMode;

use crate::server::Server;

pub fn run(server: &Server) {
    println!("Commands:");
    println!("  stats                                  show server statistics");
    println!("  clients                                list connected clients");
    println!("  config                                 show current configuration");
    println!("  error <probability>                    set simulated packet loss (0.0-1.0)");
    println!("  window <size>                           set window size (1-5)");
    println!("  mode <GO_BACK_N|SELECTIVE_REPEAT>       set flow-control mode for new handshakes");
    println!("  quit                                    stop the server");

    let stdin = io::stdin();
    loop {
        print!("server> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim();

        if line.eq_ignore_ascii_case("quit") {
            break;
        } else if line.eq_ignore_ascii_case("stats") {
            print_stats(server);
        } else if line.eq_ignore_ascii_case("clients") {
            print_clients(server);
        } else if line.eq_ignore_ascii_case("config") {
            print_config(server);
        } else if let Some(rest) = line.strip_prefix("error ") {
            set_error(server, rest.trim());
        } else if let Some(rest) = line.strip_prefix("window ") {
            set_window(server, rest.trim());
        } else if let Some(rest) = line.strip_prefix("mode ") {
            set_mode(server, rest.trim());
        } else if !line.is_empty() {
            println!("unrecognized command");
        }
    }
}

fn print_stats(server: &Server) {
    let stats = server.stats();
    println!("Server statistics:");
    println!("  total connections:   {}", stats.total_connections);
    println!("  active connections:  {}", stats.active_connections);
    println!("  messages received:   {}", stats.messages_received);
    println!("  bytes received:      {}", stats.bytes_received);
    println!("  errors detected:     {}", stats.errors_detected);
}

fn print_clients(server: &Server) {
    let peers = server.list_peers();
    if peers.is_empty() {
        println!("no clients connected");
        return;
    }
    println!("connected clients:");
    for (address, uptime) in peers {
        println!("  {} (connected {:.1}s)", address, uptime);
    }
}

fn print_config(server: &Server) {
    let (host, port, window_size, mode, loss_probability) = server.config_summary();
    println!("configuration:");
    println!("  host:                {}", host);
    println!("  port:                {}", port);
    println!("  window size:         {}", window_size);
    println!("  operation mode:      {:?}", mode);
    println!("  packet loss prob.:   {}", loss_probability);
}

fn set_error(server: &Server, arg: &str) {
    match arg.parse::<f64>() {
        Ok(prob) if (0.0..=1.0).contains(&prob) => {
            server.set_packet_loss_probability(prob);
            println!("packet loss probability set to {}", prob);
        }
        Ok(_) => println!("probability must be between 0.0 and 1.0"),
        Err(_) => println!("usage: error <probability>"),
    }
}

fn set_window(server: &Server, arg: &str) {
    match arg.parse::<u32>() {
        Ok(size) if server.set_window_size(size) => println!("window size set to {}", size),
        Ok(_) => println!("window size must be between 1 and 5"),
        Err(_) => println!("usage: window <size>"),
    }
}

fn set_mode(server: &Server, arg: &str) {
    match arg.to_ascii_uppercase().as_str() {
        "GO_BACK_N" => {
            server.set_operation_mode(OperationMode::GoBackN);
            println!("operation mode set to GO_BACK_N");
        }
        "SELECTIVE_REPEAT" => {
            server.set_operation_mode(OperationMode::SelectiveRepeat);
            println!("operation mode set to SELECTIVE_REPEAT");
        }
        _ => println!("usage: mode <GO_BACK_N|SELECTIVE_REPEAT>"),
    }
}
