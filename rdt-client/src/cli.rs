//! Interactive command loop, grounded on `client.py`'s `main()` REPL:
//! a bare line sends a message, `stats`/`error`/`error-plan`/`quit` are
//! the admin commands.

use std::io::{self, BufRead, Write};

use rdt_core::fault::ErrorKind;

use crate::client::Client;

fn parse_error_kind(token: &str) -> Option<ErrorKind> {
    match token {
        "random" => Some(ErrorKind::Random),
        "bit_flip" => Some(ErrorKind::BitFlip),
        "character_change" => Some(ErrorKind::CharacterChange),
        _ => None,
    }
}

pub fn run(client: &Client) {
    println!("Commands:");
    println!("  <text>                         send a message");
    println!("  stats                          show client/engine statistics");
    println!("  error <on|off>                 toggle probabilistic fault injection");
    println!("  error-plan <i,j,k> [char=N] [type=T]   deterministic corruption plan");
    println!("  quit                           disconnect and exit");

    let stdin = io::stdin();
    loop {
        print!("client> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim();

        if line.eq_ignore_ascii_case("quit") {
            break;
        } else if line.eq_ignore_ascii_case("stats") {
            print_stats(client);
        } else if let Some(rest) = line.strip_prefix("error ") {
            handle_error_toggle(client, rest.trim());
        } else if let Some(rest) = line.strip_prefix("error-plan ") {
            handle_error_plan(client, rest.trim());
        } else if !line.is_empty() {
            match client.send_message(line) {
                Ok(true) => println!("message sent"),
                Ok(false) => println!("message not sent"),
                Err(err) => println!("error sending message: {}", err),
            }
        }
    }
}

fn handle_error_toggle(client: &Client, arg: &str) {
    match arg.to_ascii_lowercase().as_str() {
        "on" => client.set_error_simulation(true, ErrorKind::Random, 0.1),
        "off" => client.set_error_simulation(false, ErrorKind::Random, 0.1),
        _ => println!("usage: error <on|off>"),
    }
}

fn handle_error_plan(client: &Client, arg: &str) {
    let mut tokens = arg.split_whitespace();
    let indices_token = match tokens.next() {
        Some(t) => t,
        None => {
            println!("usage: error-plan <i,j,k> [char=N] [type=T]");
            return;
        }
    };

    let indices: Result<Vec<usize>, _> = indices_token
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>())
        .collect();
    let indices = match indices {
        Ok(v) => v,
        Err(_) => {
            println!("packet indices must be integers, e.g. 0,2,5");
            return;
        }
    };

    let mut char_index = 0usize;
    let mut error_type = None;
    for token in tokens {
        if let Some(v) = token.strip_prefix("char=") {
            char_index = v.parse().unwrap_or(0);
        } else if let Some(v) = token.strip_prefix("type=") {
            error_type = parse_error_kind(v);
        }
    }

    client.set_deterministic_plan(indices, char_index, error_type);
    println!("deterministic error plan configured");
}

fn print_stats(client: &Client) {
    let (client_stats, engine_stats) = client.stats();
    println!("Client statistics:");
    println!("  messages sent:      {}", client_stats.messages_sent);
    println!("  packets sent:       {}", client_stats.packets_sent);
    println!("  bytes sent:         {}", client_stats.bytes_sent);
    println!("  retransmissions:    {}", client_stats.retransmissions);
    println!("  errors introduced:  {}", client_stats.errors_introduced);

    if let Some(stats) = engine_stats {
        println!("Engine statistics:");
        println!("  packets sent:       {}", stats.packets_sent);
        println!("  packets received:   {}", stats.packets_received);
        println!("  retransmissions:    {}", stats.retransmissions);
        println!("  errors detected:    {}", stats.errors_detected);
        println!("  duplicate packets:  {}", stats.duplicate_packets);
        println!("  pending count:      {}", stats.pending_count);
        println!("  window size:        {}", stats.window_size);
        println!("  mode:               {:?}", stats.mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_kind_recognizes_all_strategies() {
        assert_eq!(parse_error_kind("random"), Some(ErrorKind::Random));
        assert_eq!(parse_error_kind("bit_flip"), Some(ErrorKind::BitFlip));
        assert_eq!(parse_error_kind("character_change"), Some(ErrorKind::CharacterChange));
    }

    #[test]
    fn test_parse_error_kind_rejects_unknown_token() {
        assert_eq!(parse_error_kind("nonsense"), None);
    }
}
