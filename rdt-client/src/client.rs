//! Client-side endpoint: connect, handshake, send, disconnect.
//!
//! Grounded on `original_source/src/client.py`'s `ReliableClient`; the
//! reader thread + `mpsc` handshake handoff replaces the Python
//! original's "poll an instance attribute set by another thread" loop
//! with a channel, which is the idiomatic Rust equivalent the teacher's
//! own code reaches for (`t51core`'s channel-based messagebus) rather
//! than shared flags.

use std::io;
use std::net::TcpStream;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use slog::{error, info, warn, Logger};

use rdt_core::checksum;
use rdt_core::cipher::CipherManager;
use rdt_core::config;
use rdt_core::fault::{self, CorruptionPlan, ErrorKind};
use rdt_core::protocol::{read_frame, write_frame, Message, MessageType, OperationMode};
use rdt_core::{Engine, EngineEvent};

#[derive(Debug, Clone, Copy, Default)]
pub struct ClientStats {
    pub messages_sent: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub retransmissions: u64,
    pub errors_introduced: u64,
}

/// Deterministic-plan-or-probabilistic fault configuration, mirroring
/// `client.py`'s `error_simulation` dict.
pub struct FaultConfig {
    pub enabled: bool,
    pub error_type: ErrorKind,
    pub probability: f64,
    pub deterministic_packets: Vec<usize>,
    pub deterministic_char_index: usize,
}

impl Default for FaultConfig {
    fn default() -> Self {
        FaultConfig {
            enabled: false,
            error_type: ErrorKind::Random,
            probability: 0.1,
            deterministic_packets: Vec::new(),
            deterministic_char_index: 0,
        }
    }
}

pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub max_message_size: usize,
    pub operation_mode: OperationMode,
    pub encryption_enabled: bool,
    pub chunk_size: usize,
}

pub struct Client {
    config: ClientConfig,
    writer: Arc<Mutex<TcpStream>>,
    engine_slot: Arc<Mutex<Option<Arc<Engine>>>>,
    reader: Option<thread::JoinHandle<()>>,
    handshake_rx: mpsc::Receiver<Message>,
    cipher: Option<CipherManager>,
    stats: Arc<Mutex<ClientStats>>,
    fault: Mutex<FaultConfig>,
    window_size: std::sync::atomic::AtomicU32,
    log: Logger,
}

impl Client {
    pub fn connect(config: ClientConfig, log: Logger) -> io::Result<Client> {
        let stream = TcpStream::connect((config.host.as_str(), config.port))?;
        let reader_stream = stream.try_clone()?;
        let writer = Arc::new(Mutex::new(stream));

        let (handshake_tx, handshake_rx) = mpsc::channel();
        let engine_slot: Arc<Mutex<Option<Arc<Engine>>>> = Arc::new(Mutex::new(None));
        let stats = Arc::new(Mutex::new(ClientStats::default()));

        let reader = spawn_reader(
            reader_stream,
            Arc::clone(&writer),
            Arc::clone(&engine_slot),
            Arc::clone(&stats),
            handshake_tx,
            log.clone(),
        );

        let cipher = if config.encryption_enabled {
            Some(CipherManager::generate())
        } else {
            None
        };

        info!(log, "connected"; "host" => config.host.clone(), "port" => config.port);

        Ok(Client {
            config,
            writer,
            engine_slot,
            reader: Some(reader),
            handshake_rx,
            cipher,
            stats,
            fault: Mutex::new(FaultConfig::default()),
            window_size: std::sync::atomic::AtomicU32::new(config::DEFAULT_WINDOW_SIZE),
            log,
        })
    }

    /// Sends the handshake request and blocks until the server accepts,
    /// rejects, or the handshake times out.
    pub fn handshake(&self) -> io::Result<()> {
        let key = self.cipher.as_ref().map(CipherManager::key_base64);
        let mut request = Message::handshake_request(
            self.config.max_message_size,
            self.config.operation_mode,
            self.config.encryption_enabled,
        );
        if let Some(key) = key {
            request
                .metadata
                .insert("encryption_key".into(), serde_json::Value::from(key));
        }

        self.write_message(&request)?;
        info!(self.log, "handshake sent";
            "max_message_size" => self.config.max_message_size,
            "mode" => format!("{:?}", self.config.operation_mode),
            "encrypt" => self.config.encryption_enabled);

        let response = self
            .handshake_rx
            .recv_timeout(Duration::from_secs(config::HANDSHAKE_TIMEOUT_SECS))
            .map_err(|err| match err {
                RecvTimeoutError::Timeout => io::Error::new(io::ErrorKind::TimedOut, "handshake timed out"),
                RecvTimeoutError::Disconnected => {
                    io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed during handshake")
                }
            })?;

        if !response.accepted() {
            let reason = response
                .metadata
                .get("error_message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Err(io::Error::new(io::ErrorKind::Other, format!("handshake rejected: {}", reason)));
        }

        let window_size = response.window_size;
        let mode = response.operation_mode().unwrap_or(OperationMode::GoBackN);

        let engine = Arc::new(Engine::new(mode, window_size, config::DEFAULT_TIMEOUT_SECS, self.log.clone()));
        {
            let writer = Arc::clone(&self.writer);
            let log = self.log.clone();
            engine.start(move |event| dispatch_event(&writer, &log, event));
        }
        *self.engine_slot.lock().expect("engine slot poisoned") = Some(Arc::clone(&engine));
        self.window_size.store(window_size, std::sync::atomic::Ordering::SeqCst);

        info!(self.log, "handshake accepted"; "window" => window_size, "mode" => format!("{:?}", mode));
        Ok(())
    }

    /// Splits, optionally encrypts and corrupts, and transmits one
    /// application message. Returns `Ok(false)` (not an error) when the
    /// message fails validation or the window fills mid-send.
    pub fn send_message(&self, text: &str) -> io::Result<bool> {
        let engine = match self.engine_slot.lock().expect("engine slot poisoned").clone() {
            Some(engine) => engine,
            None => {
                warn!(self.log, "send attempted before handshake completed");
                return Ok(false);
            }
        };

        if text.len() < config::MIN_MESSAGE_SIZE {
            warn!(self.log, "message too short"; "min" => config::MIN_MESSAGE_SIZE, "got" => text.len());
            return Ok(false);
        }
        if text.len() > self.config.max_message_size {
            warn!(self.log, "message too long"; "max" => self.config.max_message_size, "got" => text.len());
            return Ok(false);
        }

        let payload = match &self.cipher {
            Some(cipher) => cipher
                .encrypt(text)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?,
            None => text.to_string(),
        };

        let chunk_size = self.config.chunk_size.clamp(1, config::MAX_PAYLOAD_SIZE);
        let packets = checksum::split(&payload, chunk_size);
        let total = packets.len();

        for (index, packet) in packets.iter().enumerate() {
            let is_final = index == total - 1;
            let wire_payload = self.maybe_corrupt(packet, index);

            let (accepted, events) = engine.send_data_checked(packet, &wire_payload, is_final);
            if !accepted {
                warn!(self.log, "send window full, packet dropped"; "index" => index);
                return Ok(false);
            }

            let window = self.window_size.load(std::sync::atomic::Ordering::SeqCst);
            println!("[window {}] packet {}/{} sent", window, index + 1, total);

            for event in events {
                dispatch_event(&self.writer, &self.log, event);
            }

            {
                let mut stats = self.stats.lock().expect("stats mutex poisoned");
                stats.packets_sent += 1;
                stats.bytes_sent += packet.len() as u64;
            }

            thread::sleep(Duration::from_millis(config::INTER_PACKET_PACING_MS));
        }

        self.stats.lock().expect("stats mutex poisoned").messages_sent += 1;
        Ok(true)
    }

    fn maybe_corrupt(&self, packet: &str, index: usize) -> String {
        let mut fault_cfg = self.fault.lock().expect("fault mutex poisoned");
        if !fault_cfg.enabled {
            return packet.to_string();
        }

        if !fault_cfg.deterministic_packets.is_empty() {
            if fault_cfg.deterministic_packets.contains(&index) {
                let plan = CorruptionPlan {
                    packet_index: index,
                    char_index: Some(fault_cfg.deterministic_char_index),
                    kind: fault_cfg.error_type,
                };
                self.stats.lock().expect("stats mutex poisoned").errors_introduced += 1;
                return fault::apply_plan(packet, index, &plan);
            }
            return packet.to_string();
        }

        if fault::simulate_packet_loss(fault_cfg.probability) {
            self.stats.lock().expect("stats mutex poisoned").errors_introduced += 1;
            return fault::introduce_random_error(packet, fault_cfg.error_type);
        }

        packet.to_string()
    }

    pub fn set_error_simulation(&self, enabled: bool, error_type: ErrorKind, probability: f64) {
        let mut cfg = self.fault.lock().expect("fault mutex poisoned");
        cfg.enabled = enabled;
        cfg.error_type = error_type;
        cfg.probability = probability;
    }

    pub fn set_deterministic_plan(&self, packet_indices: Vec<usize>, char_index: usize, error_type: Option<ErrorKind>) {
        let mut cfg = self.fault.lock().expect("fault mutex poisoned");
        cfg.deterministic_packets = packet_indices;
        cfg.deterministic_char_index = char_index;
        if let Some(kind) = error_type {
            cfg.error_type = kind;
        }
        cfg.enabled = true;
    }

    pub fn stats(&self) -> (ClientStats, Option<rdt_core::Stats>) {
        let client_stats = *self.stats.lock().expect("stats mutex poisoned");
        let engine_stats = self
            .engine_slot
            .lock()
            .expect("engine slot poisoned")
            .as_ref()
            .map(|engine| engine.stats());
        (client_stats, engine_stats)
    }

    fn write_message(&self, message: &Message) -> io::Result<()> {
        let mut stream = self.writer.lock().expect("writer mutex poisoned");
        write_frame(&mut *stream, message).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }

    pub fn disconnect(&mut self) {
        // Best-effort orderly-close signal (SPEC_FULL.md §4.5's FINISH
        // resolution): the peer tears down its session on receipt, but a
        // failure to write here just means the socket was already gone.
        let _ = self.write_message(&Message::finish());

        if let Some(engine) = self.engine_slot.lock().expect("engine slot poisoned").take() {
            engine.stop();
        }
        if let Ok(stream) = self.writer.lock() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        info!(self.log, "disconnected");
    }
}

fn dispatch_event(writer: &Arc<Mutex<TcpStream>>, log: &Logger, event: EngineEvent) {
    if let EngineEvent::Send(message) = event {
        let mut stream = writer.lock().expect("writer mutex poisoned");
        if let Err(err) = write_frame(&mut *stream, &message) {
            error!(log, "failed writing frame"; "error" => err.to_string());
        }
    }
}

fn spawn_reader(
    mut stream: TcpStream,
    writer: Arc<Mutex<TcpStream>>,
    engine_slot: Arc<Mutex<Option<Arc<Engine>>>>,
    stats: Arc<Mutex<ClientStats>>,
    handshake_tx: mpsc::Sender<Message>,
    log: Logger,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        let message = match read_frame(&mut stream) {
            Ok(message) => message,
            Err(_) => break,
        };

        match message.msg_type {
            MessageType::HandshakeResponse => {
                if handshake_tx.send(message).is_err() {
                    break;
                }
            }
            MessageType::Nack => {
                // Mirrors the engine's own retransmission counter on the
                // client side, per SPEC_FULL.md §4.5's supplemented stats.
                stats.lock().expect("stats mutex poisoned").retransmissions += 1;
                if let Some(engine) = engine_slot.lock().expect("engine slot poisoned").as_ref() {
                    let events = engine.receive_message(message);
                    for event in events {
                        dispatch_event(&writer, &log, event);
                    }
                }
            }
            MessageType::Ack | MessageType::WindowUpdate => {
                if let Some(engine) = engine_slot.lock().expect("engine slot poisoned").as_ref() {
                    let events = engine.receive_message(message);
                    for event in events {
                        dispatch_event(&writer, &log, event);
                    }
                }
            }
            MessageType::Finish => {
                info!(log, "server closed the session");
                break;
            }
            MessageType::Error => {
                let reason = message.error_code().unwrap_or("unknown").to_string();
                warn!(log, "server reported ERROR, closing session"; "reason" => reason);
                break;
            }
            _ => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_config_defaults_to_disabled() {
        let cfg = FaultConfig::default();
        assert!(!cfg.enabled);
        assert_eq!(cfg.error_type, ErrorKind::Random);
        assert!(cfg.deterministic_packets.is_empty());
    }
}
