//! Negotiated-parameter bounds and protocol-wide constants.
//!
//! Mirrors the module-level constants in `original_source/src/protocol.py`
//! so the engine, client and server share one definition instead of
//! repeating magic numbers.

/// Maximum payload carried by a single DATA packet, in code units.
pub const MAX_PAYLOAD_SIZE: usize = 4;

/// Minimum length of an application message accepted by `send_message`.
pub const MIN_MESSAGE_SIZE: usize = 30;

/// Default `max_message_size` offered by a client during the handshake.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100;

pub const DEFAULT_WINDOW_SIZE: u32 = 5;
pub const MAX_WINDOW_SIZE: u32 = 5;
pub const MIN_WINDOW_SIZE: u32 = 1;

/// Default retransmission timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 5.0;

/// Number of retransmit attempts allowed before a pending packet is dropped.
pub const MAX_RETRIES: u32 = 3;

/// Size of the sequence-number space; sequence numbers wrap modulo this.
pub const SEQUENCE_SPACE: u32 = 1000;

/// How often the timeout monitor polls pending timers.
pub const MONITOR_POLL_MS: u64 = 100;

/// Inter-packet pacing delay used by the client's send path. Pedagogical,
/// not a correctness requirement (spec.md Open Questions / SPEC_FULL.md §9).
pub const INTER_PACKET_PACING_MS: u64 = 100;

/// How long the client waits for a `HANDSHAKE_RESP` before giving up.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;
