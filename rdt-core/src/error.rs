use std::fmt;
use std::io;

/// Errors surfaced across crate boundaries. Protocol-level failures
/// (checksum, duplicate, timer, window-full) are handled inside the
/// engine and never reach here -- see `engine::EngineEvent` for those.
#[derive(Debug)]
pub enum Error {
    /// The frame was missing data, malformed, or named an unknown kind.
    Decode(String),
    /// The substrate read/write failed.
    Io(io::Error),
    /// The cipher rejected a key or failed to encrypt/decrypt.
    Crypto(String),
    /// A handshake was rejected by the peer, or timed out waiting for a response.
    Handshake(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Decode(msg) => write!(f, "decode error: {}", msg),
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::Crypto(msg) => write!(f, "crypto error: {}", msg),
            Error::Handshake(msg) => write!(f, "handshake error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
