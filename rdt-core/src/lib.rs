pub mod checksum;
pub mod cipher;
pub mod config;
pub mod engine;
pub mod error;
pub mod fault;
pub mod protocol;
pub mod timer;

pub use engine::{Engine, EngineEvent, Stats};
pub use error::{Error, Result};
pub use protocol::{Message, MessageType, OperationMode};
