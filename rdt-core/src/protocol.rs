//! Wire message model and framing (C3).
//!
//! A `Message` is the Rust counterpart of `original_source/src/protocol.py`'s
//! `ProtocolMessage` hierarchy, collapsed into one `serde`-tagged struct
//! instead of a class per message type -- the `metadata` map already carries
//! every message-type-specific field, so a Rust enum-of-structs would just
//! duplicate that map's keys as fields.
//!
//! Framing borrows the teacher's `net::frame::Header` idea (a `byteorder`
//! big-endian length prefix) but carries a JSON body rather than a packed
//! binary struct, since the peer on the other end of the wire is not
//! guaranteed to be a Rust process.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A frame may not declare a body larger than this; guards a malicious or
/// corrupt length prefix from triggering an unbounded allocation.
pub const MAX_FRAME_SIZE: u32 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "HANDSHAKE_REQ")]
    HandshakeRequest,
    #[serde(rename = "HANDSHAKE_RESP")]
    HandshakeResponse,
    #[serde(rename = "DATA")]
    Data,
    #[serde(rename = "ACK")]
    Ack,
    #[serde(rename = "NACK")]
    Nack,
    #[serde(rename = "WINDOW_UPDATE")]
    WindowUpdate,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "FINISH")]
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationMode {
    #[serde(rename = "GO_BACK_N")]
    GoBackN,
    #[serde(rename = "SELECTIVE_REPEAT")]
    SelectiveRepeat,
}

impl Default for OperationMode {
    fn default() -> Self {
        OperationMode::GoBackN
    }
}

/// The single wire message shape. Unused fields for a given `msg_type`
/// carry their type's default (0, "", empty map) rather than becoming
/// `Option`s, matching the Python base class's fixed constructor signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub sequence: u32,
    pub payload: String,
    pub checksum: u32,
    pub window_size: u32,
    pub metadata: BTreeMap<String, Value>,
    pub timestamp: Option<f64>,
}

impl Message {
    fn base(msg_type: MessageType) -> Self {
        Message {
            msg_type,
            sequence: 0,
            payload: String::new(),
            checksum: 0,
            window_size: crate::config::DEFAULT_WINDOW_SIZE,
            metadata: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn handshake_request(
        max_message_size: usize,
        operation_mode: OperationMode,
        encryption_enabled: bool,
    ) -> Self {
        let mut msg = Self::base(MessageType::HandshakeRequest);
        msg.metadata
            .insert("max_message_size".into(), Value::from(max_message_size));
        msg.metadata
            .insert("operation_mode".into(), Value::from(mode_str(operation_mode)));
        msg.metadata
            .insert("encryption_enabled".into(), Value::from(encryption_enabled));
        msg
    }

    pub fn handshake_response(
        accepted: bool,
        window_size: u32,
        operation_mode: OperationMode,
        error_message: &str,
    ) -> Self {
        let mut msg = Self::base(MessageType::HandshakeResponse);
        msg.window_size = window_size;
        msg.metadata.insert("accepted".into(), Value::from(accepted));
        msg.metadata
            .insert("operation_mode".into(), Value::from(mode_str(operation_mode)));
        msg.metadata
            .insert("error_message".into(), Value::from(error_message));
        msg
    }

    pub fn data(sequence: u32, payload: impl Into<String>, checksum: u32, is_final: bool) -> Self {
        let mut msg = Self::base(MessageType::Data);
        msg.sequence = sequence;
        msg.payload = payload.into();
        msg.checksum = checksum;
        msg.metadata.insert("is_final".into(), Value::from(is_final));
        msg
    }

    pub fn ack(sequence: u32, window_size: u32) -> Self {
        let mut msg = Self::base(MessageType::Ack);
        msg.sequence = sequence;
        msg.window_size = window_size;
        msg
    }

    pub fn nack(sequence: u32, error_code: &str) -> Self {
        let mut msg = Self::base(MessageType::Nack);
        msg.sequence = sequence;
        msg.metadata
            .insert("error_code".into(), Value::from(error_code));
        msg
    }

    pub fn window_update(new_window_size: u32) -> Self {
        let mut msg = Self::base(MessageType::WindowUpdate);
        msg.window_size = new_window_size;
        msg
    }

    pub fn error(error_code: &str, error_message: &str) -> Self {
        let mut msg = Self::base(MessageType::Error);
        msg.metadata
            .insert("error_code".into(), Value::from(error_code));
        msg.metadata
            .insert("error_message".into(), Value::from(error_message));
        msg
    }

    pub fn finish() -> Self {
        Self::base(MessageType::Finish)
    }

    pub fn is_final(&self) -> bool {
        self.metadata
            .get("is_final")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn error_code(&self) -> Option<&str> {
        self.metadata.get("error_code").and_then(Value::as_str)
    }

    pub fn accepted(&self) -> bool {
        self.metadata
            .get("accepted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn operation_mode(&self) -> Option<OperationMode> {
        match self.metadata.get("operation_mode").and_then(Value::as_str) {
            Some("GO_BACK_N") => Some(OperationMode::GoBackN),
            Some("SELECTIVE_REPEAT") => Some(OperationMode::SelectiveRepeat),
            _ => None,
        }
    }

    pub fn encryption_enabled(&self) -> bool {
        self.metadata
            .get("encryption_enabled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn max_message_size(&self) -> Option<usize> {
        self.metadata
            .get("max_message_size")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
    }

    /// Serializes to the wire body: UTF-8 JSON, no length prefix.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| Error::Decode(format!("malformed protocol message: {}", e)))
    }
}

fn mode_str(mode: OperationMode) -> &'static str {
    match mode {
        OperationMode::GoBackN => "GO_BACK_N",
        OperationMode::SelectiveRepeat => "SELECTIVE_REPEAT",
    }
}

/// Writes one length-prefixed frame: a 4-byte big-endian body length
/// followed by the JSON body. One call is one frame; callers must not
/// interleave partial writes on the same stream from multiple threads.
pub fn write_frame<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
    let body = message.to_bytes()?;
    if body.len() as u64 > MAX_FRAME_SIZE as u64 {
        return Err(Error::Decode("outgoing frame exceeds MAX_FRAME_SIZE".into()));
    }
    writer.write_u32::<BigEndian>(body.len() as u32)?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Reads one length-prefixed frame, blocking until the full body has
/// arrived or the stream is closed.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Message> {
    let len = match reader.read_u32::<BigEndian>() {
        Ok(len) => len,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(Error::Io(err));
        }
        Err(err) => return Err(Error::Io(err)),
    };

    if len > MAX_FRAME_SIZE {
        return Err(Error::Decode(format!(
            "incoming frame of {} bytes exceeds MAX_FRAME_SIZE",
            len
        )));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    Message::from_bytes(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_data_message_roundtrips_through_bytes() {
        let msg = Message::data(7, "abcd", 0xdead_beef, false);
        let bytes = msg.to_bytes().unwrap();
        let back = Message::from_bytes(&bytes).unwrap();
        assert_eq!(back.msg_type, MessageType::Data);
        assert_eq!(back.sequence, 7);
        assert_eq!(back.payload, "abcd");
        assert_eq!(back.checksum, 0xdead_beef);
        assert!(!back.is_final());
    }

    #[test]
    fn test_handshake_request_accessors() {
        let msg = Message::handshake_request(100, OperationMode::SelectiveRepeat, true);
        assert_eq!(msg.max_message_size(), Some(100));
        assert_eq!(msg.operation_mode(), Some(OperationMode::SelectiveRepeat));
        assert!(msg.encryption_enabled());
    }

    #[test]
    fn test_frame_roundtrip_over_cursor() {
        let msg = Message::ack(42, 5);
        let mut buf = Vec::new();
        write_frame(&mut buf, &msg).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_frame(&mut cursor).unwrap();
        assert_eq!(decoded.msg_type, MessageType::Ack);
        assert_eq!(decoded.sequence, 42);
        assert_eq!(decoded.window_size, 5);
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Message::ack(1, 5)).unwrap();
        write_frame(&mut buf, &Message::nack(2, "CHECKSUM_ERROR")).unwrap();

        let mut cursor = Cursor::new(buf);
        let first = read_frame(&mut cursor).unwrap();
        let second = read_frame(&mut cursor).unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.error_code(), Some("CHECKSUM_ERROR"));
    }

    #[test]
    fn test_oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(MAX_FRAME_SIZE + 1).unwrap();
        let mut cursor = Cursor::new(buf);
        assert!(read_frame(&mut cursor).is_err());
    }
}
