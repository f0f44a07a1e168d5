//! Wire message codec
//!
//! # Payload layout
//!
//! ```text
//! ┌────────────────────┬───────────────────┬──────────────────────┐
//! │ msg_type (4 bytes) │ user_id (8 bytes) │ body (protobuf)      │
//! │ little-endian u32  │ little-endian u64 │ UserData | Snapshot  │
//! └────────────────────┴───────────────────┴──────────────────────┘
//! ```
//!
//! The 12-byte envelope is present on every message. It lets the collector
//! dispatch on type and attribute ownership without holding per-connection
//! session state.
//!
//! | msg_type | body       |
//! |----------|------------|
//! | 1        | `UserData` |
//! | 2        | `Snapshot` |
//!
//! Replies travel back as framed UTF-8 text: `OK!` or `ERROR: <text>`.

use crate::error::{Result, WireError};
use crate::model::{Snapshot, UserData};
use prost::Message as _;
use std::fmt;

/// Size of the (type, user id) header
pub const ENVELOPE_LEN: usize = 12;

/// Message kinds understood by the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    UserData = 1,
    Snapshot = 2,
}

impl MessageType {
    pub fn tag(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for MessageType {
    type Error = WireError;

    fn try_from(tag: u32) -> Result<Self> {
        match tag {
            1 => Ok(MessageType::UserData),
            2 => Ok(MessageType::Snapshot),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

/// Fixed header carried by every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub msg_type: MessageType,
    pub user_id: u64,
}

impl Envelope {
    pub fn new(msg_type: MessageType, user_id: u64) -> Self {
        Self { msg_type, user_id }
    }

    pub fn to_bytes(&self) -> [u8; ENVELOPE_LEN] {
        let mut out = [0u8; ENVELOPE_LEN];
        out[..4].copy_from_slice(&self.msg_type.tag().to_le_bytes());
        out[4..].copy_from_slice(&self.user_id.to_le_bytes());
        out
    }

    /// Parse the header and return it with the remaining body bytes.
    pub fn split(payload: &[u8]) -> Result<(Self, &[u8])> {
        if payload.len() < ENVELOPE_LEN {
            return Err(WireError::TruncatedEnvelope(payload.len()));
        }
        let (header, body) = payload.split_at(ENVELOPE_LEN);
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&header[..4]);
        let mut user = [0u8; 8];
        user.copy_from_slice(&header[4..]);

        let msg_type = MessageType::try_from(u32::from_le_bytes(tag))?;
        Ok((Self::new(msg_type, u64::from_le_bytes(user)), body))
    }
}

/// A decoded message body
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    UserData(UserData),
    Snapshot(Snapshot),
}

impl WireMessage {
    pub fn msg_type(&self) -> MessageType {
        match self {
            WireMessage::UserData(_) => MessageType::UserData,
            WireMessage::Snapshot(_) => MessageType::Snapshot,
        }
    }
}

impl From<UserData> for WireMessage {
    fn from(user: UserData) -> Self {
        WireMessage::UserData(user)
    }
}

impl From<Snapshot> for WireMessage {
    fn from(snapshot: Snapshot) -> Self {
        WireMessage::Snapshot(snapshot)
    }
}

/// Encode `message` for `user_id` into a frame payload.
pub fn encode(user_id: u64, message: &WireMessage) -> Vec<u8> {
    let envelope = Envelope::new(message.msg_type(), user_id);
    let mut out = Vec::with_capacity(ENVELOPE_LEN + body_len(message));
    out.extend_from_slice(&envelope.to_bytes());
    match message {
        WireMessage::UserData(user) => user.encode_raw(&mut out),
        WireMessage::Snapshot(snapshot) => snapshot.encode_raw(&mut out),
    }
    out
}

/// Decode a frame payload into its envelope and body.
pub fn decode(payload: &[u8]) -> Result<(Envelope, WireMessage)> {
    let (envelope, body) = Envelope::split(payload)?;
    let message = match envelope.msg_type {
        MessageType::UserData => WireMessage::UserData(UserData::decode(body)?),
        MessageType::Snapshot => WireMessage::Snapshot(Snapshot::decode(body)?),
    };
    Ok((envelope, message))
}

/// Serialize a snapshot on its own, without an envelope (raw blob format).
pub fn encode_snapshot(snapshot: &Snapshot) -> Vec<u8> {
    snapshot.encode_to_vec()
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot> {
    Ok(Snapshot::decode(bytes)?)
}

fn body_len(message: &WireMessage) -> usize {
    match message {
        WireMessage::UserData(user) => user.encoded_len(),
        WireMessage::Snapshot(snapshot) => snapshot.encoded_len(),
    }
}

/// Collector acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Error(String),
}

impl Reply {
    pub const OK_TEXT: &'static str = "OK!";
    pub const ERROR_PREFIX: &'static str = "ERROR: ";

    pub fn error(reason: impl fmt::Display) -> Self {
        Reply::Error(reason.to_string())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok)
    }

    /// Text written back on the wire
    pub fn to_wire(&self) -> String {
        self.to_string()
    }

    /// Interpret a reply frame. Anything other than `OK!` is an error.
    pub fn parse(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        if text == Self::OK_TEXT {
            return Reply::Ok;
        }
        let reason = text
            .strip_prefix(Self::ERROR_PREFIX)
            .unwrap_or(&text)
            .to_string();
        Reply::Error(reason)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => f.write_str(Self::OK_TEXT),
            Reply::Error(reason) => write!(f, "{}{}", Self::ERROR_PREFIX, reason),
        }
    }
}
