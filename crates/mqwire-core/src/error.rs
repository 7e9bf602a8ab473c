//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding MQTT packets.
///
/// Any of these on a live connection is unrecoverable: the byte stream can
/// no longer be framed and the connection must be torn down.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Invalid remaining length encoding")]
    InvalidRemainingLength,

    #[error("Incomplete packet: need {needed} bytes, have {have}")]
    IncompletePacket { needed: usize, have: usize },

    #[error("Packet too large: {size} bytes, limit {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Invalid protocol name: expected 'MQTT', got '{0}'")]
    InvalidProtocolName(String),

    #[error("Unsupported protocol level: {0}")]
    UnsupportedProtocolLevel(u8),

    #[error("Invalid connect flags: {0:#04x}")]
    InvalidConnectFlags(u8),

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
