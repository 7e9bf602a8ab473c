//! Client error types.

use std::io;

use thiserror::Error;

use mqwire_core::packet::ConnectReturnCode;

/// Client error type.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] mqwire_core::ProtocolError),

    /// The broker answered CONNECT with a non-zero return code.
    #[error("Connection refused: {0}")]
    ConnectRefused(ConnectReturnCode),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid topic: {0:?}")]
    InvalidTopic(String),

    #[error("Invalid topic filter: {0:?}")]
    InvalidFilter(String),

    /// Topic plus payload exceed what a remaining-length field can
    /// frame, so the packet cannot be encoded.
    #[error("Publish too large to encode ({size} bytes)")]
    PublishTooLarge { size: usize },

    /// A QoS 1/2 publish ran out of retransmission attempts.
    #[error("Delivery of packet {packet_id} timed out")]
    DeliveryTimeout { packet_id: u16 },

    /// A pending publish was cancelled before the handshake finished.
    #[error("Publish cancelled")]
    Cancelled,

    /// All 65535 packet identifiers are tied up in unfinished flows.
    #[error("No free packet identifiers")]
    PacketIdsExhausted,
}

pub type Result<T> = std::result::Result<T, ClientError>;
