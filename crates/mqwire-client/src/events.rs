//! Client events and message types.

use bytes::Bytes;
use mqwire_core::packet::QoS;

use crate::error::ClientError;

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called; DISCONNECT was sent before the close.
    Requested,
    /// The broker closed the connection.
    PeerClosed,
    /// No PINGRESP arrived within the keep-alive grace window.
    KeepAliveTimeout,
    /// The transport failed mid-session.
    TransportError(String),
    /// The broker sent bytes that do not parse as MQTT 3.1.1.
    ProtocolError(String),
}

impl DisconnectReason {
    /// True for every reason except a locally requested disconnect.
    /// Reconnecting after an abnormal close is the caller's decision.
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, DisconnectReason::Requested)
    }
}

/// An inbound application message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Topic the message was published to.
    pub topic: String,
    /// Message payload.
    pub payload: Bytes,
    /// Quality of Service level it was delivered at.
    pub qos: QoS,
    /// Whether this is a retained message.
    pub retain: bool,
    /// Packet ID (for QoS 1/2).
    pub packet_id: Option<u16>,
}

/// Events returned by `Client::next_event`.
#[derive(Debug)]
pub enum ClientEvent {
    /// Connected to broker.
    Connected {
        /// Whether a previous session was restored.
        session_present: bool,
    },
    /// Disconnected from broker.
    Disconnected {
        /// Why the connection ended.
        reason: DisconnectReason,
    },
    /// A message no registered subscription handler matched.
    Message(Message),
    /// Subscribe acknowledgment.
    SubAck {
        /// Packet ID of the SUBSCRIBE.
        packet_id: u16,
        /// Return codes for each topic (0x00-0x02 = granted QoS, 0x80 = failure).
        return_codes: Vec<u8>,
    },
    /// Unsubscribe acknowledgment.
    UnsubAck {
        /// Packet ID of the UNSUBSCRIBE.
        packet_id: u16,
    },
    /// A SUBSCRIBE was abandoned before the broker acknowledged it.
    SubscribeFailed {
        /// Packet ID of the failed SUBSCRIBE.
        packet_id: u16,
        /// The filters it asked for, so the caller can retry.
        filters: Vec<(String, QoS)>,
        /// What went wrong.
        error: ClientError,
    },
    /// An UNSUBSCRIBE was abandoned before the broker acknowledged it.
    UnsubscribeFailed {
        /// Packet ID of the failed UNSUBSCRIBE.
        packet_id: u16,
        /// The filters it asked to drop.
        filters: Vec<String>,
        /// What went wrong.
        error: ClientError,
    },
    /// A QoS 1/2 publish finished its acknowledgment handshake.
    Published {
        /// Packet ID of the completed PUBLISH.
        packet_id: u16,
    },
    /// A QoS 1/2 publish was abandoned before completing.
    PublishFailed {
        /// Packet ID of the failed PUBLISH.
        packet_id: u16,
        /// What went wrong (delivery timeout, cancellation, or close).
        error: ClientError,
    },
}
