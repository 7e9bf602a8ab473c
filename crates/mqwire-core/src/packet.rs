//! MQTT 3.1.1 packet types and codec.
//!
//! All fourteen control packets encode and decode symmetrically, so the
//! same codec serves the client and test harnesses playing the broker
//! side of a conversation.

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::varint;

/// Protocol name carried in every CONNECT.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol level for MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;

/// SUBACK return code signalling a refused topic filter.
pub const SUBACK_FAILURE: u8 = 0x80;

/// MQTT control packet types (high nibble of the fixed header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::Connack),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::Puback),
            5 => Ok(PacketType::Pubrec),
            6 => Ok(PacketType::Pubrel),
            7 => Ok(PacketType::Pubcomp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::Suback),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::Unsuback),
            12 => Ok(PacketType::Pingreq),
            13 => Ok(PacketType::Pingresp),
            14 => Ok(PacketType::Disconnect),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

/// Quality of service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::MalformedPacket(format!(
                "Invalid QoS: {}",
                value
            ))),
        }
    }
}

/// CONNACK return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadCredentials = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ConnectReturnCode::Accepted),
            1 => Ok(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Ok(ConnectReturnCode::IdentifierRejected),
            3 => Ok(ConnectReturnCode::ServerUnavailable),
            4 => Ok(ConnectReturnCode::BadCredentials),
            5 => Ok(ConnectReturnCode::NotAuthorized),
            _ => Err(ProtocolError::MalformedPacket(format!(
                "Invalid CONNACK return code: {}",
                value
            ))),
        }
    }
}

impl std::fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ConnectReturnCode::Accepted => "connection accepted",
            ConnectReturnCode::UnacceptableProtocolVersion => "unacceptable protocol version",
            ConnectReturnCode::IdentifierRejected => "client identifier rejected",
            ConnectReturnCode::ServerUnavailable => "server unavailable",
            ConnectReturnCode::BadCredentials => "bad user name or password",
            ConnectReturnCode::NotAuthorized => "not authorized",
        };
        f.write_str(text)
    }
}

/// Last Will and Testament, published by the broker if the client
/// disconnects without sending DISCONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl Will {
    /// Create a will with QoS 0 and no retain.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// CONNECT packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub clean_session: bool,
    /// Keep-alive interval in seconds, 0 disables keep-alive.
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<Will>,
}

/// CONNACK packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connack {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

/// PUBLISH packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present exactly when `qos` is above `AtMostOnce`.
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

/// SUBSCRIBE packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    /// Topic filters with the maximum QoS requested for each.
    pub filters: Vec<(String, QoS)>,
}

/// SUBACK packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suback {
    pub packet_id: u16,
    /// One code per requested filter: granted QoS 0-2, or `SUBACK_FAILURE`.
    pub return_codes: Vec<u8>,
}

/// UNSUBSCRIBE packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

/// An MQTT 3.1.1 control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Connack(Connack),
    Publish(Publish),
    Puback { packet_id: u16 },
    Pubrec { packet_id: u16 },
    Pubrel { packet_id: u16 },
    Pubcomp { packet_id: u16 },
    Subscribe(Subscribe),
    Suback(Suback),
    Unsubscribe(Unsubscribe),
    Unsuback { packet_id: u16 },
    Pingreq,
    Pingresp,
    Disconnect,
}

/// Cursor over the body of a framed packet.
struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8> {
        if self.pos >= self.buf.len() {
            return Err(ProtocolError::IncompletePacket { needed: 1, have: 0 });
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn read_u16(&mut self) -> Result<u16> {
        if self.remaining() < 2 {
            return Err(ProtocolError::IncompletePacket {
                needed: 2,
                have: self.remaining(),
            });
        }
        let val = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(val)
    }

    /// Packet identifiers must be nonzero (MQTT-2.3.1-1).
    fn read_packet_id(&mut self) -> Result<u16> {
        let id = self.read_u16()?;
        if id == 0 {
            return Err(ProtocolError::MalformedPacket(
                "packet identifier must be nonzero".into(),
            ));
        }
        Ok(id)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::IncompletePacket {
                needed: len,
                have: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        // MQTT-1.5.3-2: strings must not contain U+0000
        if bytes.contains(&0u8) {
            return Err(ProtocolError::MalformedPacket(
                "UTF-8 string contains null character".into(),
            ));
        }
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    fn read_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u16()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }
}

/// Try to decode one complete packet from the front of `buf`.
///
/// Returns `Ok(Some((packet, bytes_consumed)))` on success and `Ok(None)`
/// when the buffer does not yet hold a whole packet, so a caller feeding
/// from a socket can accumulate and retry. `max_packet_size` of 0
/// disables the size limit.
pub fn decode_packet(buf: &[u8], max_packet_size: usize) -> Result<Option<(Packet, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let fixed_header = buf[0];
    let packet_type = PacketType::try_from(fixed_header >> 4)?;
    let flags = fixed_header & 0x0F;

    let Some((remaining_len, len_bytes)) = varint::decode(&buf[1..])? else {
        return Ok(None);
    };

    let header_len = 1 + len_bytes;
    let total_len = header_len + remaining_len;

    if max_packet_size > 0 && total_len > max_packet_size {
        return Err(ProtocolError::PacketTooLarge {
            size: total_len,
            max: max_packet_size,
        });
    }

    if buf.len() < total_len {
        return Ok(None);
    }

    // MQTT-2.2.2-1/2: fixed header flags are reserved except for PUBLISH;
    // SUBSCRIBE, UNSUBSCRIBE, and PUBREL require 0b0010.
    match packet_type {
        PacketType::Publish => {}
        PacketType::Subscribe | PacketType::Unsubscribe | PacketType::Pubrel => {
            if flags != 0x02 {
                return Err(ProtocolError::MalformedPacket(format!(
                    "{:?} fixed header flags must be 0x02, got {:#04x}",
                    packet_type, flags
                )));
            }
        }
        _ => {
            if flags != 0 {
                return Err(ProtocolError::MalformedPacket(format!(
                    "{:?} fixed header flags must be 0, got {:#04x}",
                    packet_type, flags
                )));
            }
        }
    }

    let body = &buf[header_len..total_len];

    let packet = match packet_type {
        PacketType::Connect => decode_connect(body)?,
        PacketType::Connack => decode_connack(body)?,
        PacketType::Publish => decode_publish(flags, body)?,
        PacketType::Puback => Packet::Puback {
            packet_id: Decoder::new(body).read_packet_id()?,
        },
        PacketType::Pubrec => Packet::Pubrec {
            packet_id: Decoder::new(body).read_packet_id()?,
        },
        PacketType::Pubrel => Packet::Pubrel {
            packet_id: Decoder::new(body).read_packet_id()?,
        },
        PacketType::Pubcomp => Packet::Pubcomp {
            packet_id: Decoder::new(body).read_packet_id()?,
        },
        PacketType::Subscribe => decode_subscribe(body)?,
        PacketType::Suback => decode_suback(body)?,
        PacketType::Unsubscribe => decode_unsubscribe(body)?,
        PacketType::Unsuback => Packet::Unsuback {
            packet_id: Decoder::new(body).read_packet_id()?,
        },
        PacketType::Pingreq => Packet::Pingreq,
        PacketType::Pingresp => Packet::Pingresp,
        PacketType::Disconnect => Packet::Disconnect,
    };

    Ok(Some((packet, total_len)))
}

fn decode_connect(body: &[u8]) -> Result<Packet> {
    let mut dec = Decoder::new(body);

    let protocol_name = dec.read_string()?;
    if protocol_name != PROTOCOL_NAME {
        return Err(ProtocolError::InvalidProtocolName(protocol_name));
    }

    let protocol_level = dec.read_u8()?;
    if protocol_level != PROTOCOL_LEVEL {
        return Err(ProtocolError::UnsupportedProtocolLevel(protocol_level));
    }

    let flags = dec.read_u8()?;
    // MQTT-3.1.2-3: reserved bit must be 0
    if flags & 0x01 != 0 {
        return Err(ProtocolError::InvalidConnectFlags(flags));
    }

    let clean_session = flags & 0x02 != 0;
    let will_flag = flags & 0x04 != 0;
    let will_qos = QoS::try_from((flags >> 3) & 0x03)?;
    let will_retain = flags & 0x20 != 0;
    let password_flag = flags & 0x40 != 0;
    let username_flag = flags & 0x80 != 0;

    // MQTT-3.1.2-11/13/15: will qos and retain require the will flag
    if !will_flag && (will_qos != QoS::AtMostOnce || will_retain) {
        return Err(ProtocolError::InvalidConnectFlags(flags));
    }

    // MQTT-3.1.2-22: password requires a username in 3.1.1
    if password_flag && !username_flag {
        return Err(ProtocolError::InvalidConnectFlags(flags));
    }

    let keep_alive = dec.read_u16()?;
    let client_id = dec.read_string()?;

    let will = if will_flag {
        let topic = dec.read_string()?;
        let payload = dec.read_binary()?;
        Some(Will {
            topic,
            payload: Bytes::from(payload),
            qos: will_qos,
            retain: will_retain,
        })
    } else {
        None
    };

    let username = if username_flag {
        Some(dec.read_string()?)
    } else {
        None
    };

    let password = if password_flag {
        Some(dec.read_binary()?)
    } else {
        None
    };

    Ok(Packet::Connect(Connect {
        client_id,
        clean_session,
        keep_alive,
        username,
        password,
        will,
    }))
}

fn decode_connack(body: &[u8]) -> Result<Packet> {
    let mut dec = Decoder::new(body);

    let ack_flags = dec.read_u8()?;
    // MQTT-3.2.2-1: bits 7-1 are reserved
    if ack_flags & !0x01 != 0 {
        return Err(ProtocolError::MalformedPacket(format!(
            "reserved CONNACK flags must be 0, got {:#04x}",
            ack_flags
        )));
    }

    let session_present = ack_flags & 0x01 != 0;
    let return_code = ConnectReturnCode::try_from(dec.read_u8()?)?;

    Ok(Packet::Connack(Connack {
        session_present,
        return_code,
    }))
}

fn decode_publish(flags: u8, body: &[u8]) -> Result<Packet> {
    let dup = flags & 0x08 != 0;
    let qos = QoS::try_from((flags >> 1) & 0x03)?;
    let retain = flags & 0x01 != 0;

    // MQTT-3.3.1-2: DUP is meaningless at QoS 0
    if dup && qos == QoS::AtMostOnce {
        return Err(ProtocolError::MalformedPacket(
            "DUP flag set on a QoS 0 PUBLISH".into(),
        ));
    }

    let mut dec = Decoder::new(body);

    let topic = dec.read_string()?;
    if topic.is_empty() {
        return Err(ProtocolError::MalformedPacket(
            "PUBLISH topic must be at least 1 character".into(),
        ));
    }
    // MQTT-3.3.2-2: topic names never contain wildcards
    if topic.contains('+') || topic.contains('#') {
        return Err(ProtocolError::MalformedPacket(
            "PUBLISH topic contains wildcard characters".into(),
        ));
    }

    let packet_id = if qos != QoS::AtMostOnce {
        Some(dec.read_packet_id()?)
    } else {
        None
    };

    let payload = dec.read_bytes(dec.remaining())?;

    Ok(Packet::Publish(Publish {
        dup,
        qos,
        retain,
        topic,
        packet_id,
        payload: Bytes::copy_from_slice(payload),
    }))
}

fn decode_subscribe(body: &[u8]) -> Result<Packet> {
    let mut dec = Decoder::new(body);
    let packet_id = dec.read_packet_id()?;

    let mut filters = Vec::new();
    while dec.remaining() > 0 {
        let filter = dec.read_string()?;
        if filter.is_empty() {
            return Err(ProtocolError::MalformedPacket(
                "topic filter must be at least 1 character".into(),
            ));
        }

        let qos_byte = dec.read_u8()?;
        // MQTT-3.8.3-4: upper bits of the requested QoS byte are reserved
        if qos_byte & !0x03 != 0 {
            return Err(ProtocolError::MalformedPacket(format!(
                "reserved bits in SUBSCRIBE options: {:#04x}",
                qos_byte
            )));
        }
        filters.push((filter, QoS::try_from(qos_byte)?));
    }

    // MQTT-3.8.3-3: at least one filter
    if filters.is_empty() {
        return Err(ProtocolError::MalformedPacket(
            "SUBSCRIBE with no topic filters".into(),
        ));
    }

    Ok(Packet::Subscribe(Subscribe { packet_id, filters }))
}

fn decode_suback(body: &[u8]) -> Result<Packet> {
    let mut dec = Decoder::new(body);
    let packet_id = dec.read_packet_id()?;

    let codes = dec.read_bytes(dec.remaining())?;
    if codes.is_empty() {
        return Err(ProtocolError::MalformedPacket(
            "SUBACK with no return codes".into(),
        ));
    }
    for &code in codes {
        if code > 2 && code != SUBACK_FAILURE {
            return Err(ProtocolError::MalformedPacket(format!(
                "invalid SUBACK return code: {:#04x}",
                code
            )));
        }
    }

    Ok(Packet::Suback(Suback {
        packet_id,
        return_codes: codes.to_vec(),
    }))
}

fn decode_unsubscribe(body: &[u8]) -> Result<Packet> {
    let mut dec = Decoder::new(body);
    let packet_id = dec.read_packet_id()?;

    let mut filters = Vec::new();
    while dec.remaining() > 0 {
        let filter = dec.read_string()?;
        if filter.is_empty() {
            return Err(ProtocolError::MalformedPacket(
                "topic filter must be at least 1 character".into(),
            ));
        }
        filters.push(filter);
    }

    // MQTT-3.10.3-2: at least one filter
    if filters.is_empty() {
        return Err(ProtocolError::MalformedPacket(
            "UNSUBSCRIBE with no topic filters".into(),
        ));
    }

    Ok(Packet::Unsubscribe(Unsubscribe { packet_id, filters }))
}

/// Encode any packet into `buf`.
pub fn encode_packet(packet: &Packet, buf: &mut Vec<u8>) {
    match packet {
        Packet::Connect(connect) => encode_connect(connect, buf),
        Packet::Connack(connack) => encode_connack(connack, buf),
        Packet::Publish(publish) => encode_publish(publish, buf),
        Packet::Puback { packet_id } => encode_ack(PacketType::Puback, 0, *packet_id, buf),
        Packet::Pubrec { packet_id } => encode_ack(PacketType::Pubrec, 0, *packet_id, buf),
        Packet::Pubrel { packet_id } => encode_ack(PacketType::Pubrel, 0x02, *packet_id, buf),
        Packet::Pubcomp { packet_id } => encode_ack(PacketType::Pubcomp, 0, *packet_id, buf),
        Packet::Subscribe(subscribe) => encode_subscribe(subscribe, buf),
        Packet::Suback(suback) => encode_suback(suback, buf),
        Packet::Unsubscribe(unsubscribe) => encode_unsubscribe(unsubscribe, buf),
        Packet::Unsuback { packet_id } => encode_ack(PacketType::Unsuback, 0, *packet_id, buf),
        Packet::Pingreq => encode_empty(PacketType::Pingreq, buf),
        Packet::Pingresp => encode_empty(PacketType::Pingresp, buf),
        Packet::Disconnect => encode_empty(PacketType::Disconnect, buf),
    }
}

fn write_string(s: &str, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn write_binary(data: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
    buf.extend_from_slice(data);
}

/// Two-byte-body acks: PUBACK, PUBREC, PUBREL, PUBCOMP, UNSUBACK.
fn encode_ack(packet_type: PacketType, flags: u8, packet_id: u16, buf: &mut Vec<u8>) {
    buf.push(((packet_type as u8) << 4) | flags);
    buf.push(2);
    buf.extend_from_slice(&packet_id.to_be_bytes());
}

/// Zero-body packets: PINGREQ, PINGRESP, DISCONNECT.
fn encode_empty(packet_type: PacketType, buf: &mut Vec<u8>) {
    buf.push((packet_type as u8) << 4);
    buf.push(0);
}

pub fn encode_connect(connect: &Connect, buf: &mut Vec<u8>) {
    let mut body = Vec::new();

    write_string(PROTOCOL_NAME, &mut body);
    body.push(PROTOCOL_LEVEL);

    let mut flags = 0u8;
    if connect.clean_session {
        flags |= 0x02;
    }
    if let Some(ref will) = connect.will {
        flags |= 0x04 | ((will.qos as u8) << 3);
        if will.retain {
            flags |= 0x20;
        }
    }
    if connect.password.is_some() {
        flags |= 0x40;
    }
    if connect.username.is_some() {
        flags |= 0x80;
    }
    body.push(flags);

    body.extend_from_slice(&connect.keep_alive.to_be_bytes());
    write_string(&connect.client_id, &mut body);

    if let Some(ref will) = connect.will {
        write_string(&will.topic, &mut body);
        write_binary(&will.payload, &mut body);
    }
    if let Some(ref username) = connect.username {
        write_string(username, &mut body);
    }
    if let Some(ref password) = connect.password {
        write_binary(password, &mut body);
    }

    buf.push((PacketType::Connect as u8) << 4);
    varint::encode(body.len(), buf);
    buf.extend_from_slice(&body);
}

pub fn encode_connack(connack: &Connack, buf: &mut Vec<u8>) {
    buf.push((PacketType::Connack as u8) << 4);
    buf.push(2);
    buf.push(connack.session_present as u8);
    buf.push(connack.return_code as u8);
}

pub fn encode_publish(publish: &Publish, buf: &mut Vec<u8>) {
    let mut fixed_header = (PacketType::Publish as u8) << 4;
    if publish.dup {
        fixed_header |= 0x08;
    }
    fixed_header |= (publish.qos as u8) << 1;
    if publish.retain {
        fixed_header |= 0x01;
    }
    buf.push(fixed_header);

    // The body layout is fixed, so its length is arithmetic and the
    // payload is copied only once.
    let packet_id_len = if publish.packet_id.is_some() { 2 } else { 0 };
    let remaining = 2 + publish.topic.len() + packet_id_len + publish.payload.len();
    varint::encode(remaining, buf);

    write_string(&publish.topic, buf);
    if let Some(id) = publish.packet_id {
        buf.extend_from_slice(&id.to_be_bytes());
    }
    buf.extend_from_slice(&publish.payload);
}

pub fn encode_subscribe(subscribe: &Subscribe, buf: &mut Vec<u8>) {
    let mut body = Vec::new();
    body.extend_from_slice(&subscribe.packet_id.to_be_bytes());
    for (filter, qos) in &subscribe.filters {
        write_string(filter, &mut body);
        body.push(*qos as u8);
    }

    buf.push(((PacketType::Subscribe as u8) << 4) | 0x02);
    varint::encode(body.len(), buf);
    buf.extend_from_slice(&body);
}

pub fn encode_suback(suback: &Suback, buf: &mut Vec<u8>) {
    buf.push((PacketType::Suback as u8) << 4);
    varint::encode(2 + suback.return_codes.len(), buf);
    buf.extend_from_slice(&suback.packet_id.to_be_bytes());
    buf.extend_from_slice(&suback.return_codes);
}

pub fn encode_unsubscribe(unsubscribe: &Unsubscribe, buf: &mut Vec<u8>) {
    let mut body = Vec::new();
    body.extend_from_slice(&unsubscribe.packet_id.to_be_bytes());
    for filter in &unsubscribe.filters {
        write_string(filter, &mut body);
    }

    buf.push(((PacketType::Unsubscribe as u8) << 4) | 0x02);
    varint::encode(body.len(), buf);
    buf.extend_from_slice(&body);
}
