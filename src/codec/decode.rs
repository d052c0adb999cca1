//! MQTT packet decoder
//!
//! The decoder is restartable across partial reads: `decode` returns
//! `Ok(None)` until the input buffer holds a complete packet and never
//! consumes bytes itself; the caller advances its buffer by the returned
//! length once a packet is produced.

use std::sync::Arc;

use bytes::Bytes;

use super::{read_binary, read_string, read_variable_int, MAX_REMAINING_LENGTH};
use crate::protocol::{
    Auth, ConnAck, Connect, DecodeError, Disconnect, Packet, PacketType, Properties, PubAck,
    Publish, QoS, ReasonCode, SubAck, Subscribe, SubscriptionOptions, SubscriptionRequest,
    UnsubAck, Unsubscribe, PROTOCOL_LEVEL, PROTOCOL_NAME,
};

/// MQTT v5.0 packet decoder
pub struct Decoder {
    /// Declared remaining lengths above this are rejected before buffering
    max_packet_size: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_REMAINING_LENGTH,
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.min(MAX_REMAINING_LENGTH);
        self
    }

    /// Decode one packet from the buffer.
    ///
    /// Returns (packet, bytes consumed), `Ok(None)` if the buffer does not
    /// yet hold a complete packet, or an error for malformed input. A
    /// declared remaining length above the configured maximum fails
    /// immediately, before the body arrives.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let first_byte = buf[0];
        let packet_type = first_byte >> 4;
        let flags = first_byte & 0x0F;

        let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
            Ok(r) => r,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };

        if remaining_length as usize > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge);
        }

        let total_len = 1 + len_bytes + remaining_length as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        let body = &buf[1 + len_bytes..total_len];

        let packet = match packet_type {
            1 => decode_connect(flags, body)?,
            2 => decode_connack(flags, body)?,
            3 => decode_publish(flags, body)?,
            4 => decode_puback(flags, body)?,
            5 | 6 | 7 => return Err(DecodeError::UnsupportedPacketType(packet_type)),
            8 => decode_subscribe(flags, body)?,
            9 => decode_suback(flags, body)?,
            10 => decode_unsubscribe(flags, body)?,
            11 => decode_unsuback(flags, body)?,
            12 => {
                require_flags(flags, 0)?;
                Packet::PingReq
            }
            13 => {
                require_flags(flags, 0)?;
                Packet::PingResp
            }
            14 => decode_disconnect(flags, body)?,
            15 => decode_auth(flags, body)?,
            _ => return Err(DecodeError::InvalidPacketType(packet_type)),
        };

        Ok(Some((packet, total_len)))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn require_flags(flags: u8, expected: u8) -> Result<(), DecodeError> {
    if flags != expected {
        return Err(DecodeError::InvalidFlags);
    }
    Ok(())
}

fn decode_connect(flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
    require_flags(flags, 0)?;
    let mut pos = 0;

    let (protocol_name, len) = read_string(&body[pos..])?;
    pos += len;
    if protocol_name != PROTOCOL_NAME {
        return Err(DecodeError::InvalidProtocolName);
    }

    if pos >= body.len() {
        return Err(DecodeError::InsufficientData);
    }
    let level = body[pos];
    pos += 1;
    if level != PROTOCOL_LEVEL {
        return Err(DecodeError::InvalidProtocolLevel(level));
    }

    if pos >= body.len() {
        return Err(DecodeError::InsufficientData);
    }
    let connect_flags = body[pos];
    pos += 1;

    // Reserved bit must be 0
    if (connect_flags & 0x01) != 0 {
        return Err(DecodeError::InvalidFlags);
    }

    let clean_start = (connect_flags & 0x02) != 0;
    let will_flag = (connect_flags & 0x04) != 0;
    let will_qos = (connect_flags >> 3) & 0x03;
    let will_retain = (connect_flags & 0x20) != 0;
    let password_flag = (connect_flags & 0x40) != 0;
    let username_flag = (connect_flags & 0x80) != 0;

    if will_qos > 2 {
        return Err(DecodeError::InvalidQoS(will_qos));
    }
    // Will QoS and retain must be 0 when the will flag is 0
    if !will_flag && (will_qos != 0 || will_retain) {
        return Err(DecodeError::InvalidFlags);
    }

    if pos + 2 > body.len() {
        return Err(DecodeError::InsufficientData);
    }
    let keep_alive = u16::from_be_bytes([body[pos], body[pos + 1]]);
    pos += 2;

    let (properties, len) = Properties::decode(&body[pos..])?;
    pos += len;
    properties.validate_for(PacketType::Connect)?;

    let (client_id, len) = read_string(&body[pos..])?;
    pos += len;

    // Will messages are not supported: consume the will fields to keep the
    // payload aligned, validate them, and drop them.
    if will_flag {
        let (will_props, len) = Properties::decode(&body[pos..])?;
        pos += len;
        will_props.validate_for_will()?;

        let (_will_topic, len) = read_string(&body[pos..])?;
        pos += len;

        let (_will_payload, len) = read_binary(&body[pos..])?;
        pos += len;
    }

    let username = if username_flag {
        let (s, len) = read_string(&body[pos..])?;
        pos += len;
        Some(s.to_string())
    } else {
        None
    };

    let password = if password_flag {
        let (data, len) = read_binary(&body[pos..])?;
        pos += len;
        Some(Bytes::copy_from_slice(data))
    } else {
        None
    };

    if pos != body.len() {
        return Err(DecodeError::MalformedPacket("trailing bytes after payload"));
    }

    Ok(Packet::Connect(Box::new(Connect {
        client_id: client_id.to_string(),
        clean_start,
        keep_alive,
        username,
        password,
        will_present: will_flag,
        properties,
    })))
}

fn decode_connack(flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
    require_flags(flags, 0)?;

    if body.len() < 2 {
        return Err(DecodeError::InsufficientData);
    }

    let ack_flags = body[0];
    // Only bit 0 (session present) may be set
    if (ack_flags & 0xFE) != 0 {
        return Err(DecodeError::InvalidFlags);
    }
    let session_present = (ack_flags & 0x01) != 0;

    let reason_code =
        ReasonCode::from_u8(body[1]).ok_or(DecodeError::InvalidReasonCode(body[1]))?;

    let properties = if body.len() > 2 {
        let (props, _) = Properties::decode(&body[2..])?;
        props
    } else {
        Properties::default()
    };
    properties.validate_for(PacketType::ConnAck)?;

    Ok(Packet::ConnAck(ConnAck {
        session_present,
        reason_code,
        properties,
    }))
}

fn decode_publish(flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
    let dup = (flags & 0x08) != 0;
    let qos_bits = (flags >> 1) & 0x03;
    let retain = (flags & 0x01) != 0;

    let qos = QoS::from_u8(qos_bits).ok_or(DecodeError::InvalidQoS(qos_bits))?;

    if qos == QoS::AtMostOnce && dup {
        return Err(DecodeError::MalformedPacket("DUP must be 0 for QoS 0"));
    }

    let mut pos = 0;

    let (topic, len) = read_string(&body[pos..])?;
    pos += len;

    // Wildcards are never legal in a topic name
    if topic.contains('+') || topic.contains('#') {
        return Err(DecodeError::MalformedPacket("topic contains wildcard"));
    }

    let packet_id = if qos != QoS::AtMostOnce {
        if pos + 2 > body.len() {
            return Err(DecodeError::InsufficientData);
        }
        let id = u16::from_be_bytes([body[pos], body[pos + 1]]);
        if id == 0 {
            return Err(DecodeError::MalformedPacket("packet id cannot be 0"));
        }
        pos += 2;
        Some(id)
    } else {
        None
    };

    let (properties, len) = Properties::decode(&body[pos..])?;
    pos += len;
    properties.validate_for(PacketType::Publish)?;

    let payload = Bytes::copy_from_slice(&body[pos..]);

    Ok(Packet::Publish(Publish {
        dup,
        qos,
        retain,
        topic: Arc::from(topic),
        packet_id,
        payload,
        properties,
    }))
}

fn decode_puback(flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
    require_flags(flags, 0)?;

    if body.len() < 2 {
        return Err(DecodeError::InsufficientData);
    }

    let packet_id = u16::from_be_bytes([body[0], body[1]]);
    if packet_id == 0 {
        return Err(DecodeError::MalformedPacket("packet id cannot be 0"));
    }

    // Reason code and properties may be omitted for success
    let (reason_code, properties) = if body.len() > 2 {
        let reason_code =
            ReasonCode::from_u8(body[2]).ok_or(DecodeError::InvalidReasonCode(body[2]))?;
        let properties = if body.len() > 3 {
            let (props, _) = Properties::decode(&body[3..])?;
            props
        } else {
            Properties::default()
        };
        (reason_code, properties)
    } else {
        (ReasonCode::Success, Properties::default())
    };
    properties.validate_for(PacketType::PubAck)?;

    Ok(Packet::PubAck(PubAck {
        packet_id,
        reason_code,
        properties,
    }))
}

fn decode_subscribe(flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
    // SUBSCRIBE must have flags 0010
    require_flags(flags, 0x02)?;

    if body.len() < 2 {
        return Err(DecodeError::InsufficientData);
    }

    let packet_id = u16::from_be_bytes([body[0], body[1]]);
    if packet_id == 0 {
        return Err(DecodeError::MalformedPacket("packet id cannot be 0"));
    }

    let mut pos = 2;

    let (properties, len) = Properties::decode(&body[pos..])?;
    pos += len;
    properties.validate_for(PacketType::Subscribe)?;

    let mut subscriptions = Vec::new();
    while pos < body.len() {
        let (filter, len) = read_string(&body[pos..])?;
        pos += len;

        if filter.is_empty() {
            return Err(DecodeError::MalformedPacket("topic filter cannot be empty"));
        }

        if pos >= body.len() {
            return Err(DecodeError::InsufficientData);
        }
        let options = SubscriptionOptions::from_byte(body[pos])
            .ok_or(DecodeError::InvalidSubscriptionOptions)?;
        pos += 1;

        subscriptions.push(SubscriptionRequest {
            filter: filter.to_string(),
            options,
        });
    }

    if subscriptions.is_empty() {
        return Err(DecodeError::MalformedPacket(
            "SUBSCRIBE must have at least one filter",
        ));
    }

    Ok(Packet::Subscribe(Subscribe {
        packet_id,
        subscriptions,
        properties,
    }))
}

fn decode_suback(flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
    require_flags(flags, 0)?;

    if body.len() < 3 {
        return Err(DecodeError::InsufficientData);
    }

    let packet_id = u16::from_be_bytes([body[0], body[1]]);
    let mut pos = 2;

    let (properties, len) = Properties::decode(&body[pos..])?;
    pos += len;
    properties.validate_for(PacketType::SubAck)?;

    let mut reason_codes = Vec::new();
    while pos < body.len() {
        let code =
            ReasonCode::from_u8(body[pos]).ok_or(DecodeError::InvalidReasonCode(body[pos]))?;
        reason_codes.push(code);
        pos += 1;
    }

    Ok(Packet::SubAck(SubAck {
        packet_id,
        reason_codes,
        properties,
    }))
}

fn decode_unsubscribe(flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
    // UNSUBSCRIBE must have flags 0010
    require_flags(flags, 0x02)?;

    if body.len() < 2 {
        return Err(DecodeError::InsufficientData);
    }

    let packet_id = u16::from_be_bytes([body[0], body[1]]);
    if packet_id == 0 {
        return Err(DecodeError::MalformedPacket("packet id cannot be 0"));
    }

    let mut pos = 2;

    let (properties, len) = Properties::decode(&body[pos..])?;
    pos += len;
    properties.validate_for(PacketType::Unsubscribe)?;

    let mut filters = Vec::new();
    while pos < body.len() {
        let (filter, len) = read_string(&body[pos..])?;
        pos += len;

        if filter.is_empty() {
            return Err(DecodeError::MalformedPacket("topic filter cannot be empty"));
        }

        filters.push(filter.to_string());
    }

    if filters.is_empty() {
        return Err(DecodeError::MalformedPacket(
            "UNSUBSCRIBE must have at least one filter",
        ));
    }

    Ok(Packet::Unsubscribe(Unsubscribe {
        packet_id,
        filters,
        properties,
    }))
}

fn decode_unsuback(flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
    require_flags(flags, 0)?;

    if body.len() < 2 {
        return Err(DecodeError::InsufficientData);
    }

    let packet_id = u16::from_be_bytes([body[0], body[1]]);
    let mut pos = 2;

    let (properties, len) = Properties::decode(&body[pos..])?;
    pos += len;
    properties.validate_for(PacketType::UnsubAck)?;

    let mut reason_codes = Vec::new();
    while pos < body.len() {
        let code =
            ReasonCode::from_u8(body[pos]).ok_or(DecodeError::InvalidReasonCode(body[pos]))?;
        reason_codes.push(code);
        pos += 1;
    }

    Ok(Packet::UnsubAck(UnsubAck {
        packet_id,
        reason_codes,
        properties,
    }))
}

fn decode_disconnect(flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
    require_flags(flags, 0)?;

    if body.is_empty() {
        return Ok(Packet::Disconnect(Disconnect::default()));
    }

    let reason_code =
        ReasonCode::from_u8(body[0]).ok_or(DecodeError::InvalidReasonCode(body[0]))?;

    let properties = if body.len() > 1 {
        let (props, _) = Properties::decode(&body[1..])?;
        props
    } else {
        Properties::default()
    };
    properties.validate_for(PacketType::Disconnect)?;

    Ok(Packet::Disconnect(Disconnect {
        reason_code,
        properties,
    }))
}

fn decode_auth(flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
    require_flags(flags, 0)?;

    if body.is_empty() {
        return Ok(Packet::Auth(Auth::default()));
    }

    let reason_code =
        ReasonCode::from_u8(body[0]).ok_or(DecodeError::InvalidReasonCode(body[0]))?;

    let properties = if body.len() > 1 {
        let (props, _) = Properties::decode(&body[1..])?;
        props
    } else {
        Properties::default()
    };
    properties.validate_for(PacketType::Auth)?;

    Ok(Packet::Auth(Auth {
        reason_code,
        properties,
    }))
}
