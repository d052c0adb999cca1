//! MQTT packet encoder

use bytes::{BufMut, BytesMut};

use super::{variable_int_len, write_binary, write_string, write_variable_int};
use crate::protocol::{
    Auth, ConnAck, Connect, Disconnect, EncodeError, Packet, PubAck, Publish, QoS, ReasonCode,
    SubAck, Subscribe, UnsubAck, Unsubscribe, PROTOCOL_LEVEL, PROTOCOL_NAME,
};

/// MQTT v5.0 packet encoder
#[derive(Debug, Default, Clone, Copy)]
pub struct Encoder;

impl Encoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode a packet to the buffer
    pub fn encode(&self, packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match packet {
            Packet::Connect(p) => encode_connect(p, buf),
            Packet::ConnAck(p) => encode_connack(p, buf),
            Packet::Publish(p) => encode_publish(p, buf),
            Packet::PubAck(p) => encode_puback(p, buf),
            Packet::Subscribe(p) => encode_subscribe(p, buf),
            Packet::SubAck(p) => encode_suback(p, buf),
            Packet::Unsubscribe(p) => encode_unsubscribe(p, buf),
            Packet::UnsubAck(p) => encode_unsuback(p, buf),
            Packet::PingReq => {
                buf.put_u8(0xC0);
                buf.put_u8(0x00);
                Ok(())
            }
            Packet::PingResp => {
                buf.put_u8(0xD0);
                buf.put_u8(0x00);
                Ok(())
            }
            Packet::Disconnect(p) => encode_disconnect(p, buf),
            Packet::Auth(p) => encode_auth(p, buf),
        }
    }
}

fn props_len(props: &crate::protocol::Properties) -> usize {
    let len = props.encoded_size();
    variable_int_len(len as u32) + len
}

fn encode_connect(packet: &Connect, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let mut remaining_length = 0;

    // Protocol name with length prefix + level byte + flags byte + keep alive
    remaining_length += 2 + PROTOCOL_NAME.len() + 1 + 1 + 2;
    remaining_length += props_len(&packet.properties);
    remaining_length += 2 + packet.client_id.len();

    if let Some(ref username) = packet.username {
        remaining_length += 2 + username.len();
    }
    if let Some(ref password) = packet.password {
        remaining_length += 2 + password.len();
    }

    buf.put_u8(0x10);
    write_variable_int(buf, remaining_length as u32)?;

    write_string(buf, PROTOCOL_NAME)?;
    buf.put_u8(PROTOCOL_LEVEL);

    let mut connect_flags: u8 = 0;
    if packet.clean_start {
        connect_flags |= 0x02;
    }
    if packet.password.is_some() {
        connect_flags |= 0x40;
    }
    if packet.username.is_some() {
        connect_flags |= 0x80;
    }
    buf.put_u8(connect_flags);

    buf.put_u16(packet.keep_alive);
    packet.properties.encode(buf)?;
    write_string(buf, &packet.client_id)?;

    if let Some(ref username) = packet.username {
        write_string(buf, username)?;
    }
    if let Some(ref password) = packet.password {
        write_binary(buf, password)?;
    }

    Ok(())
}

fn encode_connack(packet: &ConnAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let remaining_length = 2 + props_len(&packet.properties);

    buf.put_u8(0x20);
    write_variable_int(buf, remaining_length as u32)?;
    buf.put_u8(if packet.session_present { 0x01 } else { 0x00 });
    buf.put_u8(packet.reason_code as u8);
    packet.properties.encode(buf)?;

    Ok(())
}

fn encode_publish(packet: &Publish, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let mut remaining_length = 2 + packet.topic.len();
    if packet.qos != QoS::AtMostOnce {
        remaining_length += 2;
    }
    remaining_length += props_len(&packet.properties);
    remaining_length += packet.payload.len();

    let mut first_byte: u8 = 0x30;
    if packet.dup {
        first_byte |= 0x08;
    }
    first_byte |= (packet.qos as u8) << 1;
    if packet.retain {
        first_byte |= 0x01;
    }
    buf.put_u8(first_byte);
    write_variable_int(buf, remaining_length as u32)?;

    write_string(buf, &packet.topic)?;

    if let Some(packet_id) = packet.packet_id {
        buf.put_u16(packet_id);
    }

    packet.properties.encode(buf)?;
    buf.put_slice(&packet.payload);

    Ok(())
}

fn encode_puback(packet: &PubAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
    // Reason code and properties may be omitted entirely on success
    if packet.reason_code == ReasonCode::Success && packet.properties.is_empty() {
        buf.put_u8(0x40);
        buf.put_u8(0x02);
        buf.put_u16(packet.packet_id);
        return Ok(());
    }

    let has_props = !packet.properties.is_empty();
    let remaining_length = if has_props {
        2 + 1 + props_len(&packet.properties)
    } else {
        2 + 1
    };

    buf.put_u8(0x40);
    write_variable_int(buf, remaining_length as u32)?;
    buf.put_u16(packet.packet_id);
    buf.put_u8(packet.reason_code as u8);
    if has_props {
        packet.properties.encode(buf)?;
    }

    Ok(())
}

fn encode_subscribe(packet: &Subscribe, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let mut remaining_length = 2 + props_len(&packet.properties);
    for sub in &packet.subscriptions {
        remaining_length += 2 + sub.filter.len() + 1;
    }

    // SUBSCRIBE carries fixed flags 0010
    buf.put_u8(0x82);
    write_variable_int(buf, remaining_length as u32)?;
    buf.put_u16(packet.packet_id);
    packet.properties.encode(buf)?;

    for sub in &packet.subscriptions {
        write_string(buf, &sub.filter)?;
        buf.put_u8(sub.options.to_byte());
    }

    Ok(())
}

fn encode_suback(packet: &SubAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let remaining_length = 2 + props_len(&packet.properties) + packet.reason_codes.len();

    buf.put_u8(0x90);
    write_variable_int(buf, remaining_length as u32)?;
    buf.put_u16(packet.packet_id);
    packet.properties.encode(buf)?;

    for code in &packet.reason_codes {
        buf.put_u8(*code as u8);
    }

    Ok(())
}

fn encode_unsubscribe(packet: &Unsubscribe, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let mut remaining_length = 2 + props_len(&packet.properties);
    for filter in &packet.filters {
        remaining_length += 2 + filter.len();
    }

    // UNSUBSCRIBE carries fixed flags 0010
    buf.put_u8(0xA2);
    write_variable_int(buf, remaining_length as u32)?;
    buf.put_u16(packet.packet_id);
    packet.properties.encode(buf)?;

    for filter in &packet.filters {
        write_string(buf, filter)?;
    }

    Ok(())
}

fn encode_unsuback(packet: &UnsubAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let remaining_length = 2 + props_len(&packet.properties) + packet.reason_codes.len();

    buf.put_u8(0xB0);
    write_variable_int(buf, remaining_length as u32)?;
    buf.put_u16(packet.packet_id);
    packet.properties.encode(buf)?;

    for code in &packet.reason_codes {
        buf.put_u8(*code as u8);
    }

    Ok(())
}

fn encode_disconnect(packet: &Disconnect, buf: &mut BytesMut) -> Result<(), EncodeError> {
    if packet.reason_code == ReasonCode::Success && packet.properties.is_empty() {
        buf.put_u8(0xE0);
        buf.put_u8(0x00);
        return Ok(());
    }

    let has_props = !packet.properties.is_empty();
    let remaining_length = if has_props {
        1 + props_len(&packet.properties)
    } else {
        1
    };

    buf.put_u8(0xE0);
    write_variable_int(buf, remaining_length as u32)?;
    buf.put_u8(packet.reason_code as u8);
    if has_props {
        packet.properties.encode(buf)?;
    }

    Ok(())
}

fn encode_auth(packet: &Auth, buf: &mut BytesMut) -> Result<(), EncodeError> {
    if packet.reason_code == ReasonCode::Success && packet.properties.is_empty() {
        buf.put_u8(0xF0);
        buf.put_u8(0x00);
        return Ok(());
    }

    let has_props = !packet.properties.is_empty();
    let remaining_length = if has_props {
        1 + props_len(&packet.properties)
    } else {
        1
    };

    buf.put_u8(0xF0);
    write_variable_int(buf, remaining_length as u32)?;
    buf.put_u8(packet.reason_code as u8);
    if has_props {
        packet.properties.encode(buf)?;
    }

    Ok(())
}
