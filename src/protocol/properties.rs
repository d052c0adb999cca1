//! MQTT v5.0 properties
//!
//! Properties are decoded into a flat struct with one optional slot per
//! identifier (user properties and subscription identifiers may repeat).
//! Every identifier is only legal in an enumerated set of packet types;
//! [`Properties::validate_for`] enforces that set after decoding.

use bytes::{BufMut, Bytes, BytesMut};
use smallvec::SmallVec;

use crate::codec::{
    read_binary, read_string, read_variable_int, variable_int_len, write_binary, write_string,
    write_variable_int,
};
use crate::protocol::{DecodeError, EncodeError, PacketType};

/// Property identifiers as defined in Table 2-4 of the MQTT v5.0 spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PropertyId {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0B,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1A,
    ServerReference = 0x1C,
    ReasonString = 0x1F,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2A,
}

impl PropertyId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(PropertyId::PayloadFormatIndicator),
            0x02 => Some(PropertyId::MessageExpiryInterval),
            0x03 => Some(PropertyId::ContentType),
            0x08 => Some(PropertyId::ResponseTopic),
            0x09 => Some(PropertyId::CorrelationData),
            0x0B => Some(PropertyId::SubscriptionIdentifier),
            0x11 => Some(PropertyId::SessionExpiryInterval),
            0x12 => Some(PropertyId::AssignedClientIdentifier),
            0x13 => Some(PropertyId::ServerKeepAlive),
            0x15 => Some(PropertyId::AuthenticationMethod),
            0x16 => Some(PropertyId::AuthenticationData),
            0x17 => Some(PropertyId::RequestProblemInformation),
            0x18 => Some(PropertyId::WillDelayInterval),
            0x19 => Some(PropertyId::RequestResponseInformation),
            0x1A => Some(PropertyId::ResponseInformation),
            0x1C => Some(PropertyId::ServerReference),
            0x1F => Some(PropertyId::ReasonString),
            0x21 => Some(PropertyId::ReceiveMaximum),
            0x22 => Some(PropertyId::TopicAliasMaximum),
            0x23 => Some(PropertyId::TopicAlias),
            0x24 => Some(PropertyId::MaximumQoS),
            0x25 => Some(PropertyId::RetainAvailable),
            0x26 => Some(PropertyId::UserProperty),
            0x27 => Some(PropertyId::MaximumPacketSize),
            0x28 => Some(PropertyId::WildcardSubscriptionAvailable),
            0x29 => Some(PropertyId::SubscriptionIdentifierAvailable),
            0x2A => Some(PropertyId::SharedSubscriptionAvailable),
            _ => None,
        }
    }

    /// Whether this property is legal in the given packet type
    pub fn allowed_in(self, packet_type: PacketType) -> bool {
        use PacketType::*;
        match self {
            PropertyId::PayloadFormatIndicator
            | PropertyId::MessageExpiryInterval
            | PropertyId::ContentType
            | PropertyId::ResponseTopic
            | PropertyId::CorrelationData => matches!(packet_type, Publish),
            PropertyId::SubscriptionIdentifier => matches!(packet_type, Publish | Subscribe),
            PropertyId::SessionExpiryInterval => {
                matches!(packet_type, Connect | ConnAck | Disconnect)
            }
            PropertyId::AssignedClientIdentifier
            | PropertyId::ServerKeepAlive
            | PropertyId::ResponseInformation
            | PropertyId::MaximumQoS
            | PropertyId::RetainAvailable
            | PropertyId::WildcardSubscriptionAvailable
            | PropertyId::SubscriptionIdentifierAvailable
            | PropertyId::SharedSubscriptionAvailable => matches!(packet_type, ConnAck),
            PropertyId::AuthenticationMethod | PropertyId::AuthenticationData => {
                matches!(packet_type, Connect | ConnAck | Auth)
            }
            PropertyId::RequestProblemInformation
            | PropertyId::RequestResponseInformation => matches!(packet_type, Connect),
            // Will delay only appears in will properties, never in a packet
            PropertyId::WillDelayInterval => false,
            PropertyId::ServerReference => matches!(packet_type, ConnAck | Disconnect),
            PropertyId::ReasonString => matches!(
                packet_type,
                ConnAck | PubAck | SubAck | UnsubAck | Disconnect | Auth
            ),
            PropertyId::ReceiveMaximum
            | PropertyId::TopicAliasMaximum
            | PropertyId::MaximumPacketSize => matches!(packet_type, Connect | ConnAck),
            PropertyId::TopicAlias => matches!(packet_type, Publish),
            PropertyId::UserProperty => true,
        }
    }

    /// Whether this property is legal in will properties
    fn allowed_in_will(self) -> bool {
        matches!(
            self,
            PropertyId::PayloadFormatIndicator
                | PropertyId::MessageExpiryInterval
                | PropertyId::ContentType
                | PropertyId::ResponseTopic
                | PropertyId::CorrelationData
                | PropertyId::WillDelayInterval
                | PropertyId::UserProperty
        )
    }
}

/// Decoded property list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub payload_format_indicator: Option<u8>,
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Bytes>,
    pub subscription_identifiers: Vec<u32>,
    pub session_expiry_interval: Option<u32>,
    pub assigned_client_identifier: Option<String>,
    pub server_keep_alive: Option<u16>,
    pub authentication_method: Option<String>,
    pub authentication_data: Option<Bytes>,
    pub request_problem_information: Option<u8>,
    pub will_delay_interval: Option<u32>,
    pub request_response_information: Option<u8>,
    pub response_information: Option<String>,
    pub server_reference: Option<String>,
    pub reason_string: Option<String>,
    pub receive_maximum: Option<u16>,
    pub topic_alias_maximum: Option<u16>,
    pub topic_alias: Option<u16>,
    pub maximum_qos: Option<u8>,
    pub retain_available: Option<u8>,
    pub user_properties: Vec<(String, String)>,
    pub maximum_packet_size: Option<u32>,
    pub wildcard_subscription_available: Option<u8>,
    pub subscription_identifier_available: Option<u8>,
    pub shared_subscription_available: Option<u8>,
}

/// Store a singleton property, rejecting duplicates
fn set_once<T>(slot: &mut Option<T>, value: T, id: PropertyId) -> Result<(), DecodeError> {
    if slot.is_some() {
        return Err(DecodeError::DuplicateProperty(id as u8));
    }
    *slot = Some(value);
    Ok(())
}

fn take_u8(buf: &[u8], pos: &mut usize, end: usize) -> Result<u8, DecodeError> {
    if *pos >= end {
        return Err(DecodeError::MalformedPacket("property extends past length"));
    }
    let v = buf[*pos];
    *pos += 1;
    Ok(v)
}

fn take_u16(buf: &[u8], pos: &mut usize, end: usize) -> Result<u16, DecodeError> {
    if *pos + 2 > end {
        return Err(DecodeError::MalformedPacket("property extends past length"));
    }
    let v = u16::from_be_bytes([buf[*pos], buf[*pos + 1]]);
    *pos += 2;
    Ok(v)
}

fn take_u32(buf: &[u8], pos: &mut usize, end: usize) -> Result<u32, DecodeError> {
    if *pos + 4 > end {
        return Err(DecodeError::MalformedPacket("property extends past length"));
    }
    let v = u32::from_be_bytes([buf[*pos], buf[*pos + 1], buf[*pos + 2], buf[*pos + 3]]);
    *pos += 4;
    Ok(v)
}

fn take_str(buf: &[u8], pos: &mut usize, end: usize) -> Result<String, DecodeError> {
    let (s, len) = read_string(&buf[*pos..end])?;
    let out = s.to_string();
    *pos += len;
    Ok(out)
}

fn take_bin(buf: &[u8], pos: &mut usize, end: usize) -> Result<Bytes, DecodeError> {
    let (data, len) = read_binary(&buf[*pos..end])?;
    let out = Bytes::copy_from_slice(data);
    *pos += len;
    Ok(out)
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Decode a property region: VBI length prefix, then (id, value) pairs.
    ///
    /// The region is sliced to the declared length; a property that extends
    /// past the slice or a slice that is under-consumed is a malformed-packet
    /// error. Returns the properties and the total bytes consumed (prefix
    /// included).
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buf.is_empty() {
            return Err(DecodeError::InsufficientData);
        }

        let (prop_len, len_bytes) = read_variable_int(buf)?;
        let end = len_bytes + prop_len as usize;
        if buf.len() < end {
            return Err(DecodeError::InsufficientData);
        }

        let mut props = Properties::new();
        let mut pos = len_bytes;

        while pos < end {
            let (raw_id, id_len) = read_variable_int(&buf[pos..end])?;
            pos += id_len;
            if raw_id > u8::MAX as u32 {
                return Err(DecodeError::InvalidPropertyId(0xFF));
            }
            let id = PropertyId::from_u8(raw_id as u8)
                .ok_or(DecodeError::InvalidPropertyId(raw_id as u8))?;

            match id {
                PropertyId::PayloadFormatIndicator => {
                    let v = take_u8(buf, &mut pos, end)?;
                    set_once(&mut props.payload_format_indicator, v, id)?;
                }
                PropertyId::MessageExpiryInterval => {
                    let v = take_u32(buf, &mut pos, end)?;
                    set_once(&mut props.message_expiry_interval, v, id)?;
                }
                PropertyId::ContentType => {
                    let v = take_str(buf, &mut pos, end)?;
                    set_once(&mut props.content_type, v, id)?;
                }
                PropertyId::ResponseTopic => {
                    let v = take_str(buf, &mut pos, end)?;
                    set_once(&mut props.response_topic, v, id)?;
                }
                PropertyId::CorrelationData => {
                    let v = take_bin(buf, &mut pos, end)?;
                    set_once(&mut props.correlation_data, v, id)?;
                }
                PropertyId::SubscriptionIdentifier => {
                    let (v, len) = read_variable_int(&buf[pos..end])?;
                    pos += len;
                    if v == 0 {
                        return Err(DecodeError::MalformedPacket(
                            "subscription identifier cannot be 0",
                        ));
                    }
                    props.subscription_identifiers.push(v);
                }
                PropertyId::SessionExpiryInterval => {
                    let v = take_u32(buf, &mut pos, end)?;
                    set_once(&mut props.session_expiry_interval, v, id)?;
                }
                PropertyId::AssignedClientIdentifier => {
                    let v = take_str(buf, &mut pos, end)?;
                    set_once(&mut props.assigned_client_identifier, v, id)?;
                }
                PropertyId::ServerKeepAlive => {
                    let v = take_u16(buf, &mut pos, end)?;
                    set_once(&mut props.server_keep_alive, v, id)?;
                }
                PropertyId::AuthenticationMethod => {
                    let v = take_str(buf, &mut pos, end)?;
                    set_once(&mut props.authentication_method, v, id)?;
                }
                PropertyId::AuthenticationData => {
                    let v = take_bin(buf, &mut pos, end)?;
                    set_once(&mut props.authentication_data, v, id)?;
                }
                PropertyId::RequestProblemInformation => {
                    let v = take_u8(buf, &mut pos, end)?;
                    set_once(&mut props.request_problem_information, v, id)?;
                }
                PropertyId::WillDelayInterval => {
                    let v = take_u32(buf, &mut pos, end)?;
                    set_once(&mut props.will_delay_interval, v, id)?;
                }
                PropertyId::RequestResponseInformation => {
                    let v = take_u8(buf, &mut pos, end)?;
                    set_once(&mut props.request_response_information, v, id)?;
                }
                PropertyId::ResponseInformation => {
                    let v = take_str(buf, &mut pos, end)?;
                    set_once(&mut props.response_information, v, id)?;
                }
                PropertyId::ServerReference => {
                    let v = take_str(buf, &mut pos, end)?;
                    set_once(&mut props.server_reference, v, id)?;
                }
                PropertyId::ReasonString => {
                    let v = take_str(buf, &mut pos, end)?;
                    set_once(&mut props.reason_string, v, id)?;
                }
                PropertyId::ReceiveMaximum => {
                    let v = take_u16(buf, &mut pos, end)?;
                    if v == 0 {
                        return Err(DecodeError::MalformedPacket("receive maximum cannot be 0"));
                    }
                    set_once(&mut props.receive_maximum, v, id)?;
                }
                PropertyId::TopicAliasMaximum => {
                    let v = take_u16(buf, &mut pos, end)?;
                    set_once(&mut props.topic_alias_maximum, v, id)?;
                }
                PropertyId::TopicAlias => {
                    let v = take_u16(buf, &mut pos, end)?;
                    if v == 0 {
                        return Err(DecodeError::MalformedPacket("topic alias cannot be 0"));
                    }
                    set_once(&mut props.topic_alias, v, id)?;
                }
                PropertyId::MaximumQoS => {
                    let v = take_u8(buf, &mut pos, end)?;
                    if v > 1 {
                        return Err(DecodeError::MalformedPacket("maximum QoS must be 0 or 1"));
                    }
                    set_once(&mut props.maximum_qos, v, id)?;
                }
                PropertyId::RetainAvailable => {
                    let v = take_u8(buf, &mut pos, end)?;
                    set_once(&mut props.retain_available, v, id)?;
                }
                PropertyId::UserProperty => {
                    let key = take_str(buf, &mut pos, end)?;
                    let val = take_str(buf, &mut pos, end)?;
                    props.user_properties.push((key, val));
                }
                PropertyId::MaximumPacketSize => {
                    let v = take_u32(buf, &mut pos, end)?;
                    if v == 0 {
                        return Err(DecodeError::MalformedPacket(
                            "maximum packet size cannot be 0",
                        ));
                    }
                    set_once(&mut props.maximum_packet_size, v, id)?;
                }
                PropertyId::WildcardSubscriptionAvailable => {
                    let v = take_u8(buf, &mut pos, end)?;
                    set_once(&mut props.wildcard_subscription_available, v, id)?;
                }
                PropertyId::SubscriptionIdentifierAvailable => {
                    let v = take_u8(buf, &mut pos, end)?;
                    set_once(&mut props.subscription_identifier_available, v, id)?;
                }
                PropertyId::SharedSubscriptionAvailable => {
                    let v = take_u8(buf, &mut pos, end)?;
                    set_once(&mut props.shared_subscription_available, v, id)?;
                }
            }
        }

        if pos != end {
            return Err(DecodeError::MalformedPacket("property length mismatch"));
        }

        Ok((props, end))
    }

    /// Identifiers of every populated property slot
    fn populated(&self) -> SmallVec<[PropertyId; 8]> {
        let mut ids = SmallVec::new();
        macro_rules! mark {
            ($slot:expr, $id:expr) => {
                if $slot.is_some() {
                    ids.push($id);
                }
            };
        }
        mark!(self.payload_format_indicator, PropertyId::PayloadFormatIndicator);
        mark!(self.message_expiry_interval, PropertyId::MessageExpiryInterval);
        mark!(self.content_type, PropertyId::ContentType);
        mark!(self.response_topic, PropertyId::ResponseTopic);
        mark!(self.correlation_data, PropertyId::CorrelationData);
        if !self.subscription_identifiers.is_empty() {
            ids.push(PropertyId::SubscriptionIdentifier);
        }
        mark!(self.session_expiry_interval, PropertyId::SessionExpiryInterval);
        mark!(self.assigned_client_identifier, PropertyId::AssignedClientIdentifier);
        mark!(self.server_keep_alive, PropertyId::ServerKeepAlive);
        mark!(self.authentication_method, PropertyId::AuthenticationMethod);
        mark!(self.authentication_data, PropertyId::AuthenticationData);
        mark!(self.request_problem_information, PropertyId::RequestProblemInformation);
        mark!(self.will_delay_interval, PropertyId::WillDelayInterval);
        mark!(self.request_response_information, PropertyId::RequestResponseInformation);
        mark!(self.response_information, PropertyId::ResponseInformation);
        mark!(self.server_reference, PropertyId::ServerReference);
        mark!(self.reason_string, PropertyId::ReasonString);
        mark!(self.receive_maximum, PropertyId::ReceiveMaximum);
        mark!(self.topic_alias_maximum, PropertyId::TopicAliasMaximum);
        mark!(self.topic_alias, PropertyId::TopicAlias);
        mark!(self.maximum_qos, PropertyId::MaximumQoS);
        mark!(self.retain_available, PropertyId::RetainAvailable);
        if !self.user_properties.is_empty() {
            ids.push(PropertyId::UserProperty);
        }
        mark!(self.maximum_packet_size, PropertyId::MaximumPacketSize);
        mark!(self.wildcard_subscription_available, PropertyId::WildcardSubscriptionAvailable);
        mark!(self.subscription_identifier_available, PropertyId::SubscriptionIdentifierAvailable);
        mark!(self.shared_subscription_available, PropertyId::SharedSubscriptionAvailable);
        ids
    }

    /// Reject properties that are not legal in the given packet type
    pub fn validate_for(&self, packet_type: PacketType) -> Result<(), DecodeError> {
        // The subscription identifier may repeat only in an outbound PUBLISH
        // (one per matched subscription); everywhere else a second occurrence
        // is a duplicate like any other singleton property
        if self.subscription_identifiers.len() > 1 && packet_type != PacketType::Publish {
            return Err(DecodeError::DuplicateProperty(
                PropertyId::SubscriptionIdentifier as u8,
            ));
        }
        for id in self.populated() {
            if !id.allowed_in(packet_type) {
                return Err(DecodeError::PropertyNotAllowed(id as u8));
            }
        }
        Ok(())
    }

    /// Reject properties that are not legal in will properties
    pub fn validate_for_will(&self) -> Result<(), DecodeError> {
        for id in self.populated() {
            if !id.allowed_in_will() {
                return Err(DecodeError::PropertyNotAllowed(id as u8));
            }
        }
        Ok(())
    }

    /// Encoded size of the property region, excluding the length prefix
    pub fn encoded_size(&self) -> usize {
        let mut size = 0;
        if self.payload_format_indicator.is_some() {
            size += 2;
        }
        if self.message_expiry_interval.is_some() {
            size += 5;
        }
        if let Some(ref s) = self.content_type {
            size += 1 + 2 + s.len();
        }
        if let Some(ref s) = self.response_topic {
            size += 1 + 2 + s.len();
        }
        if let Some(ref d) = self.correlation_data {
            size += 1 + 2 + d.len();
        }
        for id in &self.subscription_identifiers {
            size += 1 + variable_int_len(*id);
        }
        if self.session_expiry_interval.is_some() {
            size += 5;
        }
        if let Some(ref s) = self.assigned_client_identifier {
            size += 1 + 2 + s.len();
        }
        if self.server_keep_alive.is_some() {
            size += 3;
        }
        if let Some(ref s) = self.authentication_method {
            size += 1 + 2 + s.len();
        }
        if let Some(ref d) = self.authentication_data {
            size += 1 + 2 + d.len();
        }
        if self.request_problem_information.is_some() {
            size += 2;
        }
        if self.will_delay_interval.is_some() {
            size += 5;
        }
        if self.request_response_information.is_some() {
            size += 2;
        }
        if let Some(ref s) = self.response_information {
            size += 1 + 2 + s.len();
        }
        if let Some(ref s) = self.server_reference {
            size += 1 + 2 + s.len();
        }
        if let Some(ref s) = self.reason_string {
            size += 1 + 2 + s.len();
        }
        if self.receive_maximum.is_some() {
            size += 3;
        }
        if self.topic_alias_maximum.is_some() {
            size += 3;
        }
        if self.topic_alias.is_some() {
            size += 3;
        }
        if self.maximum_qos.is_some() {
            size += 2;
        }
        if self.retain_available.is_some() {
            size += 2;
        }
        for (k, v) in &self.user_properties {
            size += 1 + 2 + k.len() + 2 + v.len();
        }
        if self.maximum_packet_size.is_some() {
            size += 5;
        }
        if self.wildcard_subscription_available.is_some() {
            size += 2;
        }
        if self.subscription_identifier_available.is_some() {
            size += 2;
        }
        if self.shared_subscription_available.is_some() {
            size += 2;
        }
        size
    }

    /// Encode the property region with its length prefix
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let size = self.encoded_size();
        write_variable_int(buf, size as u32)?;

        if let Some(v) = self.payload_format_indicator {
            buf.put_u8(PropertyId::PayloadFormatIndicator as u8);
            buf.put_u8(v);
        }
        if let Some(v) = self.message_expiry_interval {
            buf.put_u8(PropertyId::MessageExpiryInterval as u8);
            buf.put_u32(v);
        }
        if let Some(ref s) = self.content_type {
            buf.put_u8(PropertyId::ContentType as u8);
            write_string(buf, s)?;
        }
        if let Some(ref s) = self.response_topic {
            buf.put_u8(PropertyId::ResponseTopic as u8);
            write_string(buf, s)?;
        }
        if let Some(ref d) = self.correlation_data {
            buf.put_u8(PropertyId::CorrelationData as u8);
            write_binary(buf, d)?;
        }
        for id in &self.subscription_identifiers {
            buf.put_u8(PropertyId::SubscriptionIdentifier as u8);
            write_variable_int(buf, *id)?;
        }
        if let Some(v) = self.session_expiry_interval {
            buf.put_u8(PropertyId::SessionExpiryInterval as u8);
            buf.put_u32(v);
        }
        if let Some(ref s) = self.assigned_client_identifier {
            buf.put_u8(PropertyId::AssignedClientIdentifier as u8);
            write_string(buf, s)?;
        }
        if let Some(v) = self.server_keep_alive {
            buf.put_u8(PropertyId::ServerKeepAlive as u8);
            buf.put_u16(v);
        }
        if let Some(ref s) = self.authentication_method {
            buf.put_u8(PropertyId::AuthenticationMethod as u8);
            write_string(buf, s)?;
        }
        if let Some(ref d) = self.authentication_data {
            buf.put_u8(PropertyId::AuthenticationData as u8);
            write_binary(buf, d)?;
        }
        if let Some(v) = self.request_problem_information {
            buf.put_u8(PropertyId::RequestProblemInformation as u8);
            buf.put_u8(v);
        }
        if let Some(v) = self.will_delay_interval {
            buf.put_u8(PropertyId::WillDelayInterval as u8);
            buf.put_u32(v);
        }
        if let Some(v) = self.request_response_information {
            buf.put_u8(PropertyId::RequestResponseInformation as u8);
            buf.put_u8(v);
        }
        if let Some(ref s) = self.response_information {
            buf.put_u8(PropertyId::ResponseInformation as u8);
            write_string(buf, s)?;
        }
        if let Some(ref s) = self.server_reference {
            buf.put_u8(PropertyId::ServerReference as u8);
            write_string(buf, s)?;
        }
        if let Some(ref s) = self.reason_string {
            buf.put_u8(PropertyId::ReasonString as u8);
            write_string(buf, s)?;
        }
        if let Some(v) = self.receive_maximum {
            buf.put_u8(PropertyId::ReceiveMaximum as u8);
            buf.put_u16(v);
        }
        if let Some(v) = self.topic_alias_maximum {
            buf.put_u8(PropertyId::TopicAliasMaximum as u8);
            buf.put_u16(v);
        }
        if let Some(v) = self.topic_alias {
            buf.put_u8(PropertyId::TopicAlias as u8);
            buf.put_u16(v);
        }
        if let Some(v) = self.maximum_qos {
            buf.put_u8(PropertyId::MaximumQoS as u8);
            buf.put_u8(v);
        }
        if let Some(v) = self.retain_available {
            buf.put_u8(PropertyId::RetainAvailable as u8);
            buf.put_u8(v);
        }
        for (k, v) in &self.user_properties {
            buf.put_u8(PropertyId::UserProperty as u8);
            write_string(buf, k)?;
            write_string(buf, v)?;
        }
        if let Some(v) = self.maximum_packet_size {
            buf.put_u8(PropertyId::MaximumPacketSize as u8);
            buf.put_u32(v);
        }
        if let Some(v) = self.wildcard_subscription_available {
            buf.put_u8(PropertyId::WildcardSubscriptionAvailable as u8);
            buf.put_u8(v);
        }
        if let Some(v) = self.subscription_identifier_available {
            buf.put_u8(PropertyId::SubscriptionIdentifierAvailable as u8);
            buf.put_u8(v);
        }
        if let Some(v) = self.shared_subscription_available {
            buf.put_u8(PropertyId::SharedSubscriptionAvailable as u8);
            buf.put_u8(v);
        }

        Ok(())
    }
}
