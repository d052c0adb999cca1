//! Protocol error types

use std::fmt;

/// Errors that can occur during packet decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough data in buffer
    InsufficientData,
    /// Invalid packet type nibble
    InvalidPacketType(u8),
    /// Packet type is valid MQTT but not supported by this broker (QoS 2 flow)
    UnsupportedPacketType(u8),
    /// Invalid remaining length encoding (5th continuation byte)
    InvalidRemainingLength,
    /// Invalid protocol name (must be "MQTT")
    InvalidProtocolName,
    /// Invalid protocol level (must be 5)
    InvalidProtocolLevel(u8),
    /// Invalid QoS value
    InvalidQoS(u8),
    /// Invalid UTF-8 string
    InvalidUtf8,
    /// String exceeds maximum length
    StringTooLong,
    /// Invalid property identifier
    InvalidPropertyId(u8),
    /// Duplicate property (only user-property may repeat)
    DuplicateProperty(u8),
    /// Property not allowed in this packet type
    PropertyNotAllowed(u8),
    /// Invalid fixed header flags
    InvalidFlags,
    /// Malformed packet
    MalformedPacket(&'static str),
    /// Declared remaining length exceeds the configured maximum packet size
    PacketTooLarge,
    /// Invalid reason code
    InvalidReasonCode(u8),
    /// Invalid subscription options byte (reserved bits set)
    InvalidSubscriptionOptions,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient data in buffer"),
            Self::InvalidPacketType(t) => write!(f, "invalid packet type: {}", t),
            Self::UnsupportedPacketType(t) => write!(f, "unsupported packet type: {}", t),
            Self::InvalidRemainingLength => write!(f, "invalid remaining length encoding"),
            Self::InvalidProtocolName => write!(f, "invalid protocol name"),
            Self::InvalidProtocolLevel(v) => write!(f, "invalid protocol level: {}", v),
            Self::InvalidQoS(q) => write!(f, "invalid QoS value: {}", q),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 string"),
            Self::StringTooLong => write!(f, "string exceeds maximum length"),
            Self::InvalidPropertyId(id) => write!(f, "invalid property identifier: {}", id),
            Self::DuplicateProperty(id) => write!(f, "duplicate property: {}", id),
            Self::PropertyNotAllowed(id) => {
                write!(f, "property {} not allowed in this packet", id)
            }
            Self::InvalidFlags => write!(f, "invalid packet flags"),
            Self::MalformedPacket(msg) => write!(f, "malformed packet: {}", msg),
            Self::PacketTooLarge => write!(f, "packet too large"),
            Self::InvalidReasonCode(r) => write!(f, "invalid reason code: {}", r),
            Self::InvalidSubscriptionOptions => write!(f, "invalid subscription options"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors that can occur during packet encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Packet exceeds the maximum representable remaining length
    PacketTooLarge,
    /// String exceeds the two-byte length prefix
    StringTooLong,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PacketTooLarge => write!(f, "packet too large"),
            Self::StringTooLong => write!(f, "string too long"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// High-level protocol errors produced by the connection state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Decode error (maps to DISCONNECT 0x81)
    Decode(DecodeError),
    /// Encode error
    Encode(EncodeError),
    /// Well-formed but forbidden (maps to DISCONNECT 0x82)
    ProtocolViolation(&'static str),
    /// Invalid topic filter (0x8F)
    TopicFilterInvalid,
    /// Invalid topic name (0x90)
    TopicNameInvalid,
    /// Quota exceeded (0x97)
    QuotaExceeded,
    /// QoS level not supported by this broker (0x9B)
    QoSNotSupported,
    /// Displaced by a newer connection with the same client identifier (0x8E)
    SessionTakenOver,
    /// Keep alive timeout (0x8D)
    KeepAliveTimeout,
    /// Write buffer overflow (0x93)
    ReceiveMaximumExceeded,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decode error: {}", e),
            Self::Encode(e) => write!(f, "encode error: {}", e),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Self::TopicFilterInvalid => write!(f, "topic filter invalid"),
            Self::TopicNameInvalid => write!(f, "topic name invalid"),
            Self::QuotaExceeded => write!(f, "quota exceeded"),
            Self::QoSNotSupported => write!(f, "QoS not supported"),
            Self::SessionTakenOver => write!(f, "session taken over"),
            Self::KeepAliveTimeout => write!(f, "keep alive timeout"),
            Self::ReceiveMaximumExceeded => write!(f, "receive maximum exceeded"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<DecodeError> for ProtocolError {
    fn from(e: DecodeError) -> Self {
        ProtocolError::Decode(e)
    }
}

impl From<EncodeError> for ProtocolError {
    fn from(e: EncodeError) -> Self {
        ProtocolError::Encode(e)
    }
}

impl ProtocolError {
    /// The DISCONNECT reason code this error maps to on the wire
    pub fn reason_code(&self) -> crate::protocol::ReasonCode {
        use crate::protocol::ReasonCode;
        match self {
            Self::Decode(_) | Self::Encode(_) => ReasonCode::MalformedPacket,
            Self::ProtocolViolation(_) => ReasonCode::ProtocolError,
            Self::TopicFilterInvalid => ReasonCode::TopicFilterInvalid,
            Self::TopicNameInvalid => ReasonCode::TopicNameInvalid,
            Self::QuotaExceeded => ReasonCode::QuotaExceeded,
            Self::QoSNotSupported => ReasonCode::QoSNotSupported,
            Self::SessionTakenOver => ReasonCode::SessionTakenOver,
            Self::KeepAliveTimeout => ReasonCode::KeepAliveTimeout,
            Self::ReceiveMaximumExceeded => ReasonCode::ReceiveMaxExceeded,
        }
    }
}
