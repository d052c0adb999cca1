//! Codec tests
//!
//! Round-trip coverage for every packet type plus the binary edge cases:
//! variable byte integer boundaries, partial reads, reserved bits, duplicate
//! and misplaced properties.

#![allow(clippy::field_reassign_with_default)]

use bytes::{Bytes, BytesMut};
use pretty_assertions::assert_eq;

use crate::codec::{
    read_variable_int, write_variable_int, Decoder, Encoder, MAX_REMAINING_LENGTH,
};
use crate::protocol::{
    Auth, ConnAck, Connect, DecodeError, Disconnect, Packet, Properties, PubAck, Publish, QoS,
    ReasonCode, RetainHandling, SubAck, Subscribe, SubscriptionOptions, SubscriptionRequest,
    UnsubAck, Unsubscribe,
};

fn encode_packet(packet: &Packet) -> BytesMut {
    let encoder = Encoder::new();
    let mut buf = BytesMut::new();
    encoder.encode(packet, &mut buf).unwrap();
    buf
}

fn decode_packet(buf: &[u8]) -> Result<Packet, DecodeError> {
    let decoder = Decoder::new();
    match decoder.decode(buf)? {
        Some((packet, _)) => Ok(packet),
        None => Err(DecodeError::InsufficientData),
    }
}

fn roundtrip(packet: Packet) {
    let encoded = encode_packet(&packet);
    let decoded = decode_packet(&encoded).unwrap();
    assert_eq!(packet, decoded);
}

// ============================================================================
// Variable byte integer
// ============================================================================

#[test]
fn vbi_boundaries() {
    let cases: &[(u32, &[u8])] = &[
        (0, &[0x00]),
        (127, &[0x7F]),
        (128, &[0x80, 0x01]),
        (16_383, &[0xFF, 0x7F]),
        (16_384, &[0x80, 0x80, 0x01]),
        (2_097_151, &[0xFF, 0xFF, 0x7F]),
        (2_097_152, &[0x80, 0x80, 0x80, 0x01]),
        (268_435_455, &[0xFF, 0xFF, 0xFF, 0x7F]),
    ];

    for (value, bytes) in cases {
        let mut buf = BytesMut::new();
        let written = write_variable_int(&mut buf, *value).unwrap();
        assert_eq!(&buf[..], *bytes, "encoding of {}", value);
        assert_eq!(written, bytes.len());

        let (decoded, consumed) = read_variable_int(bytes).unwrap();
        assert_eq!(decoded, *value);
        assert_eq!(consumed, bytes.len());
    }
}

#[test]
fn vbi_rejects_fifth_continuation_byte() {
    let result = read_variable_int(&[0xFF, 0xFF, 0xFF, 0xFF, 0x7F]);
    assert_eq!(result, Err(DecodeError::InvalidRemainingLength));
}

#[test]
fn vbi_rejects_values_above_maximum() {
    let mut buf = BytesMut::new();
    assert_eq!(
        write_variable_int(&mut buf, MAX_REMAINING_LENGTH as u32 + 1),
        Err(crate::protocol::EncodeError::PacketTooLarge)
    );
}

// ============================================================================
// CONNECT
// ============================================================================

#[test]
fn connect_minimal_roundtrip() {
    roundtrip(Packet::Connect(Box::new(Connect {
        client_id: "c1".to_string(),
        clean_start: true,
        keep_alive: 30,
        username: None,
        password: None,
        will_present: false,
        properties: Properties::default(),
    })));
}

#[test]
fn connect_with_credentials_and_properties() {
    let mut props = Properties::default();
    props.session_expiry_interval = Some(3600);
    props.receive_maximum = Some(64);
    props.maximum_packet_size = Some(65536);
    props.user_properties.push(("origin".to_string(), "sensor".to_string()));

    roundtrip(Packet::Connect(Box::new(Connect {
        client_id: "gateway-7".to_string(),
        clean_start: false,
        keep_alive: 120,
        username: Some("user".to_string()),
        password: Some(Bytes::from_static(b"secret")),
        will_present: false,
        properties: props,
    })));
}

#[test]
fn connect_will_fields_are_consumed_and_dropped() {
    // Hand-built CONNECT with will flag, will QoS 1: will properties, topic
    // and payload sit between client id and the end of the packet
    let body: &[u8] = &[
        0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
        0x05, // level
        0x0E, // clean start + will flag + will QoS 1
        0x00, 0x3C, // keep alive 60
        0x00, // properties
        0x00, 0x02, b'c', b'1', // client id
        0x00, // will properties
        0x00, 0x01, b'w', // will topic
        0x00, 0x02, b'h', b'i', // will payload
    ];
    let mut packet = vec![0x10, body.len() as u8];
    packet.extend_from_slice(body);

    match decode_packet(&packet).unwrap() {
        Packet::Connect(connect) => {
            assert_eq!(connect.client_id, "c1");
            assert_eq!(connect.keep_alive, 60);
            assert!(connect.will_present);
        }
        other => panic!("expected CONNECT, got {:?}", other),
    }
}

#[test]
fn connect_rejects_bad_protocol_name() {
    let body: &[u8] = &[
        0x00, 0x04, b'M', b'Q', b'X', b'X', 0x05, 0x02, 0x00, 0x3C, 0x00, 0x00, 0x00,
    ];
    let mut packet = vec![0x10, body.len() as u8];
    packet.extend_from_slice(body);
    assert_eq!(decode_packet(&packet), Err(DecodeError::InvalidProtocolName));
}

#[test]
fn connect_rejects_protocol_level_4() {
    let body: &[u8] = &[
        0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3C, 0x00, 0x00, 0x00,
    ];
    let mut packet = vec![0x10, body.len() as u8];
    packet.extend_from_slice(body);
    assert_eq!(
        decode_packet(&packet),
        Err(DecodeError::InvalidProtocolLevel(4))
    );
}

#[test]
fn connect_rejects_reserved_flag_bit() {
    let body: &[u8] = &[
        0x00, 0x04, b'M', b'Q', b'T', b'T', 0x05, 0x03, 0x00, 0x3C, 0x00, 0x00, 0x00,
    ];
    let mut packet = vec![0x10, body.len() as u8];
    packet.extend_from_slice(body);
    assert_eq!(decode_packet(&packet), Err(DecodeError::InvalidFlags));
}

// ============================================================================
// CONNACK
// ============================================================================

#[test]
fn connack_roundtrip() {
    let mut props = Properties::default();
    props.receive_maximum = Some(100);
    props.maximum_qos = Some(1);
    props.retain_available = Some(0);
    props.server_keep_alive = Some(600);
    props.assigned_client_identifier = Some("embermq-0000aabbccdd".to_string());

    roundtrip(Packet::ConnAck(ConnAck {
        session_present: true,
        reason_code: ReasonCode::Success,
        properties: props,
    }));
}

#[test]
fn connack_rejects_reserved_ack_flags() {
    let packet: &[u8] = &[0x20, 0x03, 0x02, 0x00, 0x00];
    assert_eq!(decode_packet(packet), Err(DecodeError::InvalidFlags));
}

// ============================================================================
// PUBLISH / PUBACK
// ============================================================================

#[test]
fn publish_qos0_roundtrip() {
    roundtrip(Packet::Publish(Publish {
        dup: false,
        qos: QoS::AtMostOnce,
        retain: false,
        topic: "a/b".into(),
        packet_id: None,
        payload: Bytes::from_static(b"hi"),
        properties: Properties::default(),
    }));
}

#[test]
fn publish_qos1_with_properties_roundtrip() {
    let mut props = Properties::default();
    props.message_expiry_interval = Some(300);
    props.content_type = Some("application/json".to_string());
    props.response_topic = Some("replies/7".to_string());
    props.correlation_data = Some(Bytes::from_static(b"\x01\x02"));
    props.subscription_identifiers.push(9);

    roundtrip(Packet::Publish(Publish {
        dup: true,
        qos: QoS::AtLeastOnce,
        retain: true,
        topic: "metrics/load".into(),
        packet_id: Some(7),
        payload: Bytes::from_static(b"{\"v\":1}"),
        properties: props,
    }));
}

#[test]
fn publish_rejects_qos_3() {
    // Flags 0110: QoS bits set to 3
    let packet: &[u8] = &[0x36, 0x07, 0x00, 0x01, b't', 0x00, 0x01, 0x00, 0x00];
    assert_eq!(decode_packet(packet), Err(DecodeError::InvalidQoS(3)));
}

#[test]
fn publish_rejects_dup_on_qos0() {
    let packet: &[u8] = &[0x38, 0x05, 0x00, 0x01, b't', 0x00, 0x00];
    assert!(matches!(
        decode_packet(packet),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn publish_rejects_wildcard_topic() {
    let encoded = encode_packet(&Packet::Publish(Publish {
        topic: "a/+".into(),
        ..Default::default()
    }));
    assert!(matches!(
        decode_packet(&encoded),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn publish_rejects_zero_packet_id() {
    let packet: &[u8] = &[0x32, 0x08, 0x00, 0x01, b't', 0x00, 0x00, 0x00, 0x00, 0x00];
    assert!(matches!(
        decode_packet(packet),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn publish_rejects_misplaced_property() {
    // server-keep-alive is a CONNACK property
    let mut props = Properties::default();
    props.server_keep_alive = Some(60);
    let encoded = encode_packet(&Packet::Publish(Publish {
        topic: "t".into(),
        properties: props,
        ..Default::default()
    }));
    assert_eq!(
        decode_packet(&encoded),
        Err(DecodeError::PropertyNotAllowed(0x13))
    );
}

#[test]
fn puback_short_form_roundtrip() {
    let packet = Packet::PubAck(PubAck::new(7));
    let encoded = encode_packet(&packet);
    // Success with no properties omits reason code and property length
    assert_eq!(&encoded[..], &[0x40, 0x02, 0x00, 0x07]);
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn puback_with_reason_roundtrip() {
    roundtrip(Packet::PubAck(PubAck {
        packet_id: 1024,
        reason_code: ReasonCode::QuotaExceeded,
        properties: Properties::default(),
    }));
}

// ============================================================================
// SUBSCRIBE / SUBACK / UNSUBSCRIBE / UNSUBACK
// ============================================================================

#[test]
fn subscribe_roundtrip() {
    let mut props = Properties::default();
    props.subscription_identifiers.push(42);

    roundtrip(Packet::Subscribe(Subscribe {
        packet_id: 11,
        subscriptions: vec![
            SubscriptionRequest {
                filter: "a/b".to_string(),
                options: SubscriptionOptions {
                    qos: QoS::AtLeastOnce,
                    no_local: false,
                    retain_as_published: false,
                    retain_handling: RetainHandling::SendAtSubscribe,
                },
            },
            SubscriptionRequest {
                filter: "$share/g/x/#".to_string(),
                options: SubscriptionOptions {
                    qos: QoS::AtMostOnce,
                    no_local: true,
                    retain_as_published: true,
                    retain_handling: RetainHandling::DoNotSend,
                },
            },
        ],
        properties: props,
    }));
}

#[test]
fn subscribe_rejects_wrong_fixed_flags() {
    // SUBSCRIBE must carry flags 0010
    let packet: &[u8] = &[0x80, 0x07, 0x00, 0x01, 0x00, 0x00, 0x01, b'a', 0x01];
    assert_eq!(decode_packet(packet), Err(DecodeError::InvalidFlags));
}

#[test]
fn subscribe_rejects_reserved_option_bits() {
    let packet: &[u8] = &[0x82, 0x07, 0x00, 0x01, 0x00, 0x00, 0x01, b'a', 0xC1];
    assert_eq!(
        decode_packet(packet),
        Err(DecodeError::InvalidSubscriptionOptions)
    );
}

#[test]
fn subscribe_rejects_empty_filter_list() {
    let packet: &[u8] = &[0x82, 0x03, 0x00, 0x01, 0x00];
    assert!(matches!(
        decode_packet(packet),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn suback_roundtrip() {
    roundtrip(Packet::SubAck(SubAck {
        packet_id: 11,
        reason_codes: vec![
            ReasonCode::GrantedQoS1,
            ReasonCode::Success,
            ReasonCode::TopicFilterInvalid,
        ],
        properties: Properties::default(),
    }));
}

#[test]
fn unsubscribe_roundtrip() {
    roundtrip(Packet::Unsubscribe(Unsubscribe {
        packet_id: 12,
        filters: vec!["a/b".to_string(), "c/#".to_string()],
        properties: Properties::default(),
    }));
}

#[test]
fn unsuback_roundtrip() {
    roundtrip(Packet::UnsubAck(UnsubAck {
        packet_id: 12,
        reason_codes: vec![ReasonCode::Success, ReasonCode::NoSubscriptionExisted],
        properties: Properties::default(),
    }));
}

// ============================================================================
// PING / DISCONNECT / AUTH
// ============================================================================

#[test]
fn ping_roundtrip() {
    roundtrip(Packet::PingReq);
    roundtrip(Packet::PingResp);

    assert_eq!(&encode_packet(&Packet::PingReq)[..], &[0xC0, 0x00]);
    assert_eq!(&encode_packet(&Packet::PingResp)[..], &[0xD0, 0x00]);
}

#[test]
fn ping_rejects_nonzero_flags() {
    assert_eq!(
        decode_packet(&[0xC1, 0x00]),
        Err(DecodeError::InvalidFlags)
    );
}

#[test]
fn disconnect_default_is_two_bytes() {
    let packet = Packet::Disconnect(Disconnect::default());
    let encoded = encode_packet(&packet);
    assert_eq!(&encoded[..], &[0xE0, 0x00]);
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn disconnect_with_reason_roundtrip() {
    roundtrip(Packet::Disconnect(Disconnect::with_reason(
        ReasonCode::SessionTakenOver,
    )));

    let mut props = Properties::default();
    props.session_expiry_interval = Some(0);
    props.reason_string = Some("going away".to_string());
    roundtrip(Packet::Disconnect(Disconnect {
        reason_code: ReasonCode::Success,
        properties: props,
    }));
}

#[test]
fn auth_roundtrip() {
    let mut props = Properties::default();
    props.authentication_method = Some("SCRAM-SHA-256".to_string());
    props.authentication_data = Some(Bytes::from_static(b"challenge"));
    roundtrip(Packet::Auth(Auth {
        reason_code: ReasonCode::ContinueAuthentication,
        properties: props,
    }));
}

// ============================================================================
// Framing
// ============================================================================

#[test]
fn decoder_is_restartable_across_partial_reads() {
    let encoded = encode_packet(&Packet::Publish(Publish {
        topic: "sensors/a/b".into(),
        payload: Bytes::from_static(b"reading"),
        ..Default::default()
    }));

    let decoder = Decoder::new();
    // Every strict prefix leaves the decoder waiting for more data
    for end in 0..encoded.len() {
        assert!(
            decoder.decode(&encoded[..end]).unwrap().is_none(),
            "prefix of {} bytes should be incomplete",
            end
        );
    }

    let (packet, consumed) = decoder.decode(&encoded).unwrap().unwrap();
    assert_eq!(consumed, encoded.len());
    assert!(matches!(packet, Packet::Publish(_)));
}

#[test]
fn decoder_consumes_exactly_one_packet() {
    let mut buf = encode_packet(&Packet::PingReq);
    buf.extend_from_slice(&encode_packet(&Packet::PingResp));

    let decoder = Decoder::new();
    let (first, consumed) = decoder.decode(&buf).unwrap().unwrap();
    assert_eq!(first, Packet::PingReq);
    assert_eq!(consumed, 2);

    let (second, _) = decoder.decode(&buf[consumed..]).unwrap().unwrap();
    assert_eq!(second, Packet::PingResp);
}

#[test]
fn oversize_declared_length_fails_before_body_arrives() {
    let decoder = Decoder::new().with_max_packet_size(16);
    // PUBLISH header declaring 65,535 bytes; no body present
    let header: &[u8] = &[0x30, 0xFF, 0xFF, 0x03];
    assert_eq!(decoder.decode(header), Err(DecodeError::PacketTooLarge));
}

#[test]
fn duplicate_singleton_property_is_rejected() {
    // DISCONNECT with session-expiry-interval twice
    let packet: &[u8] = &[
        0xE0, 0x0C, 0x00, 0x0A, 0x11, 0x00, 0x00, 0x00, 0x01, 0x11, 0x00, 0x00, 0x00, 0x02,
    ];
    assert_eq!(
        decode_packet(packet),
        Err(DecodeError::DuplicateProperty(0x11))
    );
}

#[test]
fn repeated_subscription_identifier_is_rejected_outside_publish() {
    // SUBSCRIBE carrying subscription identifier twice (42, then 43)
    let packet: &[u8] = &[
        0x82, 0x0B, 0x00, 0x01, 0x04, 0x0B, 0x2A, 0x0B, 0x2B, 0x00, 0x01, b'a', 0x01,
    ];
    assert_eq!(
        decode_packet(packet),
        Err(DecodeError::DuplicateProperty(0x0B))
    );

    // PUBLISH is the one place the identifier may repeat (one per matched
    // subscription on the outbound side)
    let packet: &[u8] = &[0x30, 0x08, 0x00, 0x01, b't', 0x04, 0x0B, 0x2A, 0x0B, 0x2B];
    match decode_packet(packet).unwrap() {
        Packet::Publish(publish) => {
            assert_eq!(publish.properties.subscription_identifiers, vec![42, 43]);
        }
        other => panic!("expected PUBLISH, got {:?}", other),
    }
}

#[test]
fn string_with_nul_is_rejected() {
    // PUBLISH whose topic contains U+0000
    let packet: &[u8] = &[0x30, 0x06, 0x00, 0x03, b'a', 0x00, b'b', 0x00];
    assert!(matches!(
        decode_packet(packet),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn unknown_property_id_is_rejected() {
    // DISCONNECT with property id 0x7D
    let packet: &[u8] = &[0xE0, 0x04, 0x00, 0x02, 0x7D, 0x00];
    assert_eq!(
        decode_packet(packet),
        Err(DecodeError::InvalidPropertyId(0x7D))
    );
}

#[test]
fn qos2_flow_packets_are_unsupported() {
    // PUBREC
    assert_eq!(
        decode_packet(&[0x50, 0x02, 0x00, 0x01]),
        Err(DecodeError::UnsupportedPacketType(5))
    );
    // PUBREL
    assert_eq!(
        decode_packet(&[0x62, 0x02, 0x00, 0x01]),
        Err(DecodeError::UnsupportedPacketType(6))
    );
    // PUBCOMP
    assert_eq!(
        decode_packet(&[0x70, 0x02, 0x00, 0x01]),
        Err(DecodeError::UnsupportedPacketType(7))
    );
}
