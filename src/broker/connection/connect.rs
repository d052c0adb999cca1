//! CONNECT handshake: validation, session lookup/takeover, CONNACK

use std::sync::Arc;

use bytes::Buf;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, info};

use super::{assigned_client_id, Connection, ConnectionError, State};
use crate::broker::writer::OutboundWriter;
use crate::protocol::{
    ConnAck, Connect, DecodeError, Packet, Properties, ProtocolError, QoS, ReasonCode,
};
use crate::session::{Session, SessionLimits};

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read packets until the CONNECT handshake resolves
    pub(crate) async fn read_connect(&mut self) -> Result<(), ConnectionError> {
        loop {
            match self.decoder.decode(&self.read_buf) {
                Ok(Some((packet, consumed))) => {
                    self.read_buf.advance(consumed);
                    self.metrics.packets_received_total.inc();

                    return match packet {
                        Packet::Connect(connect) => self.handle_connect(*connect).await,
                        _ => {
                            // First packet must be CONNECT; close without a
                            // response
                            debug!("first packet from {} was not CONNECT", self.addr);
                            Err(ConnectionError::Protocol(ProtocolError::ProtocolViolation(
                                "first packet must be CONNECT",
                            )))
                        }
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    self.metrics.protocol_errors_total.inc();
                    // When the failed packet was a CONNECT attempt, answer
                    // with an error CONNACK before closing
                    let is_connect = self.read_buf.first().map(|b| b >> 4) == Some(1);
                    if is_connect {
                        let reason_code = match &e {
                            DecodeError::InvalidProtocolLevel(_) => {
                                ReasonCode::UnsupportedProtocolVersion
                            }
                            DecodeError::PacketTooLarge => ReasonCode::PacketTooLarge,
                            _ => ReasonCode::MalformedPacket,
                        };
                        let connack = ConnAck {
                            session_present: false,
                            reason_code,
                            properties: Properties::default(),
                        };
                        let _ = self.write_packet(&Packet::ConnAck(connack)).await;
                    }
                    return Err(e.into());
                }
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(ConnectionError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before CONNECT",
                )));
            }
            self.metrics.bytes_received_total.inc_by(n as u64);
        }
    }

    /// Process a validated CONNECT packet
    async fn handle_connect(&mut self, connect: Connect) -> Result<(), ConnectionError> {
        // An empty client id requires clean start; otherwise there is no
        // state to resume under a name the client does not know
        if connect.client_id.is_empty() && !connect.clean_start {
            debug!(
                "rejecting empty client id with clean_start=0 from {}",
                self.addr
            );
            let connack = ConnAck {
                session_present: false,
                reason_code: ReasonCode::ClientIdNotValid,
                properties: Properties::default(),
            };
            self.write_packet(&Packet::ConnAck(connack)).await?;
            return Err(ConnectionError::Protocol(ProtocolError::ProtocolViolation(
                "empty client id without clean start",
            )));
        }

        let assigned = connect.client_id.is_empty();
        let client_id: Arc<str> = if assigned {
            assigned_client_id().into()
        } else {
            connect.client_id.as_str().into()
        };

        debug!("CONNECT from {} (client_id: {})", self.addr, client_id);
        if connect.will_present {
            debug!(
                "CONNECT from {} carried a will message; wills are not supported, dropping",
                client_id
            );
        }

        // Connection cap counts distinct live connections; a takeover
        // replaces rather than adds
        let is_takeover = self.connections.contains_key(&client_id);
        if !is_takeover && self.connections.len() >= self.config.max_connections {
            debug!("connection limit reached, rejecting {}", client_id);
            let connack = ConnAck {
                session_present: false,
                reason_code: ReasonCode::ServerUnavailable,
                properties: Properties::default(),
            };
            self.write_packet(&Packet::ConnAck(connack)).await?;
            return Err(ConnectionError::Protocol(ProtocolError::ProtocolViolation(
                "connection limit reached",
            )));
        }

        // Keep-alive negotiation: the client's value holds unless it exceeds
        // the operator cap, in which case the cap is imposed and echoed via
        // server-keep-alive. Zero disables the timer.
        let requested_keep_alive = connect.keep_alive;
        let keep_alive = if requested_keep_alive == 0 {
            0
        } else {
            requested_keep_alive.min(self.config.max_keep_alive)
        };

        // Session expiry: CONNECT property, default 0, clamped to the
        // operator cap
        let requested_expiry = connect.properties.session_expiry_interval.unwrap_or(0);
        let session_expiry = requested_expiry.min(self.config.session_expiry_cap);

        let limits = SessionLimits {
            max_queued: self.config.max_queued_messages,
            max_inflight: self.config.max_inflight,
            max_subscriptions: self.config.max_subscriptions,
        };
        let (session, resumed) =
            self.sessions
                .get_or_create(&client_id, connect.clean_start, limits, self.conn_id);

        // A clean start discards subscriptions the previous session left in
        // the index
        if connect.clean_start {
            self.subscriptions.unsubscribe_all(&client_id);
        }

        {
            let mut s = session.write();
            s.clean_start = connect.clean_start;
            s.keep_alive = keep_alive;
            s.session_expiry_interval = session_expiry;
            if let Some(max) = connect.properties.receive_maximum {
                s.receive_maximum = max;
            }
            // Resumed sessions may still hold in-flight messages that count
            // against the window
            s.send_quota = s
                .receive_maximum
                .saturating_sub(s.inflight_outgoing.len() as u16);
            if let Some(max) = connect.properties.maximum_packet_size {
                s.max_packet_size = max;
            }
        }

        let writer = Arc::new(OutboundWriter::new(
            session.clone(),
            self.config.max_write_buffer,
        ));

        // Atomic swap on the live-connection table: a previous registration
        // with the same id is the displaced connection
        if let Some(previous) = self.connections.insert(client_id.clone(), writer.clone()) {
            info!("session takeover for {}", client_id);
            self.metrics.takeovers_total.inc();
            previous.disconnect(ReasonCode::SessionTakenOver);
        }

        let mut connack = ConnAck {
            session_present: resumed && !connect.clean_start,
            reason_code: ReasonCode::Success,
            properties: Properties::default(),
        };
        connack.properties.receive_maximum = Some(self.config.receive_maximum);
        connack.properties.maximum_qos = Some(QoS::AtLeastOnce as u8);
        connack.properties.retain_available = Some(0);
        connack.properties.maximum_packet_size = Some(self.config.max_packet_size as u32);
        connack.properties.wildcard_subscription_available = Some(1);
        connack.properties.subscription_identifier_available = Some(1);
        connack.properties.shared_subscription_available = Some(1);
        if keep_alive != requested_keep_alive {
            connack.properties.server_keep_alive = Some(keep_alive);
        }
        if session_expiry != requested_expiry {
            connack.properties.session_expiry_interval = Some(session_expiry);
        }
        if assigned {
            connack.properties.assigned_client_identifier = Some(client_id.to_string());
        }

        self.write_packet(&Packet::ConnAck(connack)).await?;

        self.state = State::Established {
            client_id: client_id.clone(),
            session: session.clone(),
            writer: writer.clone(),
        };
        self.metrics.connections_total.inc();
        self.metrics.connections_current.inc();
        self.metrics.sessions_current.set(self.sessions.len() as i64);
        info!(
            "client {} connected from {} (session_present: {})",
            client_id,
            self.addr,
            resumed && !connect.clean_start
        );

        // Redeliver session state before reading anything further from the
        // client: in-flight messages first (original ids, DUP set), then the
        // queued backlog
        if resumed {
            self.resend_inflight(&session, &writer);
        }
        self.deliver_queued(&session, &writer);
        self.flush_writer(&writer).await?;

        Ok(())
    }

    /// Resend unacknowledged in-flight messages after session resumption
    pub(crate) fn resend_inflight(
        &self,
        session: &Arc<RwLock<Session>>,
        writer: &Arc<OutboundWriter>,
    ) {
        let mut inflight: Vec<_> = {
            let s = session.read();
            s.inflight_outgoing.values().cloned().collect()
        };
        // Stable order for retransmission
        inflight.sort_by_key(|m| m.packet_id);

        for message in &inflight {
            if writer.resend_publish(message).is_err() {
                break;
            }
            self.metrics.publish_delivered_total.inc();
        }
    }

    /// Drain queued messages into the in-flight window
    pub(crate) fn deliver_queued(
        &self,
        session: &Arc<RwLock<Session>>,
        writer: &Arc<OutboundWriter>,
    ) {
        loop {
            let mut batch = {
                let mut s = session.write();
                if !s.can_send_inflight() {
                    return;
                }
                // Bounded batch per iteration; the quota check above bounds
                // the total
                s.read_available_messages(16)
            };
            if batch.is_empty() {
                return;
            }

            while !batch.is_empty() {
                let publish = batch.remove(0);
                let qos = publish.qos;
                match writer.send_publish(&publish, qos, publish.retain, &[]) {
                    Ok(()) => self.metrics.publish_delivered_total.inc(),
                    Err(crate::broker::writer::SendError::InflightFull) => {
                        // Window filled mid-batch; put the remainder back in
                        // order, failed message first
                        let mut s = session.write();
                        while let Some(rest) = batch.pop() {
                            s.requeue_front(rest);
                        }
                        s.requeue_front(publish);
                        return;
                    }
                    Err(_) => return,
                }
            }
        }
    }
}
