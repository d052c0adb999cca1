//! Per-connection protocol driver
//!
//! One instance per accepted socket, driven by a single task: the task is
//! the serial event processor for its connection, draining socket reads, the
//! outbound writer and the keep-alive timer through one select loop. The
//! state machine has three stages: waiting for CONNECT, established, and
//! closed (the task has returned).

mod connect;
mod disconnect;
mod publish;
mod subscribe;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::writer::OutboundWriter;
use super::BrokerConfig;
use crate::codec::{Decoder, Encoder};
use crate::metrics::Metrics;
use crate::protocol::{
    DecodeError, Disconnect, Packet, ProtocolError, ReasonCode,
};
use crate::session::{Session, SessionStore};
use crate::topic::SubscriptionStore;

/// Connection error types
#[derive(Debug)]
pub enum ConnectionError {
    Io(std::io::Error),
    Protocol(ProtocolError),
    Decode(DecodeError),
    /// CONNECT did not arrive in time, or keep-alive expired
    Timeout,
    /// Orderly shutdown (client DISCONNECT, takeover, broker stop)
    Closed,
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "I/O error: {}", e),
            ConnectionError::Protocol(e) => write!(f, "protocol error: {}", e),
            ConnectionError::Decode(e) => write!(f, "decode error: {}", e),
            ConnectionError::Timeout => write!(f, "timeout"),
            ConnectionError::Closed => write!(f, "closed"),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

impl From<DecodeError> for ConnectionError {
    fn from(e: DecodeError) -> Self {
        ConnectionError::Decode(e)
    }
}

impl From<ProtocolError> for ConnectionError {
    fn from(e: ProtocolError) -> Self {
        ConnectionError::Protocol(e)
    }
}

/// Tokens identifying connections within the process, used to guard session
/// re-binding during takeover
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Connection state
pub(crate) enum State {
    /// Waiting for the CONNECT handshake
    Connecting,
    /// Handshake complete, packets flowing
    Established {
        client_id: Arc<str>,
        session: Arc<RwLock<Session>>,
        writer: Arc<OutboundWriter>,
    },
}

/// Connection driver, generic over the byte stream (TCP or TLS)
pub struct Connection<S> {
    pub(crate) stream: S,
    pub(crate) addr: SocketAddr,
    pub(crate) conn_id: u64,
    pub(crate) state: State,
    pub(crate) decoder: Decoder,
    pub(crate) encoder: Encoder,
    pub(crate) read_buf: BytesMut,
    pub(crate) write_buf: BytesMut,
    pub(crate) sessions: Arc<SessionStore>,
    pub(crate) subscriptions: Arc<SubscriptionStore>,
    /// Live-connection table: client id -> outbound writer
    pub(crate) connections: Arc<DashMap<Arc<str>, Arc<OutboundWriter>>>,
    pub(crate) config: BrokerConfig,
    pub(crate) metrics: Arc<Metrics>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        sessions: Arc<SessionStore>,
        subscriptions: Arc<SubscriptionStore>,
        connections: Arc<DashMap<Arc<str>, Arc<OutboundWriter>>>,
        config: BrokerConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let decoder = Decoder::new().with_max_packet_size(config.max_packet_size);
        Self {
            stream,
            addr,
            conn_id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            state: State::Connecting,
            decoder,
            encoder: Encoder::new(),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(1024),
            sessions,
            subscriptions,
            connections,
            config,
            metrics,
        }
    }

    /// Drive the connection to completion
    pub async fn run(&mut self) -> Result<(), ConnectionError> {
        match timeout(self.config.connect_timeout, self.read_connect()).await {
            Ok(result) => result?,
            Err(_) => {
                debug!("connect timeout from {}", self.addr);
                return Err(ConnectionError::Timeout);
            }
        }

        let result = self.run_established().await;
        self.metrics.connections_current.dec();
        result
    }

    /// Main loop after a successful CONNECT handshake
    async fn run_established(&mut self) -> Result<(), ConnectionError> {
        let (client_id, session, writer) = match &self.state {
            State::Established {
                client_id,
                session,
                writer,
            } => (client_id.clone(), session.clone(), writer.clone()),
            State::Connecting => {
                return Err(ConnectionError::Protocol(ProtocolError::ProtocolViolation(
                    "not connected",
                )))
            }
        };

        let keep_alive_secs = session.read().keep_alive;
        // 1.5 x keep-alive; zero disables the timer entirely
        let keep_alive = if keep_alive_secs > 0 {
            std::time::Duration::from_millis(keep_alive_secs as u64 * 1500)
        } else {
            std::time::Duration::from_secs(86400 * 365)
        };
        let mut keep_alive_deadline = tokio::time::Instant::now() + keep_alive;

        loop {
            tokio::select! {
                biased;

                // Flush routed packets queued by other connections' tasks
                _ = writer.notified() => {
                    self.flush_writer(&writer).await?;
                    // A drained socket admits more of the queued backlog
                    self.deliver_queued(&session, &writer);
                    self.flush_writer(&writer).await?;
                    if !writer.is_alive() {
                        let reason = writer.close_reason();
                        match reason {
                            Some(ReasonCode::SessionTakenOver) => {
                                info!("{} displaced by takeover", client_id);
                            }
                            Some(ReasonCode::ReceiveMaxExceeded) => {
                                warn!("{} shed: write buffer cap exceeded", client_id);
                                self.metrics.connections_shed_total.inc();
                            }
                            _ => debug!("{} writer closed", client_id),
                        }
                        self.transition_offline(&client_id, &session, &writer);
                        return Err(ConnectionError::Closed);
                    }
                }

                result = self.stream.read_buf(&mut self.read_buf) => {
                    match result {
                        Ok(0) => {
                            debug!("connection closed by {}", self.addr);
                            self.transition_offline(&client_id, &session, &writer);
                            return Ok(());
                        }
                        Ok(n) => {
                            self.metrics.bytes_received_total.inc_by(n as u64);
                            // Any inbound bytes re-arm the keep-alive timer
                            keep_alive_deadline = tokio::time::Instant::now() + keep_alive;
                            self.process_read_buf(&client_id, &session, &writer).await?;
                        }
                        Err(e) => {
                            debug!("read error from {}: {}", self.addr, e);
                            self.transition_offline(&client_id, &session, &writer);
                            return Err(e.into());
                        }
                    }
                }

                _ = tokio::time::sleep_until(keep_alive_deadline) => {
                    info!("keep-alive timeout for {}", client_id);
                    self.metrics.keepalive_timeouts_total.inc();
                    self.send_disconnect(ReasonCode::KeepAliveTimeout).await;
                    self.transition_offline(&client_id, &session, &writer);
                    return Err(ConnectionError::Timeout);
                }
            }
        }
    }

    /// Decode and dispatch every complete packet in the read buffer
    async fn process_read_buf(
        &mut self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        writer: &Arc<OutboundWriter>,
    ) -> Result<(), ConnectionError> {
        loop {
            match self.decoder.decode(&self.read_buf) {
                Ok(Some((packet, consumed))) => {
                    self.read_buf.advance(consumed);
                    self.metrics.packets_received_total.inc();
                    self.handle_packet(client_id, session, writer, packet).await?;
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    self.metrics.protocol_errors_total.inc();
                    debug!("decode error from {}: {}", client_id, e);
                    self.send_disconnect(decode_reason(&e)).await;
                    self.transition_offline(client_id, session, writer);
                    return Err(e.into());
                }
            }
        }
    }

    /// Dispatch one packet in the established state
    async fn handle_packet(
        &mut self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        writer: &Arc<OutboundWriter>,
        packet: Packet,
    ) -> Result<(), ConnectionError> {
        match packet {
            Packet::Connect(_) => {
                // A second CONNECT on a live connection is a protocol error
                self.protocol_exception(
                    client_id,
                    session,
                    writer,
                    ProtocolError::ProtocolViolation("duplicate CONNECT"),
                )
                .await
            }
            Packet::Publish(publish) => {
                self.handle_publish(client_id, session, writer, publish).await
            }
            Packet::PubAck(puback) => self.handle_puback(client_id, session, writer, puback).await,
            Packet::Subscribe(subscribe) => {
                self.handle_subscribe(client_id, session, subscribe).await
            }
            Packet::Unsubscribe(unsubscribe) => {
                self.handle_unsubscribe(client_id, session, unsubscribe).await
            }
            Packet::PingReq => self.write_packet(&Packet::PingResp).await,
            Packet::Disconnect(disconnect) => {
                self.handle_client_disconnect(client_id, session, writer, disconnect)
                    .await
            }
            Packet::Auth(_) => {
                // No authentication method was negotiated at CONNECT
                self.protocol_exception(
                    client_id,
                    session,
                    writer,
                    ProtocolError::ProtocolViolation("unexpected AUTH"),
                )
                .await
            }
            Packet::ConnAck(_) | Packet::SubAck(_) | Packet::UnsubAck(_) | Packet::PingResp => {
                // Server-to-client packets arriving from a client
                self.protocol_exception(
                    client_id,
                    session,
                    writer,
                    ProtocolError::ProtocolViolation("server-bound packet from client"),
                )
                .await
            }
        }
    }

    /// Report a protocol error: one DISCONNECT with the most specific reason
    /// code, then close
    pub(crate) async fn protocol_exception(
        &mut self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        writer: &Arc<OutboundWriter>,
        error: ProtocolError,
    ) -> Result<(), ConnectionError> {
        warn!("protocol error from {}: {}", client_id, error);
        self.metrics.protocol_errors_total.inc();
        self.send_disconnect(error.reason_code()).await;
        self.transition_offline(client_id, session, writer);
        Err(ConnectionError::Protocol(error))
    }

    /// Encode and write a packet directly to the socket.
    ///
    /// Only the connection task writes to the socket, so direct replies and
    /// writer flushes never interleave mid-packet.
    pub(crate) async fn write_packet(&mut self, packet: &Packet) -> Result<(), ConnectionError> {
        self.write_buf.clear();
        self.encoder
            .encode(packet, &mut self.write_buf)
            .map_err(|e| ConnectionError::Protocol(e.into()))?;
        let n = self.write_buf.len();
        self.stream.write_all(&self.write_buf).await?;
        self.metrics.packets_sent_total.inc();
        self.metrics.bytes_sent_total.inc_by(n as u64);
        Ok(())
    }

    /// Best-effort DISCONNECT before closing; failures are ignored because
    /// the socket may already be gone
    pub(crate) async fn send_disconnect(&mut self, reason: ReasonCode) {
        let packet = Packet::Disconnect(Disconnect::with_reason(reason));
        let _ = self.write_packet(&packet).await;
        let _ = self.stream.flush().await;
    }

    /// Drain the outbound writer to the socket
    pub(crate) async fn flush_writer(
        &mut self,
        writer: &Arc<OutboundWriter>,
    ) -> Result<(), ConnectionError> {
        let data = writer.take_buffer();
        if !data.is_empty() {
            self.stream.write_all(&data).await?;
            self.metrics.bytes_sent_total.inc_by(data.len() as u64);
        }
        Ok(())
    }

    /// Release the connection's claim on its session and registry entry.
    ///
    /// Idempotent and takeover-safe: the registry entry is removed only when
    /// it still points at this connection's writer, and the session is only
    /// pushed offline when this connection still owns it.
    pub(crate) fn transition_offline(
        &mut self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        writer: &Arc<OutboundWriter>,
    ) {
        self.connections
            .remove_if(client_id, |_, current| Arc::ptr_eq(current, writer));
        writer.close();

        use crate::session::DisconnectOutcome;
        match self.sessions.disconnect(client_id, session, self.conn_id) {
            DisconnectOutcome::Destroyed => {
                self.subscriptions.unsubscribe_all(client_id);
                debug!("session {} destroyed on disconnect", client_id);
            }
            DisconnectOutcome::Offline => {
                debug!("session {} offline, awaiting expiry", client_id);
            }
            DisconnectOutcome::NotOwner => {}
        }
        self.metrics.sessions_current.set(self.sessions.len() as i64);
    }
}

/// Map a decode failure to the DISCONNECT reason sent before closing
fn decode_reason(error: &DecodeError) -> ReasonCode {
    match error {
        DecodeError::PacketTooLarge => ReasonCode::PacketTooLarge,
        DecodeError::UnsupportedPacketType(_) | DecodeError::PropertyNotAllowed(_) => {
            ReasonCode::ProtocolError
        }
        _ => ReasonCode::MalformedPacket,
    }
}

/// Generate a server-assigned client identifier (20 characters, within the
/// 1..23 limit for assigned identifiers)
pub(crate) fn assigned_client_id() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    format!("embermq-{:012x}", hasher.finish() & 0xFFFF_FFFF_FFFF)
}
