//! Per-connection outbound writer
//!
//! Routing happens on the publisher's task, but only the owning connection
//! task touches its socket. The writer bridges the two: other tasks encode
//! packets into a shared buffer and the connection task flushes it when
//! notified. This also carries the backpressure policy: the buffer grows
//! while the peer is slow, and crossing the operator cap marks the
//! connection for closure with reason 0x93.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::codec::Encoder;
use crate::protocol::{Disconnect, Packet, Publish, QoS, ReasonCode};
use crate::session::{InflightMessage, Session};

/// Error when handing a packet to a writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// Connection is closed or closing
    Closed,
    /// Send quota or in-flight limit reached; the message belongs in the
    /// session queue instead
    InflightFull,
    /// Encoding failed
    EncodingError,
}

/// Shared outbound buffer for one connection
pub struct OutboundWriter {
    /// Encoded bytes waiting for the connection task to flush
    buffer: Mutex<BytesMut>,
    /// Session for packet-id assignment and in-flight tracking
    session: Arc<RwLock<Session>>,
    /// Wakes the connection task when the buffer has data or the writer dies
    notify: Notify,
    encoder: Encoder,
    alive: AtomicBool,
    /// Why the writer was closed, when closed by the broker side
    close_reason: Mutex<Option<ReasonCode>>,
    /// Operator cap on buffered bytes; crossing it sheds the connection
    max_buffered: usize,
}

impl OutboundWriter {
    pub fn new(session: Arc<RwLock<Session>>, max_buffered: usize) -> Self {
        Self {
            buffer: Mutex::new(BytesMut::with_capacity(2048)),
            session,
            notify: Notify::new(),
            encoder: Encoder::new(),
            alive: AtomicBool::new(true),
            close_reason: Mutex::new(None),
            max_buffered,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Reason the broker closed this writer, if it did
    pub fn close_reason(&self) -> Option<ReasonCode> {
        *self.close_reason.lock()
    }

    /// Close without queueing a DISCONNECT (socket already gone)
    pub fn close(&self) {
        self.alive.store(false, Ordering::Release);
        self.notify.notify_one();
    }

    /// Queue a DISCONNECT with the given reason and close.
    ///
    /// Used for takeover (0x8E) and load shedding (0x93): the connection
    /// task flushes the buffered DISCONNECT, then closes the socket.
    pub fn disconnect(&self, reason: ReasonCode) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        *self.close_reason.lock() = Some(reason);
        {
            let mut buffer = self.buffer.lock();
            let _ = self
                .encoder
                .encode(&Packet::Disconnect(Disconnect::with_reason(reason)), &mut buffer);
        }
        self.notify.notify_one();
    }

    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    /// Take everything buffered so far
    pub fn take_buffer(&self) -> BytesMut {
        self.buffer.lock().split()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// The session this writer delivers to
    pub fn session(&self) -> &Arc<RwLock<Session>> {
        &self.session
    }

    /// Queue a PUBLISH for this connection.
    ///
    /// Applies the effective QoS and retain flag, assigns a fresh packet
    /// identifier for QoS 1 and records the message as in-flight. Returns
    /// `InflightFull` when the send quota or in-flight window is exhausted;
    /// the caller then queues on the session instead.
    pub fn send_publish(
        &self,
        publish: &Publish,
        effective_qos: QoS,
        effective_retain: bool,
        subscription_ids: &[u32],
    ) -> Result<(), SendError> {
        if !self.is_alive() {
            return Err(SendError::Closed);
        }

        let mut outgoing = publish.clone();
        outgoing.qos = effective_qos;
        outgoing.retain = effective_retain;
        outgoing.dup = false;
        outgoing.packet_id = None;
        for id in subscription_ids {
            outgoing.properties.subscription_identifiers.push(*id);
        }

        let max_packet_size = {
            let session = self.session.read();
            session.max_packet_size
        };

        if effective_qos != QoS::AtMostOnce {
            let mut session = self.session.write();
            if !session.can_send_inflight() {
                return Err(SendError::InflightFull);
            }
            session.decrement_send_quota();
            let pid = session.next_packet_id();
            outgoing.packet_id = Some(pid);
            session.inflight_outgoing.insert(
                pid,
                InflightMessage {
                    packet_id: pid,
                    publish: outgoing.clone(),
                    sent_at: Instant::now(),
                },
            );
        }

        self.append(&Packet::Publish(outgoing), max_packet_size)
    }

    /// Resend an in-flight PUBLISH with its original identifier and DUP set
    pub fn resend_publish(&self, inflight: &InflightMessage) -> Result<(), SendError> {
        if !self.is_alive() {
            return Err(SendError::Closed);
        }

        let mut outgoing = inflight.publish.clone();
        outgoing.dup = true;
        outgoing.packet_id = Some(inflight.packet_id);

        let max_packet_size = self.session.read().max_packet_size;
        self.append(&Packet::Publish(outgoing), max_packet_size)
    }

    /// Queue a non-PUBLISH packet
    pub fn send_packet(&self, packet: &Packet) -> Result<(), SendError> {
        if !self.is_alive() {
            return Err(SendError::Closed);
        }
        let max_packet_size = self.session.read().max_packet_size;
        self.append(packet, max_packet_size)
    }

    /// Encode into the shared buffer, enforcing the client's maximum packet
    /// size and the operator buffer cap
    fn append(&self, packet: &Packet, max_packet_size: u32) -> Result<(), SendError> {
        let was_empty = {
            let mut buffer = self.buffer.lock();
            let start_len = buffer.len();

            if self.encoder.encode(packet, &mut buffer).is_err() {
                buffer.truncate(start_len);
                self.undo_inflight(packet);
                return Err(SendError::EncodingError);
            }

            let packet_len = buffer.len() - start_len;
            if packet_len > max_packet_size as usize {
                // Never send packets above the client's declared maximum
                buffer.truncate(start_len);
                self.undo_inflight(packet);
                return Ok(());
            }

            if buffer.len() > self.max_buffered {
                buffer.truncate(start_len);
                drop(buffer);
                // The peer is not draining; shed the connection
                self.disconnect(ReasonCode::ReceiveMaxExceeded);
                return Err(SendError::Closed);
            }

            start_len == 0
        };

        // Notify only on the empty->nonempty edge; coalesces bursts
        if was_empty {
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Roll back in-flight tracking for a publish that was not buffered
    fn undo_inflight(&self, packet: &Packet) {
        if let Packet::Publish(p) = packet {
            if let Some(pid) = p.packet_id {
                let mut session = self.session.write();
                if session.inflight_outgoing.remove(&pid).is_some() {
                    session.increment_send_quota();
                }
            }
        }
    }
}

impl std::fmt::Debug for OutboundWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundWriter")
            .field("buffer_len", &self.buffer_len())
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionLimits;

    fn writer(max_buffered: usize) -> OutboundWriter {
        let session = Arc::new(RwLock::new(Session::new("c".into(), SessionLimits::default())));
        OutboundWriter::new(session, max_buffered)
    }

    fn publish(payload: &[u8]) -> Publish {
        Publish {
            payload: bytes::Bytes::copy_from_slice(payload),
            topic: Arc::from("t"),
            ..Default::default()
        }
    }

    #[test]
    fn qos1_send_assigns_packet_id_and_tracks_inflight() {
        let w = writer(1024);
        w.send_publish(&publish(b"x"), QoS::AtLeastOnce, false, &[])
            .unwrap();

        let session = w.session().read();
        assert_eq!(session.inflight_outgoing.len(), 1);
        assert!(session.inflight_outgoing.contains_key(&1));
        assert_eq!(session.send_quota, 65534);
    }

    #[test]
    fn inflight_window_rejects_when_full() {
        let w = writer(1 << 20);
        {
            let mut session = w.session().write();
            session.limits.max_inflight = 1;
        }
        w.send_publish(&publish(b"a"), QoS::AtLeastOnce, false, &[])
            .unwrap();
        assert_eq!(
            w.send_publish(&publish(b"b"), QoS::AtLeastOnce, false, &[]),
            Err(SendError::InflightFull)
        );
    }

    #[test]
    fn buffer_cap_sheds_connection() {
        let w = writer(64);
        // Fill past the cap with QoS 0 messages
        let mut shed = false;
        for _ in 0..16 {
            if w.send_publish(&publish(&[0u8; 32]), QoS::AtMostOnce, false, &[])
                == Err(SendError::Closed)
            {
                shed = true;
                break;
            }
        }
        assert!(shed);
        assert!(!w.is_alive());
        assert_eq!(w.close_reason(), Some(ReasonCode::ReceiveMaxExceeded));
        // The buffered bytes end with the shedding DISCONNECT (0x93)
        let data = w.take_buffer();
        assert_eq!(&data[data.len() - 3..], &[0xE0, 0x01, 0x93]);
    }

    #[test]
    fn takeover_disconnect_is_buffered() {
        let w = writer(1024);
        w.disconnect(ReasonCode::SessionTakenOver);
        assert!(!w.is_alive());
        let data = w.take_buffer();
        // DISCONNECT, remaining length 1, reason 0x8E
        assert_eq!(&data[..], &[0xE0, 0x01, 0x8E]);
        // Further sends are rejected
        assert_eq!(
            w.send_packet(&Packet::PingResp),
            Err(SendError::Closed)
        );
    }
}
