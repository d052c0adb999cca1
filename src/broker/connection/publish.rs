//! PUBLISH intake, routing and acknowledgement

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use super::{Connection, ConnectionError};
use crate::broker::writer::{OutboundWriter, SendError};
use crate::protocol::{Packet, ProtocolError, PubAck, Publish, QoS, ReasonCode};
use crate::session::{QueueResult, Session};
use crate::topic::{validate_topic_name, Subscription};

/// Aggregated delivery state for one subscriber while deduplicating matches
struct ClientDelivery {
    qos: QoS,
    retain_as_published: bool,
    subscription_ids: SmallVec<[u32; 4]>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Handle an inbound PUBLISH
    pub(crate) async fn handle_publish(
        &mut self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        writer: &Arc<OutboundWriter>,
        publish: Publish,
    ) -> Result<(), ConnectionError> {
        if validate_topic_name(&publish.topic).is_err() {
            return self
                .protocol_exception(client_id, session, writer, ProtocolError::TopicNameInvalid)
                .await;
        }

        // Topic aliases are not negotiated (no topic-alias-maximum in
        // CONNACK), so receiving one is a protocol error
        if publish.properties.topic_alias.is_some() {
            self.metrics.protocol_errors_total.inc();
            self.send_disconnect(ReasonCode::TopicAliasInvalid).await;
            self.transition_offline(client_id, session, writer);
            return Err(ConnectionError::Protocol(ProtocolError::ProtocolViolation(
                "topic alias not negotiated",
            )));
        }

        // QoS 2 is never granted (CONNACK maximum-qos = 1)
        if publish.qos == QoS::ExactlyOnce {
            return self
                .protocol_exception(client_id, session, writer, ProtocolError::QoSNotSupported)
                .await;
        }

        trace!(
            "PUBLISH from {} to {} (qos {:?})",
            client_id,
            publish.topic,
            publish.qos
        );
        self.metrics.publish_received_total.inc();

        // Route first: the PUBACK asserts the message has been enqueued for
        // every matching session
        self.route_publish(client_id, &publish);

        if publish.qos == QoS::AtLeastOnce {
            let packet_id = publish
                .packet_id
                .ok_or(ConnectionError::Decode(
                    crate::protocol::DecodeError::MalformedPacket("QoS 1 without packet id"),
                ))?;
            self.write_packet(&Packet::PubAck(PubAck::new(packet_id))).await?;
        }

        Ok(())
    }

    /// Fan a publish out to every matching subscriber.
    ///
    /// Non-shared matches are deduplicated per client (one delivery with the
    /// highest matched QoS and the union of subscription identifiers). Each
    /// shared group delivers to exactly one member, preferring currently
    /// connected ones, rotating per group.
    pub(crate) fn route_publish(&self, sender_id: &Arc<str>, publish: &Publish) {
        let matches = self.subscriptions.matches(&publish.topic);

        let mut deliveries: AHashMap<Arc<str>, ClientDelivery> =
            AHashMap::with_capacity(matches.direct.len());
        for sub in &matches.direct {
            if sub.no_local && sub.client_id == *sender_id {
                continue;
            }

            let entry = deliveries
                .entry(sub.client_id.clone())
                .or_insert_with(|| ClientDelivery {
                    qos: QoS::AtMostOnce,
                    retain_as_published: false,
                    subscription_ids: SmallVec::new(),
                });
            if sub.qos > entry.qos {
                entry.qos = sub.qos;
            }
            if sub.retain_as_published {
                entry.retain_as_published = true;
            }
            if let Some(id) = sub.subscription_id {
                if !entry.subscription_ids.contains(&id) {
                    entry.subscription_ids.push(id);
                }
            }
        }

        for (subscriber, delivery) in deliveries {
            self.deliver_to(
                &subscriber,
                publish,
                publish.qos.min(delivery.qos),
                delivery.retain_as_published && publish.retain,
                &delivery.subscription_ids,
            );
        }

        // Shared groups: one member each, connected members first
        for group in &matches.shared {
            let target = self.pick_share_target(group);
            if let Some(sub) = target {
                let ids: SmallVec<[u32; 4]> = sub.subscription_id.into_iter().collect();
                self.deliver_to(
                    &sub.client_id,
                    publish,
                    publish.qos.min(sub.qos),
                    sub.retain_as_published && publish.retain,
                    &ids,
                );
            }
        }
    }

    /// Round-robin choice within a share group, restricted to connected
    /// members when any exist
    fn pick_share_target<'a>(
        &self,
        group: &'a crate::topic::SharedMatch,
    ) -> Option<&'a Subscription> {
        if group.members.is_empty() {
            return None;
        }

        let connected: SmallVec<[&Subscription; 4]> = group
            .members
            .iter()
            .filter(|m| self.connections.contains_key(&m.client_id))
            .collect();

        if connected.is_empty() {
            // Nobody online: queue on a member chosen by the same rotation
            Some(&group.members[group.rotation % group.members.len()])
        } else {
            Some(connected[group.rotation % connected.len()])
        }
    }

    /// Deliver one publish to one subscriber, falling back to the session
    /// queue when the subscriber is offline or its window is full
    fn deliver_to(
        &self,
        subscriber: &Arc<str>,
        publish: &Publish,
        effective_qos: QoS,
        effective_retain: bool,
        subscription_ids: &[u32],
    ) {
        if let Some(writer) = self.connections.get(subscriber).map(|e| e.value().clone()) {
            match writer.send_publish(publish, effective_qos, effective_retain, subscription_ids) {
                Ok(()) => {
                    self.metrics.publish_delivered_total.inc();
                    return;
                }
                Err(SendError::InflightFull) => {
                    // Window full: preserve order through the session queue
                    self.queue_offline(subscriber, publish, effective_qos, effective_retain, subscription_ids);
                    return;
                }
                Err(_) => {
                    // Writer closed under us; fall through to the offline path
                }
            }
        }

        self.queue_offline(subscriber, publish, effective_qos, effective_retain, subscription_ids);
    }

    /// Queue a delivery on the subscriber's session, if one survives offline
    fn queue_offline(
        &self,
        subscriber: &Arc<str>,
        publish: &Publish,
        effective_qos: QoS,
        effective_retain: bool,
        subscription_ids: &[u32],
    ) {
        // Only QoS 1 deliveries are retained for offline sessions
        if effective_qos == QoS::AtMostOnce {
            self.metrics.publish_dropped_total.inc();
            return;
        }

        let Some(session) = self.sessions.get(subscriber) else {
            self.metrics.publish_dropped_total.inc();
            return;
        };

        let mut outgoing = publish.clone();
        outgoing.qos = effective_qos;
        outgoing.retain = effective_retain;
        outgoing.dup = false;
        outgoing.packet_id = None;
        for id in subscription_ids {
            outgoing.properties.subscription_identifiers.push(*id);
        }

        let result = session.write().queue_message(outgoing);
        self.metrics.publish_delivered_total.inc();
        if result == QueueResult::DroppedOldest {
            debug!("queue overflow for {}, oldest message dropped", subscriber);
            self.metrics.publish_dropped_total.inc();
        }
    }

    /// Handle PUBACK for a broker-to-client QoS 1 delivery
    pub(crate) async fn handle_puback(
        &mut self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        writer: &Arc<OutboundWriter>,
        puback: crate::protocol::PubAck,
    ) -> Result<(), ConnectionError> {
        let released = {
            let mut s = session.write();
            if s.inflight_outgoing.remove(&puback.packet_id).is_some() {
                s.increment_send_quota();
                true
            } else {
                false
            }
        };

        if released {
            trace!("PUBACK {} from {}", puback.packet_id, client_id);
            // Freed quota admits the next queued messages
            self.deliver_queued(session, writer);
        } else {
            debug!(
                "PUBACK for unknown packet id {} from {}",
                puback.packet_id, client_id
            );
        }

        Ok(())
    }
}
