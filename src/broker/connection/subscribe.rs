//! SUBSCRIBE and UNSUBSCRIBE handling

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::{Connection, ConnectionError};
use crate::protocol::{
    Packet, Properties, QoS, ReasonCode, SubAck, Subscribe, UnsubAck, Unsubscribe,
};
use crate::session::Session;
use crate::topic::{validate_topic_filter, Subscription};

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Handle SUBSCRIBE: one reason code per filter, in request order
    pub(crate) async fn handle_subscribe(
        &mut self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        subscribe: Subscribe,
    ) -> Result<(), ConnectionError> {
        let mut reason_codes = Vec::with_capacity(subscribe.subscriptions.len());
        let sub_id = subscribe.properties.subscription_identifiers.first().copied();

        for request in &subscribe.subscriptions {
            if validate_topic_filter(&request.filter).is_err() {
                reason_codes.push(ReasonCode::TopicFilterInvalid);
                continue;
            }

            // Granted QoS is capped at 1; duplicates overwrite
            let granted_qos = request.options.qos.min(QoS::AtLeastOnce);

            let stored = session.write().add_subscription(
                request.filter.clone(),
                request.options,
                sub_id,
            );
            if !stored {
                debug!("subscription quota exhausted for {}", client_id);
                reason_codes.push(ReasonCode::QuotaExceeded);
                continue;
            }

            self.subscriptions.subscribe(
                &request.filter,
                Subscription {
                    client_id: client_id.clone(),
                    qos: granted_qos,
                    no_local: request.options.no_local,
                    retain_as_published: request.options.retain_as_published,
                    subscription_id: sub_id,
                    // Filled in by the store when the filter carries $share
                    share_group: None,
                },
            );

            reason_codes.push(match granted_qos {
                QoS::AtMostOnce => ReasonCode::Success,
                _ => ReasonCode::GrantedQoS1,
            });

            debug!(
                "SUBSCRIBE {} to {} (granted {:?})",
                client_id, request.filter, granted_qos
            );
        }

        let suback = SubAck {
            packet_id: subscribe.packet_id,
            reason_codes,
            properties: Properties::default(),
        };
        self.write_packet(&Packet::SubAck(suback)).await
    }

    /// Handle UNSUBSCRIBE: 0x00 per removed filter, 0x11 otherwise
    pub(crate) async fn handle_unsubscribe(
        &mut self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        unsubscribe: Unsubscribe,
    ) -> Result<(), ConnectionError> {
        let mut reason_codes = Vec::with_capacity(unsubscribe.filters.len());

        for filter in &unsubscribe.filters {
            let removed = self.subscriptions.unsubscribe(filter, client_id);
            session.write().remove_subscription(filter);

            reason_codes.push(if removed {
                ReasonCode::Success
            } else {
                ReasonCode::NoSubscriptionExisted
            });

            debug!("UNSUBSCRIBE {} from {}", client_id, filter);
        }

        let unsuback = UnsubAck {
            packet_id: unsubscribe.packet_id,
            reason_codes,
            properties: Properties::default(),
        };
        self.write_packet(&Packet::UnsubAck(unsuback)).await
    }
}
