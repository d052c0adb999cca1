//! Client-initiated DISCONNECT and the offline transition

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use super::{Connection, ConnectionError};
use crate::broker::writer::OutboundWriter;
use crate::protocol::Disconnect;
use crate::session::Session;

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Handle a DISCONNECT packet from the client.
    ///
    /// The server never replies to DISCONNECT; the connection is released
    /// and the session transitions offline (or is destroyed when its expiry
    /// interval is zero).
    pub(crate) async fn handle_client_disconnect(
        &mut self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        writer: &Arc<OutboundWriter>,
        disconnect: Disconnect,
    ) -> Result<(), ConnectionError> {
        debug!(
            "DISCONNECT from {} (reason: {})",
            client_id, disconnect.reason_code
        );

        // A DISCONNECT may lower or extend the expiry window, except that a
        // session which connected with expiry 0 cannot be resurrected; that
        // is a protocol error and the override is ignored
        if let Some(requested) = disconnect.properties.session_expiry_interval {
            let mut s = session.write();
            if s.session_expiry_interval == 0 && requested > 0 {
                warn!(
                    "{} sent expiry override {} after connecting with expiry 0; ignoring",
                    client_id, requested
                );
                self.metrics.protocol_errors_total.inc();
            } else {
                s.session_expiry_interval = requested.min(self.config.session_expiry_cap);
            }
        }

        self.transition_offline(client_id, session, writer);
        Err(ConnectionError::Closed)
    }
}
