//! Session state and session store
//!
//! A session is keyed by client identifier and may outlive its connection:
//! with a session-expiry-interval > 0 the subscription set and the queue of
//! undelivered QoS 1 publishes survive until the interval elapses or a
//! clean-start CONNECT discards them. The store coordinates lookup,
//! reactivation and expiry; connection takeover is handled by the writer
//! registry in the broker layer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::protocol::{Publish, QoS, SubscriptionOptions};

/// Session never expires after disconnect
pub const EXPIRY_NEVER: u32 = 0xFFFF_FFFF;

/// Per-session operator limits, taken from broker configuration at CONNECT
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Maximum undelivered QoS 1 messages held for the session
    pub max_queued: usize,
    /// Maximum broker-to-client in-flight QoS 1 messages
    pub max_inflight: u16,
    /// Maximum subscriptions per session
    pub max_subscriptions: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_queued: 1024,
            max_inflight: 32,
            max_subscriptions: 1024,
        }
    }
}

/// Outcome of queueing a message on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueResult {
    Queued,
    /// The queue was full; the oldest message was dropped to make room
    DroppedOldest,
}

/// Connectivity state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Disconnected,
}

/// A subscription as remembered by the session (keyed by raw filter string,
/// so `$share/g/f` and `f` are distinct entries)
#[derive(Debug, Clone)]
pub struct SessionSubscription {
    pub filter: String,
    pub options: SubscriptionOptions,
    pub subscription_id: Option<u32>,
}

/// A QoS 1 publish awaiting PUBACK from the client
#[derive(Debug, Clone)]
pub struct InflightMessage {
    pub packet_id: u16,
    pub publish: Publish,
    pub sent_at: Instant,
}

/// Per-client-identifier session state
pub struct Session {
    /// Client identifier
    pub client_id: Arc<str>,
    /// Connectivity state
    pub state: SessionState,
    /// Clean start flag from the most recent CONNECT
    pub clean_start: bool,
    /// Seconds the session survives after disconnect (0 = destroyed
    /// immediately, 0xFFFFFFFF = never expires)
    pub session_expiry_interval: u32,
    /// Negotiated keep alive in seconds (0 = disabled)
    pub keep_alive: u16,
    /// Subscription set keyed by raw filter string
    pub subscriptions: AHashMap<Arc<str>, SessionSubscription>,
    /// Broker-to-client QoS 1 messages awaiting PUBACK
    pub inflight_outgoing: AHashMap<u16, InflightMessage>,
    /// Undelivered QoS 1 publishes, oldest first
    pending: VecDeque<Publish>,
    /// Operator limits
    pub limits: SessionLimits,
    /// Client's receive-maximum from CONNECT properties
    pub receive_maximum: u16,
    /// Remaining send quota against receive-maximum
    pub send_quota: u16,
    /// Client's maximum-packet-size from CONNECT properties
    pub max_packet_size: u32,
    /// When the session went offline (None while connected)
    pub disconnected_at: Option<Instant>,
    /// Token of the connection currently bound to this session (0 = none).
    /// An indirection rather than a pointer: the session outlives its
    /// connection, and a displaced connection must not mutate a session that
    /// a newer connection has already re-bound.
    pub owner: u64,
    next_packet_id: u16,
}

impl Session {
    pub fn new(client_id: Arc<str>, limits: SessionLimits) -> Self {
        Self {
            client_id,
            state: SessionState::Connected,
            clean_start: true,
            session_expiry_interval: 0,
            keep_alive: 0,
            subscriptions: AHashMap::with_capacity(8),
            inflight_outgoing: AHashMap::with_capacity(16),
            pending: VecDeque::with_capacity(16),
            limits,
            receive_maximum: 65535,
            send_quota: 65535,
            max_packet_size: crate::codec::MAX_REMAINING_LENGTH as u32,
            disconnected_at: None,
            owner: 0,
            next_packet_id: 1,
        }
    }

    /// Allocate the next free packet identifier.
    ///
    /// Wrapping counter over 1..=65535 that skips identifiers still awaiting
    /// PUBACK, which keeps identifiers unique among in-flight messages.
    pub fn next_packet_id(&mut self) -> u16 {
        loop {
            let id = self.next_packet_id;
            self.next_packet_id = self.next_packet_id.wrapping_add(1);
            if self.next_packet_id == 0 {
                self.next_packet_id = 1;
            }
            if !self.inflight_outgoing.contains_key(&id) {
                return id;
            }
        }
    }

    /// Whether the expiry window has elapsed since going offline
    pub fn is_expired(&self) -> bool {
        if self.state != SessionState::Disconnected {
            return false;
        }
        if self.session_expiry_interval == 0 {
            return true;
        }
        if self.session_expiry_interval == EXPIRY_NEVER {
            return false;
        }
        match self.disconnected_at {
            Some(at) => at.elapsed().as_secs() >= self.session_expiry_interval as u64,
            None => false,
        }
    }

    /// Queue an undelivered QoS 1 publish, dropping the oldest on overflow
    pub fn queue_message(&mut self, publish: Publish) -> QueueResult {
        debug_assert!(publish.qos != QoS::AtMostOnce);
        let mut result = QueueResult::Queued;
        if self.pending.len() >= self.limits.max_queued {
            self.pending.pop_front();
            result = QueueResult::DroppedOldest;
        }
        self.pending.push_back(publish);
        result
    }

    /// Drain up to `max` queued messages, oldest first.
    ///
    /// The caller assigns packet identifiers and tracks the messages as
    /// in-flight before sending.
    pub fn read_available_messages(&mut self, max: usize) -> Vec<Publish> {
        let n = max.min(self.pending.len());
        self.pending.drain(..n).collect()
    }

    /// Put a drained message back at the head of the queue (delivery window
    /// filled before it could be sent)
    pub fn requeue_front(&mut self, publish: Publish) {
        self.pending.push_front(publish);
    }

    /// Queued message count
    pub fn queued_len(&self) -> usize {
        self.pending.len()
    }

    /// Record a subscription; returns false when the per-session cap would be
    /// exceeded (the filter is then not stored)
    pub fn add_subscription(
        &mut self,
        filter: String,
        options: SubscriptionOptions,
        subscription_id: Option<u32>,
    ) -> bool {
        let key: Arc<str> = filter.as_str().into();
        if !self.subscriptions.contains_key(&key)
            && self.subscriptions.len() >= self.limits.max_subscriptions
        {
            return false;
        }
        self.subscriptions.insert(
            key,
            SessionSubscription {
                filter,
                options,
                subscription_id,
            },
        );
        true
    }

    /// Remove a subscription by raw filter string
    pub fn remove_subscription(&mut self, filter: &str) -> bool {
        self.subscriptions.remove(filter).is_some()
    }

    /// Consume one unit of send quota; false when exhausted
    pub fn decrement_send_quota(&mut self) -> bool {
        if self.send_quota > 0 {
            self.send_quota -= 1;
            true
        } else {
            false
        }
    }

    /// Return one unit of send quota (on PUBACK)
    pub fn increment_send_quota(&mut self) {
        if self.send_quota < self.receive_maximum {
            self.send_quota += 1;
        }
    }

    /// Whether another QoS 1 message may enter the in-flight window
    pub fn can_send_inflight(&self) -> bool {
        self.send_quota > 0 && self.inflight_outgoing.len() < self.limits.max_inflight as usize
    }
}

/// What happened when a connection released its session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// A newer connection owns the session; nothing was changed
    NotOwner,
    /// Session went offline and awaits expiry
    Offline,
    /// Session had expiry 0 and was destroyed
    Destroyed,
}

/// Process-wide session registry keyed by client identifier
pub struct SessionStore {
    sessions: DashMap<Arc<str>, Arc<RwLock<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Look up or create the session for a CONNECT.
    ///
    /// clean-start discards any previous state and always yields a fresh
    /// session; otherwise a live, unexpired session is reactivated and the
    /// second element is true (session-present). `owner` is the connecting
    /// connection's token; it is bound under the session lock so a displaced
    /// connection racing its own teardown cannot mutate the session
    /// afterwards.
    pub fn get_or_create(
        &self,
        client_id: &str,
        clean_start: bool,
        limits: SessionLimits,
        owner: u64,
    ) -> (Arc<RwLock<Session>>, bool) {
        let client_id: Arc<str> = client_id.into();

        if !clean_start {
            if let Some(existing) = self.sessions.get(&client_id) {
                let mut s = existing.write();
                if !s.is_expired() {
                    s.state = SessionState::Connected;
                    s.disconnected_at = None;
                    s.limits = limits;
                    s.owner = owner;
                    drop(s);
                    return (existing.clone(), true);
                }
            }
        }

        let session = Arc::new(RwLock::new(Session::new(client_id.clone(), limits)));
        session.write().owner = owner;
        self.sessions.insert(client_id, session.clone());
        (session, false)
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<RwLock<Session>>> {
        self.sessions.get(client_id).map(|r| r.clone())
    }

    pub fn remove(&self, client_id: &str) {
        self.sessions.remove(client_id);
    }

    /// Transition a session offline; destroys it when the expiry interval is
    /// zero. No-op when `owner` no longer matches (a newer connection has
    /// taken the session over).
    pub fn disconnect(
        &self,
        client_id: &str,
        session: &Arc<RwLock<Session>>,
        owner: u64,
    ) -> DisconnectOutcome {
        let destroy = {
            let mut s = session.write();
            if s.owner != owner {
                return DisconnectOutcome::NotOwner;
            }
            s.owner = 0;
            s.state = SessionState::Disconnected;
            s.disconnected_at = Some(Instant::now());
            s.session_expiry_interval == 0
        };

        if destroy {
            // Only remove the entry if it still refers to this session; a
            // takeover may already have replaced it.
            self.sessions
                .remove_if(client_id, |_, current| Arc::ptr_eq(current, session));
            DisconnectOutcome::Destroyed
        } else {
            DisconnectOutcome::Offline
        }
    }

    /// Sweep expired sessions; returns the identifiers that were destroyed
    /// so the caller can purge the subscription index
    pub fn cleanup_expired(&self) -> Vec<Arc<str>> {
        let mut expired = Vec::new();
        self.sessions.retain(|client_id, session| {
            if session.read().is_expired() {
                expired.push(client_id.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Properties;
    use bytes::Bytes;

    fn publish(payload: &str) -> Publish {
        Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Arc::from("t"),
            packet_id: None,
            payload: Bytes::copy_from_slice(payload.as_bytes()),
            properties: Properties::default(),
        }
    }

    #[test]
    fn packet_id_allocator_skips_inflight() {
        let mut session = Session::new("c".into(), SessionLimits::default());

        let first = session.next_packet_id();
        assert_eq!(first, 1);
        session.inflight_outgoing.insert(
            2,
            InflightMessage {
                packet_id: 2,
                publish: publish("x"),
                sent_at: Instant::now(),
            },
        );

        // 2 is in flight, the allocator must skip it
        assert_eq!(session.next_packet_id(), 3);
    }

    #[test]
    fn packet_id_allocator_wraps_past_zero() {
        let mut session = Session::new("c".into(), SessionLimits::default());
        session.next_packet_id = 65535;

        assert_eq!(session.next_packet_id(), 65535);
        assert_eq!(session.next_packet_id(), 1);
    }

    #[test]
    fn queue_drops_oldest_on_overflow() {
        let limits = SessionLimits {
            max_queued: 2,
            ..Default::default()
        };
        let mut session = Session::new("c".into(), limits);

        assert_eq!(session.queue_message(publish("a")), QueueResult::Queued);
        assert_eq!(session.queue_message(publish("b")), QueueResult::Queued);
        assert_eq!(
            session.queue_message(publish("c")),
            QueueResult::DroppedOldest
        );

        let drained = session.read_available_messages(10);
        let payloads: Vec<_> = drained
            .iter()
            .map(|p| String::from_utf8_lossy(&p.payload).to_string())
            .collect();
        assert_eq!(payloads, vec!["b", "c"]);
    }

    #[test]
    fn read_available_respects_max() {
        let mut session = Session::new("c".into(), SessionLimits::default());
        for i in 0..5 {
            session.queue_message(publish(&i.to_string()));
        }

        assert_eq!(session.read_available_messages(3).len(), 3);
        assert_eq!(session.queued_len(), 2);
    }

    #[test]
    fn subscription_cap() {
        let limits = SessionLimits {
            max_subscriptions: 1,
            ..Default::default()
        };
        let mut session = Session::new("c".into(), limits);

        assert!(session.add_subscription("a".into(), Default::default(), None));
        assert!(!session.add_subscription("b".into(), Default::default(), None));
        // Overwriting an existing filter is always allowed
        assert!(session.add_subscription("a".into(), Default::default(), Some(7)));
    }

    #[test]
    fn expiry_semantics() {
        let mut session = Session::new("c".into(), SessionLimits::default());
        assert!(!session.is_expired());

        session.state = SessionState::Disconnected;
        session.disconnected_at = Some(Instant::now());

        // Interval 0 expires immediately once offline
        session.session_expiry_interval = 0;
        assert!(session.is_expired());

        session.session_expiry_interval = 3600;
        assert!(!session.is_expired());

        session.session_expiry_interval = EXPIRY_NEVER;
        assert!(!session.is_expired());
    }

    #[test]
    fn store_resume_and_clean_start() {
        let store = SessionStore::new();
        let limits = SessionLimits::default();

        let (session, present) = store.get_or_create("c1", false, limits, 1);
        assert!(!present);
        {
            let mut s = session.write();
            s.session_expiry_interval = 3600;
            s.add_subscription("a/b".into(), Default::default(), None);
        }
        store.disconnect("c1", &session, 1);

        // Resume keeps the subscription set
        let (resumed, present) = store.get_or_create("c1", false, limits, 2);
        assert!(present);
        assert!(Arc::ptr_eq(&resumed, &session));
        assert!(resumed.read().subscriptions.contains_key("a/b"));

        // Clean start discards it
        let (fresh, present) = store.get_or_create("c1", true, limits, 3);
        assert!(!present);
        assert!(!Arc::ptr_eq(&fresh, &session));
        assert!(fresh.read().subscriptions.is_empty());
    }

    #[test]
    fn disconnect_destroys_zero_expiry_sessions() {
        let store = SessionStore::new();
        let (session, _) = store.get_or_create("c1", true, SessionLimits::default(), 1);
        assert_eq!(
            store.disconnect("c1", &session, 1),
            DisconnectOutcome::Destroyed
        );
        assert!(store.get("c1").is_none());

        let (session, _) = store.get_or_create("c2", false, SessionLimits::default(), 2);
        session.write().session_expiry_interval = 60;
        assert_eq!(
            store.disconnect("c2", &session, 2),
            DisconnectOutcome::Offline
        );
        assert!(store.get("c2").is_some());
    }

    #[test]
    fn disconnect_after_takeover_is_ignored() {
        let store = SessionStore::new();
        let (session, _) = store.get_or_create("c1", false, SessionLimits::default(), 1);
        session.write().session_expiry_interval = 3600;
        store.disconnect("c1", &session, 1);

        // New connection resumes; the displaced connection's late disconnect
        // must not push the session offline again
        let (resumed, present) = store.get_or_create("c1", false, SessionLimits::default(), 2);
        assert!(present);
        assert_eq!(
            store.disconnect("c1", &resumed, 1),
            DisconnectOutcome::NotOwner
        );
        assert_eq!(resumed.read().state, SessionState::Connected);
    }
}
