//! Subscription index and topic matching
//!
//! The store maps topic filters to subscriber lists through a segment trie.
//! Shared subscriptions (`$share/<name>/<filter>`) are indexed under the
//! inner filter with their share group attached; each (share group, filter)
//! pair keeps a rotation cursor so the router can pick one member per
//! publish, round-robin.

mod trie;
pub mod validation;

pub use trie::FilterTrie;
pub use validation::{
    parse_shared_filter, topic_matches_filter, validate_topic_filter, validate_topic_name,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::protocol::QoS;

/// One subscriber entry in the index
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Client identifier of the subscriber
    pub client_id: Arc<str>,
    /// Granted QoS
    pub qos: QoS,
    /// Do not deliver messages published by this client back to it
    pub no_local: bool,
    /// Forward the RETAIN flag as published
    pub retain_as_published: bool,
    /// Subscription identifier (if the SUBSCRIBE carried one)
    pub subscription_id: Option<u32>,
    /// Share group name for shared subscriptions
    pub share_group: Option<Arc<str>>,
}

/// Subscribers registered under one filter node
#[derive(Debug, Default)]
struct FilterEntry {
    /// All subscriptions on this filter, in insertion order
    subs: Vec<Subscription>,
    /// Round-robin cursor per share group on this filter
    cursors: AHashMap<Arc<str>, AtomicUsize>,
}

/// A matched share group: the router delivers to exactly one member
#[derive(Debug)]
pub struct SharedMatch {
    /// Share group name
    pub group: Arc<str>,
    /// Rotation counter value for this publish (advances once per match)
    pub rotation: usize,
    /// Group members on this filter, in subscription order
    pub members: SmallVec<[Subscription; 4]>,
}

/// All subscribers matching one topic name
#[derive(Debug, Default)]
pub struct MatchResult {
    /// Non-shared subscriptions (may contain the same client several times
    /// when several of its filters match; the router deduplicates)
    pub direct: SmallVec<[Subscription; 8]>,
    /// One entry per matched (share group, filter) pair
    pub shared: SmallVec<[SharedMatch; 2]>,
}

/// Process-wide subscription index.
///
/// Readers match concurrently under the shared lock; writers (subscribe,
/// unsubscribe, session teardown) serialise on the exclusive lock. Rotation
/// cursors are atomics so matching stays on the read path.
pub struct SubscriptionStore {
    trie: RwLock<FilterTrie<FilterEntry>>,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self {
            trie: RwLock::new(FilterTrie::new()),
        }
    }

    /// Add or replace a subscription.
    ///
    /// `filter` is the raw filter from the SUBSCRIBE packet; a `$share`
    /// prefix is parsed off here. A second subscribe from the same client to
    /// the same filter (and share group) overwrites the previous options.
    pub fn subscribe(&self, filter: &str, mut subscription: Subscription) {
        let inner = match parse_shared_filter(filter) {
            Some((group, inner)) => {
                subscription.share_group = Some(Arc::from(group));
                inner
            }
            None => filter,
        };

        let mut trie = self.trie.write();
        if trie.get_mut(inner).is_none() {
            trie.insert(inner, FilterEntry::default());
        }
        let entry = trie.get_mut(inner).expect("just inserted");

        entry.subs.retain(|s| {
            !(s.client_id == subscription.client_id && s.share_group == subscription.share_group)
        });
        if let Some(ref group) = subscription.share_group {
            entry
                .cursors
                .entry(group.clone())
                .or_insert_with(|| AtomicUsize::new(0));
        }
        entry.subs.push(subscription);
    }

    /// Remove a subscription; returns whether one existed
    pub fn unsubscribe(&self, filter: &str, client_id: &str) -> bool {
        let (inner, group) = match parse_shared_filter(filter) {
            Some((group, inner)) => (inner, Some(group)),
            None => (filter, None),
        };

        let mut trie = self.trie.write();
        let Some(entry) = trie.get_mut(inner) else {
            return false;
        };

        let before = entry.subs.len();
        entry.subs.retain(|s| {
            if s.client_id.as_ref() != client_id {
                return true;
            }
            match (&s.share_group, group) {
                (Some(sg), Some(g)) => sg.as_ref() != g,
                (None, None) => false,
                _ => true,
            }
        });
        let removed = entry.subs.len() != before;

        if let Some(g) = group {
            if !entry.subs.iter().any(|s| s.share_group.as_deref() == Some(g)) {
                entry.cursors.remove(g);
            }
        }
        if entry.subs.is_empty() {
            trie.remove(inner);
        }
        removed
    }

    /// Drop every subscription held by a client (session teardown)
    pub fn unsubscribe_all(&self, client_id: &str) {
        let mut trie = self.trie.write();
        trie.retain(|entry| {
            entry.subs.retain(|s| s.client_id.as_ref() != client_id);
            entry
                .cursors
                .retain(|group, _| entry.subs.iter().any(|s| s.share_group.as_deref() == Some(group)));
            !entry.subs.is_empty()
        });
    }

    /// Collect every subscriber matching a topic name.
    ///
    /// Shared groups advance their rotation cursor once per call, which gives
    /// round-robin distribution across consecutive publishes.
    pub fn matches(&self, topic: &str) -> MatchResult {
        let trie = self.trie.read();
        let mut result = MatchResult::default();

        trie.matches(topic, |entry| {
            let mut groups_here: SmallVec<[Arc<str>; 2]> = SmallVec::new();
            for sub in &entry.subs {
                match &sub.share_group {
                    None => result.direct.push(sub.clone()),
                    Some(group) => {
                        if !groups_here.iter().any(|g| g == group) {
                            groups_here.push(group.clone());
                        }
                    }
                }
            }

            for group in groups_here {
                let members: SmallVec<[Subscription; 4]> = entry
                    .subs
                    .iter()
                    .filter(|s| s.share_group.as_deref() == Some(group.as_ref()))
                    .cloned()
                    .collect();
                let rotation = entry
                    .cursors
                    .get(&group)
                    .map(|c| c.fetch_add(1, Ordering::Relaxed))
                    .unwrap_or(0);
                result.shared.push(SharedMatch {
                    group,
                    rotation,
                    members,
                });
            }
        });

        result
    }
}

impl Default for SubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}
