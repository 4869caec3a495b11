//! # Topic manager (C4)
//!
//! Tracks which local clients (by endpoint) are subscribed to which topics,
//! and an eventually-consistent view of which peer gateways have last
//! advertised which topics. `topicSeq` is a monotonically increasing local
//! counter, bumped on every local subscription change — peers gossip it to
//! decide whether to pull a fresh snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::session::ClientRemovalListener;

/// A topic name. Equality is by name.
pub type TopicItem = String;

#[derive(Debug, thiserror::Error)]
pub enum TopicError {
    #[error("invalid topic snapshot json: {0}")]
    InvalidSnapshot(#[from] serde_json::Error),
}

/// Wire shape of `snapshotAsJson()` / `parseSnapshot()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSnapshot {
    #[serde(rename = "topicSeq")]
    pub topic_seq: u32,
    #[serde(rename = "topicItems")]
    pub topic_items: Vec<String>,
}

struct PeerState {
    seq: u32,
    topics: HashSet<TopicItem>,
}

/// Invariant: for a given peer, `(seq, topics)` always advance together —
/// [`TopicManager::update_peer`] is the only mutator and it sets both
/// fields atomically under the write lock.
pub struct TopicManager {
    topic_seq: AtomicU32,
    clients: RwLock<HashMap<String, HashSet<TopicItem>>>,
    peers: RwLock<HashMap<String, PeerState>>,
}

impl TopicManager {
    pub fn new() -> Self {
        Self {
            topic_seq: AtomicU32::new(0),
            clients: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn topic_seq(&self) -> u32 {
        self.topic_seq.load(Ordering::Acquire)
    }

    /// Replaces the endpoint's topic set wholesale (not a delta) and bumps
    /// `topicSeq`, unconditionally — even a no-op resubscribe advances it.
    pub fn subscribe(&self, endpoint: &str, topics: HashSet<TopicItem>) {
        self.clients.write().insert(endpoint.to_string(), topics);
        self.topic_seq.fetch_add(1, Ordering::Release);
    }

    pub fn query_topics(&self, endpoint: &str) -> Option<HashSet<TopicItem>> {
        self.clients.read().get(endpoint).cloned()
    }

    /// Erases the endpoint's entry, if present, and bumps `topicSeq`.
    pub fn remove_client(&self, endpoint: &str) {
        let removed = self.clients.write().remove(endpoint).is_some();
        if removed {
            self.topic_seq.fetch_add(1, Ordering::Release);
        }
    }

    /// Union of every client's topics, plus the current `topicSeq`.
    pub fn snapshot_as_json(&self) -> Result<String, TopicError> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    fn snapshot(&self) -> TopicSnapshot {
        let clients = self.clients.read();
        let mut union: HashSet<&str> = HashSet::new();
        for topics in clients.values() {
            union.extend(topics.iter().map(String::as_str));
        }
        let mut topic_items: Vec<String> = union.into_iter().map(str::to_string).collect();
        topic_items.sort();
        TopicSnapshot {
            topic_seq: self.topic_seq(),
            topic_items,
        }
    }

    pub fn parse_snapshot(json: &str) -> Result<(u32, HashSet<TopicItem>), TopicError> {
        let snapshot: TopicSnapshot = serde_json::from_str(json)?;
        Ok((snapshot.topic_seq, snapshot.topic_items.into_iter().collect()))
    }

    /// `true` iff the stored seq for `peer` differs from `seq` (absent
    /// counts as differing), i.e. a refresh is warranted.
    pub fn check_peer_seq(&self, peer: &str, seq: u32) -> bool {
        match self.peers.read().get(peer) {
            Some(state) => state.seq != seq,
            None => true,
        }
    }

    pub fn update_peer(&self, peer: &str, seq: u32, topics: HashSet<TopicItem>) {
        self.peers.write().insert(peer.to_string(), PeerState { seq, topics });
    }

    /// Erases peer state for peers not present in `live_peers`.
    pub fn reconcile_peers(&self, live_peers: &HashSet<String>) {
        self.peers.write().retain(|peer, _| live_peers.contains(peer));
    }

    pub fn lookup_peers_by_topic(&self, name: &str) -> Vec<String> {
        self.peers
            .read()
            .iter()
            .filter(|(_, state)| state.topics.contains(name))
            .map(|(peer, _)| peer.clone())
            .collect()
    }

    pub fn lookup_clients_by_topic(&self, name: &str) -> Vec<String> {
        self.clients
            .read()
            .iter()
            .filter(|(_, topics)| topics.contains(name))
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }
}

impl Default for TopicManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRemovalListener for TopicManager {
    fn on_client_removed(&self, endpoint: &str) {
        self.remove_client(endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<TopicItem> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn subscribe_replaces_rather_than_merges() {
        let manager = TopicManager::new();
        manager.subscribe("e1", set(&["a", "b"]));
        manager.subscribe("e1", set(&["c"]));
        assert_eq!(manager.query_topics("e1"), Some(set(&["c"])));
    }

    #[test]
    fn repeated_identical_subscribe_still_bumps_seq_twice() {
        let manager = TopicManager::new();
        manager.subscribe("e1", set(&["a"]));
        manager.subscribe("e1", set(&["a"]));
        assert_eq!(manager.topic_seq(), 2);
        assert_eq!(manager.query_topics("e1"), Some(set(&["a"])));
    }

    #[test]
    fn remove_client_bumps_seq_only_when_present() {
        let manager = TopicManager::new();
        manager.subscribe("e1", set(&["a"]));
        let seq_before = manager.topic_seq();
        manager.remove_client("absent");
        assert_eq!(manager.topic_seq(), seq_before);
        manager.remove_client("e1");
        assert_eq!(manager.topic_seq(), seq_before + 1);
        assert_eq!(manager.query_topics("e1"), None);
    }

    #[test]
    fn removed_endpoint_never_resurfaces_in_lookup() {
        let manager = TopicManager::new();
        manager.subscribe("e1", set(&["t"]));
        manager.remove_client("e1");
        assert!(manager.lookup_clients_by_topic("t").is_empty());
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let manager = TopicManager::new();
        manager.subscribe("e1", set(&["a", "b"]));
        manager.subscribe("e2", set(&["b", "c"]));
        let json = manager.snapshot_as_json().unwrap();
        let (seq, topics) = TopicManager::parse_snapshot(&json).unwrap();
        assert_eq!(seq, manager.topic_seq());
        assert_eq!(topics, set(&["a", "b", "c"]));
    }

    #[test]
    fn parse_snapshot_rejects_malformed_json() {
        assert!(TopicManager::parse_snapshot("not json").is_err());
    }

    #[test]
    fn check_peer_seq_is_true_for_an_unknown_peer() {
        let manager = TopicManager::new();
        assert!(manager.check_peer_seq("peer1", 0));
    }

    #[test]
    fn check_peer_seq_is_false_once_seq_matches() {
        let manager = TopicManager::new();
        manager.update_peer("peer1", 5, set(&["t"]));
        assert!(!manager.check_peer_seq("peer1", 5));
        assert!(manager.check_peer_seq("peer1", 6));
    }

    #[test]
    fn reconcile_peers_drops_state_for_peers_no_longer_live() {
        let manager = TopicManager::new();
        manager.update_peer("peer1", 1, set(&["t"]));
        manager.update_peer("peer2", 1, set(&["t"]));
        let live: HashSet<String> = ["peer1".to_string()].into_iter().collect();
        manager.reconcile_peers(&live);
        assert_eq!(manager.lookup_peers_by_topic("t"), vec!["peer1".to_string()]);
    }

    #[test]
    fn lookup_peers_by_topic_returns_only_matching_peers() {
        let manager = TopicManager::new();
        manager.update_peer("peer1", 1, set(&["a"]));
        manager.update_peer("peer2", 1, set(&["b"]));
        assert_eq!(manager.lookup_peers_by_topic("a"), vec!["peer1".to_string()]);
        assert_eq!(manager.lookup_peers_by_topic("z"), Vec::<String>::new());
    }

    #[test]
    fn client_removal_listener_bridges_registry_removal_into_reap() {
        let manager = TopicManager::new();
        manager.subscribe("e1", set(&["t"]));
        manager.on_client_removed("e1");
        assert!(manager.query_topics("e1").is_none());
    }
}
