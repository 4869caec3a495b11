//! # Group manager (C6)
//!
//! The chain/group/node model and the per-node service bundle registry.
//! Holds `chainId`, a map of `groupId -> GroupInfo`, and a map of node
//! service bundles, all under one readers-writer lock per group entry.

pub mod service;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

pub use service::{NodeServiceBundle, NodeServiceClient, NodeServiceFactory, ServiceError};

/// Reseeds the node-selection RNG from a monotonic clock on every call,
/// rather than relying on process-wide RNG state. Same anchor-and-elapsed
/// pattern as `amop::monotonic_seed`, duplicated here since the two crates'
/// modules don't share a common RNG-helper module.
fn monotonic_seed() -> u64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_nanos() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Classical,
    Sm,
}

/// One node's static description within a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainNodeInfo {
    pub node_name: String,
    pub node_type: NodeType,
    pub status: String,
    pub ini_config: String,
    /// service-tag -> address. `BTreeMap` for deterministic JSON ordering
    /// in the handshake's `groupInfoList`.
    pub deploy_info: BTreeMap<String, String>,
}

/// (chainId, groupId, genesisConfig, iniConfig, status, nodes). `genesisConfig`
/// and `iniConfig` are opaque strings this crate never interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub chain_id: String,
    pub group_id: String,
    pub genesis_config: String,
    pub ini_config: String,
    pub status: String,
    pub nodes: BTreeMap<String, ChainNodeInfo>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GroupError {
    #[error("group {0} does not exist")]
    GroupNotFound(String),
    #[error("node {0} does not exist in group {1}")]
    NodeNotFound(String, String),
}

struct GroupEntry {
    info: GroupInfo,
    /// Insertion order of node names, used for the `selectNode` fallback
    /// ("iterate the group's nodes in insertion order").
    node_order: Vec<String>,
    block_numbers: HashMap<String, i64>,
    nodes_with_latest_block_number: HashSet<String>,
}

/// Key into the node service bundle map: node names are unique only within
/// a group, so bundles are keyed by (groupId, nodeName).
type BundleKey = (String, String);

pub struct GroupManager {
    chain_id: String,
    factory: Arc<dyn NodeServiceFactory>,
    groups: RwLock<HashMap<String, GroupEntry>>,
    bundles: RwLock<HashMap<BundleKey, Arc<NodeServiceBundle>>>,
}

impl GroupManager {
    pub fn new(chain_id: impl Into<String>, factory: Arc<dyn NodeServiceFactory>) -> Self {
        Self {
            chain_id: chain_id.into(),
            factory,
            groups: RwLock::new(HashMap::new()),
            bundles: RwLock::new(HashMap::new()),
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Merges `info` into the registry. For each node without an existing
    /// bundle, builds one via the factory and appends it to the group's
    /// insertion order. Returns `false` (a no-op) when `info` is identical
    /// to what is already stored: no new bundles, no block-info entries.
    pub fn upsert_group_info(&self, info: GroupInfo) -> bool {
        let mut groups = self.groups.write();
        if let Some(existing) = groups.get(&info.group_id) {
            if existing.info == info {
                return false;
            }
        }

        let mut bundles = self.bundles.write();
        let entry = groups.entry(info.group_id.clone()).or_insert_with(|| GroupEntry {
            info: GroupInfo {
                chain_id: info.chain_id.clone(),
                group_id: info.group_id.clone(),
                genesis_config: info.genesis_config.clone(),
                ini_config: info.ini_config.clone(),
                status: info.status.clone(),
                nodes: BTreeMap::new(),
            },
            node_order: Vec::new(),
            block_numbers: HashMap::new(),
            nodes_with_latest_block_number: HashSet::new(),
        });

        for (node_name, node) in &info.nodes {
            let key = (info.group_id.clone(), node_name.clone());
            if !bundles.contains_key(&key) {
                let bundle = self.factory.build(&self.chain_id, &info.group_id, node);
                bundles.insert(key, bundle);
                entry.node_order.push(node_name.clone());
                entry.block_numbers.insert(node_name.clone(), 0);
            }
        }

        entry.info = info;
        true
    }

    /// Selection policy: prefer a uniformly random node at the latest known
    /// block height; else the first node (by insertion order) with a live
    /// bundle; else `None`.
    pub fn select_node(&self, group_id: &str) -> Option<String> {
        let groups = self.groups.read();
        let entry = groups.get(group_id)?;

        if !entry.nodes_with_latest_block_number.is_empty() {
            let candidates: Vec<&String> = entry.nodes_with_latest_block_number.iter().collect();
            let mut rng = StdRng::seed_from_u64(monotonic_seed());
            return candidates.choose(&mut rng).map(|s| (*s).clone());
        }

        let bundles = self.bundles.read();
        entry
            .node_order
            .iter()
            .find(|node_name| {
                bundles
                    .get(&(group_id.to_string(), (*node_name).clone()))
                    .map(|bundle| !bundle.is_unreachable())
                    .unwrap_or(false)
            })
            .cloned()
    }

    /// If `node_name` is given, returns its bundle directly; otherwise
    /// delegates to `select_node`.
    pub fn node_service(&self, group_id: &str, node_name: Option<&str>) -> Option<Arc<NodeServiceBundle>> {
        let resolved = match node_name {
            Some(name) => name.to_string(),
            None => self.select_node(group_id)?,
        };
        self.bundles.read().get(&(group_id.to_string(), resolved)).cloned()
    }

    /// Updates the per-node block number and recomputes the argmax set for
    /// the group.
    pub fn update_group_block_info(&self, group_id: &str, node_name: &str, block_number: i64) -> Result<(), GroupError> {
        let mut groups = self.groups.write();
        let entry = groups
            .get_mut(group_id)
            .ok_or_else(|| GroupError::GroupNotFound(group_id.to_string()))?;
        if !entry.info.nodes.contains_key(node_name) {
            return Err(GroupError::NodeNotFound(node_name.to_string(), group_id.to_string()));
        }
        entry.block_numbers.insert(node_name.to_string(), block_number);
        let max = entry.block_numbers.values().copied().max().unwrap_or_default();
        entry.nodes_with_latest_block_number = entry
            .block_numbers
            .iter()
            .filter(|(_, height)| **height == max)
            .map(|(name, _)| name.clone())
            .collect();
        Ok(())
    }

    pub fn group_info(&self, group_id: &str) -> Option<GroupInfo> {
        self.groups.read().get(group_id).map(|entry| entry.info.clone())
    }

    pub fn group_info_list(&self) -> Vec<GroupInfo> {
        self.groups.read().values().map(|entry| entry.info.clone()).collect()
    }

    pub fn group_list(&self) -> Vec<String> {
        self.groups.read().keys().cloned().collect()
    }

    /// For each node in each group whose bundle reports unreachable: removes
    /// it from the `GroupInfo`, drops its bundle and block-info entry.
    /// Returns the ids of groups that changed, so the caller can fire a
    /// `groupInfoChanged` push exactly once per affected group.
    pub fn sweep_liveness(&self) -> Vec<String> {
        let mut groups = self.groups.write();
        let mut bundles = self.bundles.write();
        let mut affected = Vec::new();

        for (group_id, entry) in groups.iter_mut() {
            let mut changed = false;
            let unreachable_nodes: Vec<String> = entry
                .node_order
                .iter()
                .filter(|node_name| {
                    bundles
                        .get(&(group_id.clone(), (*node_name).clone()))
                        .map(|bundle| bundle.is_unreachable())
                        .unwrap_or(false)
                })
                .cloned()
                .collect();

            for node_name in unreachable_nodes {
                entry.info.nodes.remove(&node_name);
                entry.node_order.retain(|n| n != &node_name);
                entry.block_numbers.remove(&node_name);
                entry.nodes_with_latest_block_number.remove(&node_name);
                bundles.remove(&(group_id.clone(), node_name));
                changed = true;
            }

            if changed {
                affected.push(group_id.clone());
            }
        }

        affected
    }
}

#[cfg(test)]
mod tests {
    use super::service::test_support::NullServiceFactory;
    use super::*;

    fn node(name: &str) -> ChainNodeInfo {
        ChainNodeInfo {
            node_name: name.to_string(),
            node_type: NodeType::Classical,
            status: "running".to_string(),
            ini_config: String::new(),
            deploy_info: BTreeMap::new(),
        }
    }

    fn group_with(group_id: &str, node_names: &[&str]) -> GroupInfo {
        let mut nodes = BTreeMap::new();
        for name in node_names {
            nodes.insert(name.to_string(), node(name));
        }
        GroupInfo {
            chain_id: "chain0".to_string(),
            group_id: group_id.to_string(),
            genesis_config: String::new(),
            ini_config: String::new(),
            status: "running".to_string(),
            nodes,
        }
    }

    fn manager() -> GroupManager {
        GroupManager::new("chain0", Arc::new(NullServiceFactory))
    }

    #[test]
    fn upsert_builds_a_bundle_per_new_node() {
        let manager = manager();
        assert!(manager.upsert_group_info(group_with("g1", &["n1", "n2"])));
        assert!(manager.node_service("g1", Some("n1")).is_some());
        assert!(manager.node_service("g1", Some("n2")).is_some());
    }

    #[test]
    fn identical_upsert_is_a_no_op() {
        let manager = manager();
        let info = group_with("g1", &["n1"]);
        assert!(manager.upsert_group_info(info.clone()));
        assert!(!manager.upsert_group_info(info));
    }

    #[test]
    fn select_node_falls_back_to_first_live_bundle_in_insertion_order() {
        let manager = manager();
        manager.upsert_group_info(group_with("g1", &["n1", "n2", "n3"]));
        assert_eq!(manager.select_node("g1"), Some("n1".to_string()));
    }

    #[test]
    fn select_node_prefers_nodes_at_latest_height() {
        let manager = manager();
        manager.upsert_group_info(group_with("g1", &["n1", "n2", "n3"]));
        manager.update_group_block_info("g1", "n1", 100).unwrap();
        manager.update_group_block_info("g1", "n2", 101).unwrap();
        manager.update_group_block_info("g1", "n3", 101).unwrap();
        for _ in 0..50 {
            let picked = manager.select_node("g1").unwrap();
            assert!(picked == "n2" || picked == "n3");
        }
    }

    #[test]
    fn select_node_on_unknown_group_returns_none() {
        let manager = manager();
        assert_eq!(manager.select_node("nowhere"), None);
    }

    #[test]
    fn update_group_block_info_rejects_unknown_node() {
        let manager = manager();
        manager.upsert_group_info(group_with("g1", &["n1"]));
        assert_eq!(
            manager.update_group_block_info("g1", "ghost", 1),
            Err(GroupError::NodeNotFound("ghost".to_string(), "g1".to_string()))
        );
    }

    #[test]
    fn liveness_sweep_removes_unreachable_nodes_and_reports_the_affected_group() {
        let manager = manager();
        manager.upsert_group_info(group_with("g1", &["n1", "n2"]));
        manager.node_service("g1", Some("n1")).unwrap().mark_unreachable();

        let affected = manager.sweep_liveness();
        assert_eq!(affected, vec!["g1".to_string()]);
        assert!(manager.node_service("g1", Some("n1")).is_none());
        assert!(manager.node_service("g1", Some("n2")).is_some());
        assert!(!manager.group_info("g1").unwrap().nodes.contains_key("n1"));
    }

    #[test]
    fn liveness_sweep_is_a_no_op_when_nothing_is_unreachable() {
        let manager = manager();
        manager.upsert_group_info(group_with("g1", &["n1"]));
        assert!(manager.sweep_liveness().is_empty());
    }

    #[test]
    fn group_info_list_reflects_every_upserted_group() {
        let manager = manager();
        manager.upsert_group_info(group_with("g1", &["n1"]));
        manager.upsert_group_info(group_with("g2", &["n1"]));
        let mut ids: Vec<String> = manager.group_list();
        ids.sort();
        assert_eq!(ids, vec!["g1".to_string(), "g2".to_string()]);
    }
}
