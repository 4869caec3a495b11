//! # Ledger reader
//!
//! Implements [`LedgerReader`] by selecting a live node for a group via the
//! group manager and forwarding `getBlockByNumber` to its ledger service,
//! then matching the returned transaction receipts' logs against the
//! subscription filter's address/topic constraints.
//!
//! Log shape is left to the ledger service (an external collaborator, per
//! `group/service.rs`); this reader only interprets the conventional
//! `result.transactions[].logs[]` shape with `address`/`topics` fields, the
//! same shape `JsonRpcImpl_2_0.cpp`'s `getBlockByNumber` produces.

use std::sync::Arc;

use async_trait::async_trait;
use bcos_rpc_gateway::eventsub::{EventFilter, LedgerReader, MatchedLog};
use bcos_rpc_gateway::group::GroupManager;
use serde_json::{json, Value};

pub struct GroupManagerLedgerReader {
    groups: Arc<GroupManager>,
}

impl GroupManagerLedgerReader {
    pub fn new(groups: Arc<GroupManager>) -> Arc<Self> {
        Arc::new(Self { groups })
    }
}

fn log_matches(log: &Value, filter: &EventFilter) -> bool {
    if !filter.addresses.is_empty() {
        let address = log.get("address").and_then(Value::as_str).unwrap_or("");
        if !filter.addresses.iter().any(|a| a.eq_ignore_ascii_case(address)) {
            return false;
        }
    }
    if !filter.topics.is_empty() {
        let topics: Vec<&str> = log
            .get("topics")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if !filter.topics.iter().any(|t| topics.contains(&t.as_str())) {
            return false;
        }
    }
    true
}

#[async_trait]
impl LedgerReader for GroupManagerLedgerReader {
    async fn match_block(&self, group_id: &str, block_number: i64, filter: &EventFilter) -> Vec<MatchedLog> {
        let node_name = match self.groups.select_node(group_id) {
            Some(name) => name,
            None => return Vec::new(),
        };
        let bundle = match self.groups.node_service(group_id, Some(&node_name)) {
            Some(bundle) => bundle,
            None => return Vec::new(),
        };

        let result = bundle
            .ledger
            .call("getBlockByNumber", &[json!(block_number), json!(true)])
            .await;

        let block = match result {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(group_id, block_number, %err, "getBlockByNumber failed while matching event filter");
                bundle.mark_unreachable();
                return Vec::new();
            }
        };

        block
            .get("transactions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|tx| tx.get("logs"))
            .filter_map(Value::as_array)
            .flatten()
            .filter(|log| log_matches(log, filter))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_without_matching_address_is_excluded() {
        let filter = EventFilter {
            from_block: 0,
            to_block: 10,
            addresses: vec!["0xabc".to_string()],
            topics: vec![],
        };
        let log = json!({"address": "0xdef", "topics": []});
        assert!(!log_matches(&log, &filter));
    }

    #[test]
    fn log_with_matching_address_is_included() {
        let filter = EventFilter {
            from_block: 0,
            to_block: 10,
            addresses: vec!["0xABC".to_string()],
            topics: vec![],
        };
        let log = json!({"address": "0xabc", "topics": []});
        assert!(log_matches(&log, &filter));
    }

    #[test]
    fn empty_filter_constraints_match_everything() {
        let filter = EventFilter {
            from_block: 0,
            to_block: 10,
            addresses: vec![],
            topics: vec![],
        };
        let log = json!({"address": "0xanything", "topics": ["t1"]});
        assert!(log_matches(&log, &filter));
    }

    #[test]
    fn topic_filter_requires_at_least_one_overlap() {
        let filter = EventFilter {
            from_block: 0,
            to_block: 10,
            addresses: vec![],
            topics: vec!["t1".to_string()],
        };
        let log = json!({"address": "0xabc", "topics": ["t2", "t3"]});
        assert!(!log_matches(&log, &filter));
    }
}
