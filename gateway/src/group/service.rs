//! Node service bundle contracts (C6).
//!
//! The ledger/scheduler/txpool/consensus/sync clients are external
//! collaborators — this crate fixes only their call shape, not their
//! implementation. A production deployment wires real RPC clients behind
//! [`NodeServiceClient`]; tests use an in-memory double.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::ChainNodeInfo;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("node is unreachable")]
    Unreachable,
    #[error("upstream error {code}: {message}")]
    Upstream { code: i64, message: String },
}

/// A single remote service endpoint (ledger, scheduler, txpool, consensus,
/// or sync) on one node. `call` forwards a method name and its JSON-RPC
/// params array and returns the raw JSON result, letting the RPC dispatcher
/// (C8) bind it into a JSON-RPC response without this crate needing to
/// know the blockchain-specific method bodies.
#[async_trait]
pub trait NodeServiceClient: Send + Sync {
    async fn call(&self, method: &str, params: &[Value]) -> Result<Value, ServiceError>;
}

/// Per-node set of service client handles plus a liveness flag derived from
/// the last probe. Constructed lazily when a node first appears; discarded
/// when it goes unreachable.
pub struct NodeServiceBundle {
    pub node_name: String,
    pub ledger: Arc<dyn NodeServiceClient>,
    pub scheduler: Arc<dyn NodeServiceClient>,
    pub txpool: Arc<dyn NodeServiceClient>,
    pub consensus: Arc<dyn NodeServiceClient>,
    pub sync: Arc<dyn NodeServiceClient>,
    unreachable: AtomicBool,
}

impl NodeServiceBundle {
    pub fn new(
        node_name: impl Into<String>,
        ledger: Arc<dyn NodeServiceClient>,
        scheduler: Arc<dyn NodeServiceClient>,
        txpool: Arc<dyn NodeServiceClient>,
        consensus: Arc<dyn NodeServiceClient>,
        sync: Arc<dyn NodeServiceClient>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            ledger,
            scheduler,
            txpool,
            consensus,
            sync,
            unreachable: AtomicBool::new(false),
        }
    }

    pub fn is_unreachable(&self) -> bool {
        self.unreachable.load(Ordering::Acquire)
    }

    pub fn mark_unreachable(&self) {
        self.unreachable.store(true, Ordering::Release);
    }
}

/// Builds a [`NodeServiceBundle`] for a node the group manager has not seen
/// before. Indirection point so production wiring (real network clients)
/// and test wiring (in-memory doubles) share the same `upsertGroupInfo`
/// path.
pub trait NodeServiceFactory: Send + Sync {
    fn build(&self, chain_id: &str, group_id: &str, node: &ChainNodeInfo) -> Arc<NodeServiceBundle>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub struct NullServiceClient;

    #[async_trait]
    impl NodeServiceClient for NullServiceClient {
        async fn call(&self, _method: &str, _params: &[Value]) -> Result<Value, ServiceError> {
            Ok(Value::Null)
        }
    }

    pub struct NullServiceFactory;

    impl NodeServiceFactory for NullServiceFactory {
        fn build(&self, _chain_id: &str, _group_id: &str, node: &ChainNodeInfo) -> Arc<NodeServiceBundle> {
            Arc::new(NodeServiceBundle::new(
                node.node_name.clone(),
                Arc::new(NullServiceClient),
                Arc::new(NullServiceClient),
                Arc::new(NullServiceClient),
                Arc::new(NullServiceClient),
                Arc::new(NullServiceClient),
            ))
        }
    }
}
