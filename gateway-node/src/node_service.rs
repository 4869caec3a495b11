//! # Node service clients
//!
//! A minimal HTTP/1.1 JSON-RPC client for the ledger/scheduler/txpool/
//! consensus/sync endpoints a [`NodeServiceBundle`] forwards to, plus the
//! [`NodeServiceFactory`] that builds one bundle per node from its
//! `deploy_info` addresses.
//!
//! Deliberately hand-rolled over a raw `TcpStream` rather than pulling in a
//! full HTTP client crate, for a single POST-and-read-body request shape —
//! the same trade this binary makes in `transport.rs` for the peer channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bcos_rpc_gateway::group::service::{NodeServiceBundle, NodeServiceClient, NodeServiceFactory, ServiceError};
use bcos_rpc_gateway::group::ChainNodeInfo;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Service tags looked up in a node's `deploy_info` map, one per
/// [`NodeServiceBundle`] field.
const SERVICE_TAGS: [&str; 5] = ["ledger", "scheduler", "txpool", "consensus", "sync"];

/// Speaks JSON-RPC 2.0 over a plain HTTP/1.1 POST to a fixed `host:port`
/// address, reusing one connection per call (`Connection: close`). No TLS,
/// no connection pooling — this is the gateway's edge, not a general
/// outbound HTTP stack.
pub struct HttpNodeServiceClient {
    addr: String,
}

impl HttpNodeServiceClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    async fn post_json_rpc(&self, method: &str, params: &[Value]) -> Result<Value, ServiceError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        })
        .to_string();

        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|_| ServiceError::Unreachable)?;

        let request = format!(
            "POST / HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.addr,
            body.len(),
            body,
        );

        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|_| ServiceError::Unreachable)?;
        stream.shutdown().await.map_err(|_| ServiceError::Unreachable)?;

        let mut buf = Vec::new();
        stream
            .read_to_end(&mut buf)
            .await
            .map_err(|_| ServiceError::Unreachable)?;
        let response = String::from_utf8_lossy(&buf);

        let response_body = response
            .split_once("\r\n\r\n")
            .map(|(_, b)| b)
            .unwrap_or(&response);

        let parsed: Value = serde_json::from_str(response_body).map_err(|e| ServiceError::Upstream {
            code: -32700,
            message: format!("malformed response body: {e}"),
        })?;

        if let Some(error) = parsed.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("upstream error")
                .to_string();
            return Err(ServiceError::Upstream { code, message });
        }

        Ok(parsed.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl NodeServiceClient for HttpNodeServiceClient {
    async fn call(&self, method: &str, params: &[Value]) -> Result<Value, ServiceError> {
        self.post_json_rpc(method, params).await
    }
}

/// Stands in for a service tag a node's `deploy_info` omits: every call
/// fails as unreachable, so the caller's existing error handling (mark the
/// bundle unreachable, surface `nodeNotExistOrNotStarted`) applies uniformly
/// rather than needing an `Option<Arc<dyn NodeServiceClient>>` at every
/// call site.
pub struct UnconfiguredServiceClient;

#[async_trait]
impl NodeServiceClient for UnconfiguredServiceClient {
    async fn call(&self, _method: &str, _params: &[Value]) -> Result<Value, ServiceError> {
        Err(ServiceError::Unreachable)
    }
}

fn client_for(deploy_info: &BTreeMap<String, String>, tag: &str) -> Arc<dyn NodeServiceClient> {
    match deploy_info.get(tag) {
        Some(addr) => Arc::new(HttpNodeServiceClient::new(addr.clone())),
        None => Arc::new(UnconfiguredServiceClient),
    }
}

/// Builds one [`NodeServiceBundle`] per node from the addresses in its
/// `deploy_info` map (keys: `ledger`, `scheduler`, `txpool`, `consensus`,
/// `sync`), grounded in [`ChainNodeInfo::deploy_info`]'s documented
/// "service-tag -> address" shape.
pub struct HttpNodeServiceFactory;

impl NodeServiceFactory for HttpNodeServiceFactory {
    fn build(&self, _chain_id: &str, _group_id: &str, node: &ChainNodeInfo) -> Arc<NodeServiceBundle> {
        let mut clients: Vec<Arc<dyn NodeServiceClient>> = SERVICE_TAGS
            .iter()
            .map(|tag| client_for(&node.deploy_info, tag))
            .collect();

        // Unwraps are safe: `clients` has exactly `SERVICE_TAGS.len()` entries, drained in order.
        let sync = clients.pop().unwrap();
        let consensus = clients.pop().unwrap();
        let txpool = clients.pop().unwrap();
        let scheduler = clients.pop().unwrap();
        let ledger = clients.pop().unwrap();

        Arc::new(NodeServiceBundle::new(
            node.node_name.clone(),
            ledger,
            scheduler,
            txpool,
            consensus,
            sync,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcos_rpc_gateway::group::NodeType;

    fn node_with_deploy_info(deploy_info: BTreeMap<String, String>) -> ChainNodeInfo {
        ChainNodeInfo {
            node_name: "node0".to_string(),
            node_type: NodeType::Classical,
            status: "running".to_string(),
            ini_config: String::new(),
            deploy_info,
        }
    }

    #[tokio::test]
    async fn unconfigured_service_client_always_reports_unreachable() {
        let client = UnconfiguredServiceClient;
        let err = client.call("getBlockNumber", &[]).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unreachable));
    }

    #[tokio::test]
    async fn factory_falls_back_to_unconfigured_for_missing_tags() {
        let mut deploy_info = BTreeMap::new();
        deploy_info.insert("ledger".to_string(), "127.0.0.1:1".to_string());
        let node = node_with_deploy_info(deploy_info);

        let bundle = HttpNodeServiceFactory.build("chain0", "group0", &node);
        let err = bundle.scheduler.call("call", &[]).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unreachable));
    }

    #[tokio::test]
    async fn ledger_client_dials_the_configured_address() {
        let mut deploy_info = BTreeMap::new();
        deploy_info.insert("ledger".to_string(), "127.0.0.1:1".to_string());
        let node = node_with_deploy_info(deploy_info);

        let bundle = HttpNodeServiceFactory.build("chain0", "group0", &node);
        // Port 1 is not listening locally; the call must fail as unreachable
        // rather than panicking.
        let err = bundle.ledger.call("getBlockNumber", &[]).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unreachable));
    }
}
