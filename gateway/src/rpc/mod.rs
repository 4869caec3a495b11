//! # RPC dispatcher (C8)
//!
//! JSON-RPC 2.0 envelope parse/serialize, the method table, the WebSocket
//! handshake, and server-initiated pushes (block-number, group-info,
//! event-log). Shared verbatim between the HTTP front (C9) and the
//! WebSocket session path — both end at [`RpcDispatcher::handle_request`].

pub mod methods;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::group::{GroupManager, GroupInfo, NodeServiceClient, ServiceError};
use methods::{service_category_for, ServiceCategory, GROUP_MANAGEMENT_METHODS};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const NODE_NOT_EXIST_OR_NOT_STARTED: i64 = -32000;
pub const GROUP_ALREADY_EXISTS: i64 = -32001;
pub const NODE_ALREADY_EXISTS: i64 = -32002;
pub const OPERATION_NOT_ALLOWED: i64 = -32003;

/// Protocol version reported in the handshake response.
pub const PROTOCOL_VERSION: i32 = 1;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn parse_error() -> Self {
        Self {
            code: PARSE_ERROR,
            message: "parse error".to_string(),
        }
    }

    pub fn invalid_request() -> Self {
        Self {
            code: INVALID_REQUEST,
            message: "invalid request".to_string(),
        }
    }

    pub fn method_not_found() -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: "method not found".to_string(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: message.into(),
        }
    }

    pub fn node_not_exist_or_not_started() -> Self {
        Self {
            code: NODE_NOT_EXIST_OR_NOT_STARTED,
            message: "node does not exist or is not started".to_string(),
        }
    }

    pub fn group_already_exists() -> Self {
        Self {
            code: GROUP_ALREADY_EXISTS,
            message: "group already exists".to_string(),
        }
    }

    pub fn node_already_exists() -> Self {
        Self {
            code: NODE_ALREADY_EXISTS,
            message: "node already exists".to_string(),
        }
    }

    pub fn operation_not_allowed() -> Self {
        Self {
            code: OPERATION_NOT_ALLOWED,
            message: "operation not allowed".to_string(),
        }
    }

    /// Upstream service errors are forwarded verbatim, code preserved.
    pub fn from_service_error(err: ServiceError) -> Self {
        match err {
            ServiceError::Unreachable => Self::node_not_exist_or_not_started(),
            ServiceError::Upstream { code, message } => Self { code, message },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: i64, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: i64, err: RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcErrorBody {
                code: err.code,
                message: err.message,
            }),
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"jsonrpc":"2.0","id":0,"error":{"code":-32603,"message":"failed to encode response"}}"#.to_string()
        })
    }
}

/// Parses a raw JSON-RPC request body. Rejects (with `ParseError` or
/// `InvalidRequest`) anything missing `jsonrpc`/`method`/`params`, or whose
/// `params` is not a JSON array.
fn parse_request(body: &str) -> Result<(i64, String, Vec<Value>), RpcError> {
    let raw: Value = serde_json::from_str(body).map_err(|_| RpcError::parse_error())?;
    let obj = raw.as_object().ok_or_else(RpcError::invalid_request)?;

    let id = obj.get("id").and_then(Value::as_i64).unwrap_or(0);
    let jsonrpc_present = obj.get("jsonrpc").and_then(Value::as_str).is_some();
    let method = obj.get("method").and_then(Value::as_str);
    let params = obj.get("params").and_then(Value::as_array);

    match (jsonrpc_present, method, params) {
        (true, Some(method), Some(params)) => Ok((id, method.to_string(), params.clone())),
        _ => Err(RpcError::invalid_request()),
    }
}

/// Shared by the HTTP front (C9) and every WebSocket session's `RpcRequest`
/// frame handler.
pub struct RpcDispatcher {
    groups: Arc<GroupManager>,
}

impl RpcDispatcher {
    pub fn new(groups: Arc<GroupManager>) -> Self {
        Self { groups }
    }

    /// Parses, dispatches, and serializes in one step — the crate's single
    /// `onRequest(body) -> response` entry point.
    pub async fn handle_request(&self, body: &str) -> JsonRpcResponse {
        let (id, method, params) = match parse_request(body) {
            Ok(parsed) => parsed,
            Err(err) => return JsonRpcResponse::failure(0, err),
        };
        match self.dispatch(&method, params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => JsonRpcResponse::failure(id, err),
        }
    }

    async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        if GROUP_MANAGEMENT_METHODS.contains(&method) {
            return self.dispatch_group_management(method, &params);
        }
        match service_category_for(method) {
            Some(category) => self.dispatch_blockchain_method(method, category, params).await,
            None => Err(RpcError::method_not_found()),
        }
    }

    fn dispatch_group_management(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        match method {
            "getGroupList" => Ok(Value::from(self.groups.group_list())),
            "getGroupInfoList" => {
                serde_json::to_value(self.groups.group_info_list()).map_err(|err| RpcError::internal_error(err.to_string()))
            }
            "getGroupInfo" => {
                let group_id = first_string_param(params)?;
                let info = self.groups.group_info(&group_id).ok_or_else(RpcError::node_not_exist_or_not_started)?;
                serde_json::to_value(info).map_err(|err| RpcError::internal_error(err.to_string()))
            }
            "getGroupNodeInfo" => {
                let group_id = first_string_param(params)?;
                let node_name = params
                    .get(1)
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::invalid_params("missing nodeName"))?;
                let info = self.groups.group_info(&group_id).ok_or_else(RpcError::node_not_exist_or_not_started)?;
                let node = info.nodes.get(node_name).ok_or_else(RpcError::node_not_exist_or_not_started)?;
                serde_json::to_value(node).map_err(|err| RpcError::internal_error(err.to_string()))
            }
            _ => Err(RpcError::method_not_found()),
        }
    }

    async fn dispatch_blockchain_method(&self, method: &str, category: ServiceCategory, params: Vec<Value>) -> Result<Value, RpcError> {
        let group_id = first_string_param(&params)?;
        let node_name = params.get(1).and_then(Value::as_str);
        let skip = if node_name.is_some() { 2 } else { 1 };
        let forwarded_params = if params.len() > skip { params[skip..].to_vec() } else { Vec::new() };

        let bundle = self
            .groups
            .node_service(&group_id, node_name)
            .ok_or_else(RpcError::node_not_exist_or_not_started)?;

        let client: &Arc<dyn NodeServiceClient> = match category {
            ServiceCategory::Ledger => &bundle.ledger,
            ServiceCategory::Scheduler => &bundle.scheduler,
            ServiceCategory::TxPool => &bundle.txpool,
            ServiceCategory::Consensus => &bundle.consensus,
            ServiceCategory::Sync => &bundle.sync,
        };

        client.call(method, &forwarded_params).await.map_err(RpcError::from_service_error)
    }

    /// `{protocolVersion, groupInfoList}` — the response body of the first
    /// frame on a new session.
    pub fn handshake_response(&self) -> Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "groupInfoList": self.groups.group_info_list(),
        })
    }
}

fn first_string_param(params: &[Value]) -> Result<String, RpcError> {
    params
        .first()
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError::invalid_params("missing groupId"))
}

/// `{group, nodeName, blockNumber}`, emitted to every connected session on
/// every `updateGroupBlockInfo`.
pub fn block_notify_push(group: &str, node_name: &str, block_number: i64) -> Value {
    serde_json::json!({
        "group": group,
        "nodeName": node_name,
        "blockNumber": block_number,
    })
}

/// Full group info, emitted on every `upsertGroupInfo` and on the
/// liveness-sweep removal path.
pub fn group_notify_push(info: &GroupInfo) -> Value {
    serde_json::to_value(info).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::service::test_support::NullServiceFactory;
    use crate::group::{ChainNodeInfo, NodeType};
    use std::collections::BTreeMap;

    fn dispatcher_with_group() -> RpcDispatcher {
        let groups = Arc::new(GroupManager::new("chain0", Arc::new(NullServiceFactory)));
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "n1".to_string(),
            ChainNodeInfo {
                node_name: "n1".to_string(),
                node_type: NodeType::Classical,
                status: "running".to_string(),
                ini_config: String::new(),
                deploy_info: BTreeMap::new(),
            },
        );
        groups.upsert_group_info(GroupInfo {
            chain_id: "chain0".to_string(),
            group_id: "g1".to_string(),
            genesis_config: String::new(),
            ini_config: String::new(),
            status: "running".to_string(),
            nodes,
        });
        RpcDispatcher::new(groups)
    }

    struct RecordingServiceClient {
        calls: Arc<parking_lot::Mutex<Vec<Vec<Value>>>>,
    }

    #[async_trait::async_trait]
    impl NodeServiceClient for RecordingServiceClient {
        async fn call(&self, _method: &str, params: &[Value]) -> Result<Value, ServiceError> {
            self.calls.lock().push(params.to_vec());
            Ok(Value::Null)
        }
    }

    struct RecordingServiceFactory {
        calls: Arc<parking_lot::Mutex<Vec<Vec<Value>>>>,
    }

    impl crate::group::NodeServiceFactory for RecordingServiceFactory {
        fn build(&self, _chain_id: &str, _group_id: &str, node: &ChainNodeInfo) -> Arc<crate::group::NodeServiceBundle> {
            let client: Arc<dyn NodeServiceClient> = Arc::new(RecordingServiceClient { calls: self.calls.clone() });
            Arc::new(crate::group::NodeServiceBundle::new(
                node.node_name.clone(),
                client.clone(),
                client.clone(),
                client.clone(),
                client.clone(),
                client,
            ))
        }
    }

    /// A dispatcher with one group (`g1`) holding a single node (`n1`) whose
    /// service client records every forwarded call.
    fn dispatcher_with_recording_node(calls: Arc<parking_lot::Mutex<Vec<Vec<Value>>>>) -> RpcDispatcher {
        let groups = Arc::new(GroupManager::new("chain0", Arc::new(RecordingServiceFactory { calls })));
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "n1".to_string(),
            ChainNodeInfo {
                node_name: "n1".to_string(),
                node_type: NodeType::Classical,
                status: "running".to_string(),
                ini_config: String::new(),
                deploy_info: BTreeMap::new(),
            },
        );
        groups.upsert_group_info(GroupInfo {
            chain_id: "chain0".to_string(),
            group_id: "g1".to_string(),
            genesis_config: String::new(),
            ini_config: String::new(),
            status: "running".to_string(),
            nodes,
        });
        RpcDispatcher::new(groups)
    }

    #[tokio::test]
    async fn missing_method_is_an_invalid_request() {
        let dispatcher = dispatcher_with_group();
        let response = dispatcher.handle_request(r#"{"jsonrpc":"2.0","id":1,"params":[]}"#).await;
        assert_eq!(response.error.unwrap().code, INVALID_REQUEST);
    }

    #[tokio::test]
    async fn params_not_an_array_is_an_invalid_request() {
        let dispatcher = dispatcher_with_group();
        let response = dispatcher
            .handle_request(r#"{"jsonrpc":"2.0","id":1,"method":"getGroupList","params":{}}"#)
            .await;
        assert_eq!(response.error.unwrap().code, INVALID_REQUEST);
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_error() {
        let dispatcher = dispatcher_with_group();
        let response = dispatcher.handle_request("not json").await;
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let dispatcher = dispatcher_with_group();
        let response = dispatcher
            .handle_request(r#"{"jsonrpc":"2.0","id":1,"method":"notAMethod","params":[]}"#)
            .await;
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn get_group_list_returns_known_groups() {
        let dispatcher = dispatcher_with_group();
        let response = dispatcher
            .handle_request(r#"{"jsonrpc":"2.0","id":1,"method":"getGroupList","params":[]}"#)
            .await;
        assert_eq!(response.result.unwrap(), serde_json::json!(["g1"]));
    }

    #[tokio::test]
    async fn get_group_info_for_unknown_group_is_not_started() {
        let dispatcher = dispatcher_with_group();
        let response = dispatcher
            .handle_request(r#"{"jsonrpc":"2.0","id":1,"method":"getGroupInfo","params":["ghost"]}"#)
            .await;
        assert_eq!(response.error.unwrap().code, NODE_NOT_EXIST_OR_NOT_STARTED);
    }

    #[tokio::test]
    async fn blockchain_method_forwards_through_the_node_service() {
        let dispatcher = dispatcher_with_group();
        let response = dispatcher
            .handle_request(r#"{"jsonrpc":"2.0","id":7,"method":"getBlockNumber","params":["g1"]}"#)
            .await;
        assert!(response.error.is_none());
        assert_eq!(response.id, 7);
    }

    #[tokio::test]
    async fn blockchain_method_without_a_group_id_is_invalid_params() {
        let dispatcher = dispatcher_with_group();
        let response = dispatcher
            .handle_request(r#"{"jsonrpc":"2.0","id":1,"method":"getBlockNumber","params":[]}"#)
            .await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn blockchain_method_resolves_explicit_node_name_and_strips_it_from_forwarded_params() {
        let calls: Arc<parking_lot::Mutex<Vec<Vec<Value>>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let dispatcher = dispatcher_with_recording_node(calls.clone());
        let response = dispatcher
            .handle_request(r#"{"jsonrpc":"2.0","id":3,"method":"getBlockNumber","params":["g1","n1","extra-arg"]}"#)
            .await;
        assert!(response.error.is_none());
        assert_eq!(calls.lock().clone(), vec![vec![Value::from("extra-arg")]]);
    }

    #[tokio::test]
    async fn blockchain_method_with_unknown_node_name_is_not_started() {
        let dispatcher = dispatcher_with_group();
        let response = dispatcher
            .handle_request(r#"{"jsonrpc":"2.0","id":1,"method":"getBlockNumber","params":["g1","ghost"]}"#)
            .await;
        assert_eq!(response.error.unwrap().code, NODE_NOT_EXIST_OR_NOT_STARTED);
    }

    #[test]
    fn handshake_response_includes_protocol_version_and_group_list() {
        let dispatcher = dispatcher_with_group();
        let handshake = dispatcher.handshake_response();
        assert_eq!(handshake["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(handshake["groupInfoList"].as_array().unwrap().len(), 1);
    }
}
