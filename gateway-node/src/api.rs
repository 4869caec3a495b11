//! # HTTP/WebSocket front (C9)
//!
//! Two entry points into the same dispatcher stack: a plain JSON-RPC POST
//! endpoint for request/response-only SDK clients, and a WebSocket upgrade
//! that additionally carries the handshake, AMOP client traffic, and
//! server-initiated pushes (block/group notify, event-log push).
//!
//! ## Endpoints
//!
//! | Method | Path       | Description                                   |
//! |--------|------------|------------------------------------------------|
//! | GET    | `/health`  | Liveness probe                                  |
//! | POST   | `/rpc`     | JSON-RPC 2.0, request/response only             |
//! | GET    | `/ws`      | Framed session: handshake, RPC, AMOP, pushes    |
//!
//! `/metrics` is not on this router — it is served on its own listener
//! (`crate::metrics::metrics_router`), the same dedicated-port pattern the
//! gateway's `[metrics]` config section documents.
//!
//! The WebSocket read loop is the one place a decoded [`Frame`] is routed:
//! first against the session's own pending-response table (for frames that
//! are actually replies to something this gateway sent, e.g. a forwarded
//! AMOP request), then by `frame_type` otherwise.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use bcos_rpc_gateway::amop::{AmopEngine, AmopError};
use bcos_rpc_gateway::eventsub::{EventFilter, EventLogPush, EventSubCallback, GroupWorker, MatchedLog, PushStatus};
use bcos_rpc_gateway::frame::envelope::{AmopEnvelope, AmopMessageType};
use bcos_rpc_gateway::frame::{frame_type, status, Frame};
use bcos_rpc_gateway::group::GroupManager;
use bcos_rpc_gateway::rpc::{JsonRpcResponse, RpcDispatcher, RpcError, PROTOCOL_VERSION};
use bcos_rpc_gateway::session::{Session, SessionRegistry};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::SharedMetrics;

/// One [`GroupWorker`] per bootstrapped group, looked up by group id when a
/// session subscribes to event logs.
pub type EventWorkers = HashMap<String, Arc<GroupWorker>>;

#[derive(Clone)]
pub struct AppState {
    pub rpc: Arc<RpcDispatcher>,
    pub amop: Arc<AmopEngine>,
    pub sessions: Arc<SessionRegistry>,
    pub groups: Arc<GroupManager>,
    pub event_workers: Arc<EventWorkers>,
    pub metrics: SharedMetrics,
    pub max_frame_bytes: usize,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/rpc", post(rpc_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /health` — returns 200 if the gateway process is alive. Does not
/// check node-service reachability; `getGroupInfoList` over `/rpc` does.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/json")], r#"{"status":"ok"}"#)
}

/// `POST /rpc` — plain JSON-RPC 2.0, no session, no AMOP.
async fn rpc_handler(State(state): State<AppState>, body: String) -> impl IntoResponse {
    let method = extract_method(&body);
    state.metrics.rpc_requests_total.with_label_values(&[method.as_str()]).inc();
    let response = state.rpc.handle_request(&body).await;
    (StatusCode::OK, [("content-type", "application/json")], response.to_json_string())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let max_frame_bytes = state.max_frame_bytes;
    ws.max_message_size(max_frame_bytes)
        .max_frame_size(max_frame_bytes)
        .on_upgrade(move |socket| handle_session(socket, addr.to_string(), state))
}

async fn handle_session(socket: WebSocket, endpoint: String, state: AppState) {
    let (session, mut write_rx) = Session::new(endpoint.clone());
    state.sessions.add(session.clone());
    state.metrics.sessions_connected.inc();
    tracing::info!(%endpoint, "session connected");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(bytes) = write_rx.recv().await {
            if sink.send(Message::Binary(bytes.to_vec())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Binary(data) => handle_frame(Bytes::from(data), &session, &endpoint, &state).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    state.sessions.remove(&endpoint);
    state.metrics.sessions_connected.dec();
    tracing::info!(%endpoint, "session disconnected");
}

async fn handle_frame(bytes: Bytes, session: &Arc<Session>, endpoint: &str, state: &AppState) {
    let frame = match Frame::decode(bytes) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::debug!(%endpoint, %err, "dropping malformed frame");
            return;
        }
    };

    if session.dispatch_response(frame.clone()) {
        return;
    }

    match frame.frame_type {
        frame_type::HANDSHAKE => handle_handshake_frame(frame, session, state).await,
        frame_type::RPC_REQUEST => handle_rpc_frame(frame, session, state).await,
        frame_type::AMOP_SUBSCRIBE_TOPIC => handle_subscribe_frame(frame, endpoint, session, state).await,
        frame_type::AMOP_REQUEST => handle_amop_request_frame(frame, session, state).await,
        frame_type::AMOP_BROADCAST => handle_amop_broadcast_frame(frame, state).await,
        other => {
            tracing::debug!(%endpoint, frame_type = other, "unsupported frame type");
            let reply = frame.respond(status::UNSUPPORTED_PACKET_TYPE, Bytes::new());
            let _ = session.send_frame(&reply, state.max_frame_bytes).await;
        }
    }
}

async fn handle_handshake_frame(frame: Frame, session: &Arc<Session>, state: &AppState) {
    session.set_protocol_version(PROTOCOL_VERSION as u64);
    let payload = state.rpc.handshake_response();
    let Ok(payload) = serde_json::to_vec(&payload) else { return };
    let reply = frame.respond(status::SUCCESS, payload);
    let _ = session.send_frame(&reply, state.max_frame_bytes).await;
}

async fn handle_rpc_frame(frame: Frame, session: &Arc<Session>, state: &AppState) {
    let body = String::from_utf8_lossy(&frame.payload).into_owned();
    let method = extract_method(&body);
    state.metrics.rpc_requests_total.with_label_values(&[method.as_str()]).inc();

    let response = match method.as_str() {
        "subscribeEventLogs" => handle_subscribe_event_logs(&body, session, state),
        "unsubscribeEventLogs" => handle_unsubscribe_event_logs(&body, state),
        _ => state.rpc.handle_request(&body).await,
    };

    let reply = frame.respond(status::SUCCESS, response.to_json_string().into_bytes());
    let _ = session.send_frame(&reply, state.max_frame_bytes).await;
}

async fn handle_subscribe_frame(frame: Frame, endpoint: &str, session: &Arc<Session>, state: &AppState) {
    let envelope = match AmopEnvelope::decode(frame.payload.clone()) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::debug!(%endpoint, %err, "malformed amop subscribe envelope");
            let reply = frame.respond(status::UNSUPPORTED_PACKET_TYPE, Bytes::new());
            let _ = session.send_frame(&reply, state.max_frame_bytes).await;
            return;
        }
    };
    let topics: HashSet<String> = serde_json::from_slice(&envelope.data).unwrap_or_default();
    state.amop.handle_client_subscribe(endpoint, topics).await;
    state.metrics.topics_subscribed_total.inc();
    let reply = frame.respond(status::SUCCESS, Bytes::new());
    let _ = session.send_frame(&reply, state.max_frame_bytes).await;
}

async fn handle_amop_request_frame(frame: Frame, session: &Arc<Session>, state: &AppState) {
    let envelope = match AmopEnvelope::decode(frame.payload.clone()) {
        Ok(envelope) => envelope,
        Err(_) => {
            let reply = frame.respond(status::UNSUPPORTED_PACKET_TYPE, Bytes::new());
            let _ = session.send_frame(&reply, state.max_frame_bytes).await;
            return;
        }
    };

    let (status_code, payload) = match state.amop.handle_client_request(&envelope.topic, envelope.data.clone()).await {
        Ok(data) => {
            state.metrics.amop_sends_total.with_label_values(&["ok"]).inc();
            let response_envelope = AmopEnvelope::new(AmopMessageType::AmopRequest, envelope.topic.clone(), data);
            match response_envelope.encode() {
                Ok(bytes) => (status::SUCCESS, bytes),
                Err(_) => (status::INTERNAL_ERROR, Bytes::new()),
            }
        }
        Err(AmopError::NotFoundPeerByTopicSendMsg) => {
            state.metrics.amop_sends_total.with_label_values(&["not_found"]).inc();
            (status::NOT_FOUND_PEER_BY_TOPIC, Bytes::new())
        }
        Err(err) => {
            tracing::debug!(topic = %envelope.topic, %err, "amop client request failed");
            state.metrics.amop_sends_total.with_label_values(&["failed"]).inc();
            (status::INTERNAL_ERROR, Bytes::new())
        }
    };

    let reply = frame.respond(status_code, payload);
    let _ = session.send_frame(&reply, state.max_frame_bytes).await;
}

async fn handle_amop_broadcast_frame(frame: Frame, state: &AppState) {
    let Ok(envelope) = AmopEnvelope::decode(frame.payload.clone()) else {
        return;
    };
    state.amop.handle_client_broadcast(&envelope.topic, envelope.data.clone()).await;
    state.metrics.amop_broadcasts_total.inc();
}

// -- subscribeEventLogs / unsubscribeEventLogs -----------------------------
//
// Not part of the blockchain method table (C8's RpcDispatcher has no notion
// of a session): these create and cancel per-session event-sub tasks (C7),
// so they're handled here, where the session's push channel is in scope.

fn handle_subscribe_event_logs(body: &str, session: &Arc<Session>, state: &AppState) -> JsonRpcResponse {
    let (id, params) = parse_id_and_params(body);
    let Some(group_id) = params.first().and_then(Value::as_str) else {
        return JsonRpcResponse::failure(id, RpcError::invalid_params("missing groupId"));
    };
    let Some(worker) = state.event_workers.get(group_id) else {
        return JsonRpcResponse::failure(id, RpcError::node_not_exist_or_not_started());
    };

    let from_block = params.get(1).and_then(Value::as_i64).unwrap_or(0);
    let to_block = params.get(2).and_then(Value::as_i64).unwrap_or(i64::MAX);
    let addresses = string_array(params.get(3));
    let topics = string_array(params.get(4));
    let filter = EventFilter {
        from_block,
        to_block,
        addresses,
        topics,
    };

    let subscription_id = uuid::Uuid::new_v4().to_string();
    let callback = Arc::new(SessionEventPushCallback {
        session: Arc::downgrade(session),
        subscription_id: subscription_id.clone(),
        max_frame_bytes: state.max_frame_bytes,
    });
    worker.subscribe(subscription_id.clone(), filter, callback);
    JsonRpcResponse::success(id, Value::String(subscription_id))
}

fn handle_unsubscribe_event_logs(body: &str, state: &AppState) -> JsonRpcResponse {
    let (id, params) = parse_id_and_params(body);
    let Some(group_id) = params.first().and_then(Value::as_str) else {
        return JsonRpcResponse::failure(id, RpcError::invalid_params("missing groupId"));
    };
    let Some(subscription_id) = params.get(1).and_then(Value::as_str) else {
        return JsonRpcResponse::failure(id, RpcError::invalid_params("missing subscriptionId"));
    };
    let Some(worker) = state.event_workers.get(group_id) else {
        return JsonRpcResponse::failure(id, RpcError::node_not_exist_or_not_started());
    };
    worker.unsubscribe(subscription_id);
    JsonRpcResponse::success(id, Value::Bool(true))
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn parse_id_and_params(body: &str) -> (i64, Vec<Value>) {
    let raw: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let id = raw.get("id").and_then(Value::as_i64).unwrap_or(0);
    let params = raw.get("params").and_then(Value::as_array).cloned().unwrap_or_default();
    (id, params)
}

fn extract_method(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("method").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

fn new_frame_seq() -> [u8; 16] {
    *uuid::Uuid::new_v4().as_bytes()
}

/// Pushes an event-sub task's matches to the session that created it. Holds
/// only a weak reference, per the crate's cyclic-reference strategy — the
/// session's own disconnect path never has to reach back into this worker.
struct SessionEventPushCallback {
    session: Weak<Session>,
    subscription_id: String,
    max_frame_bytes: usize,
}

impl EventSubCallback for SessionEventPushCallback {
    fn on_push(&self, matches: Vec<MatchedLog>, complete: bool) -> bool {
        let Some(session) = self.session.upgrade() else {
            return false;
        };
        if !session.is_connected() {
            return false;
        }
        if matches.is_empty() && !complete {
            // Every worker iteration probes liveness this way; skip the
            // wire round-trip when there is nothing new to report.
            return true;
        }

        let push_status = if complete { PushStatus::PushCompleted } else { PushStatus::Running };
        let push = EventLogPush::new(self.subscription_id.clone(), push_status, matches);
        let Ok(payload) = serde_json::to_vec(&push) else {
            return true;
        };
        let frame = Frame::new(frame_type::EVENT_LOG_PUSH, new_frame_seq(), payload);
        let max_frame_bytes = self.max_frame_bytes;
        tokio::spawn(async move {
            if let Err(err) = session.send_frame(&frame, max_frame_bytes).await {
                tracing::debug!(%err, "event log push delivery failed");
            }
        });
        true
    }
}
