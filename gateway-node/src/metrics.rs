//! # Prometheus Metrics (C11)
//!
//! Exposes operational metrics for the gateway. Scraped by Prometheus at the
//! `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the gateway.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    /// Currently connected WebSocket sessions.
    pub sessions_connected: IntGauge,
    /// Total distinct subscribe operations (`handle_client_subscribe` calls).
    pub topics_subscribed_total: IntCounter,
    /// AMOP unicast attempts, labeled by outcome: `ok`, `not_found`, `failed`.
    pub amop_sends_total: IntCounterVec,
    /// AMOP broadcasts dispatched (client- or peer-originated).
    pub amop_broadcasts_total: IntCounter,
    /// JSON-RPC requests handled, labeled by method name.
    pub rpc_requests_total: IntCounterVec,
    /// Currently active event-subscription tasks, summed across every group.
    pub event_sub_tasks_active: IntGauge,
    /// Total nodes removed by the group manager's liveness sweep.
    pub group_nodes_unreachable_total: IntCounter,
}

impl GatewayMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("gateway".into()), None).expect("failed to create prometheus registry");

        let sessions_connected = IntGauge::new("sessions_connected", "Currently connected WebSocket sessions").expect("metric creation");
        registry.register(Box::new(sessions_connected.clone())).expect("metric registration");

        let topics_subscribed_total =
            IntCounter::new("topics_subscribed_total", "Total client topic-subscribe operations").expect("metric creation");
        registry.register(Box::new(topics_subscribed_total.clone())).expect("metric registration");

        let amop_sends_total = IntCounterVec::new(
            Opts::new("amop_sends_total", "AMOP unicast send attempts by outcome"),
            &["result"],
        )
        .expect("metric creation");
        registry.register(Box::new(amop_sends_total.clone())).expect("metric registration");

        let amop_broadcasts_total = IntCounter::new("amop_broadcasts_total", "Total AMOP broadcasts dispatched").expect("metric creation");
        registry.register(Box::new(amop_broadcasts_total.clone())).expect("metric registration");

        let rpc_requests_total = IntCounterVec::new(
            Opts::new("rpc_requests_total", "JSON-RPC requests handled by method"),
            &["method"],
        )
        .expect("metric creation");
        registry.register(Box::new(rpc_requests_total.clone())).expect("metric registration");

        let event_sub_tasks_active =
            IntGauge::new("event_sub_tasks_active", "Active event-subscription tasks across every group").expect("metric creation");
        registry.register(Box::new(event_sub_tasks_active.clone())).expect("metric registration");

        let group_nodes_unreachable_total =
            IntCounter::new("group_nodes_unreachable_total", "Total nodes removed by the liveness sweep").expect("metric creation");
        registry
            .register(Box::new(group_nodes_unreachable_total.clone()))
            .expect("metric registration");

        Self {
            registry,
            sessions_connected,
            topics_subscribed_total,
            amop_sends_total,
            amop_broadcasts_total,
            rpc_requests_total,
            event_sub_tasks_active,
            group_nodes_unreachable_total,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers via extension.
pub type SharedMetrics = Arc<GatewayMetrics>;

/// Builds the standalone `/metrics` router, served on its own listener
/// (`[metrics].listen_ip`/`listen_port`) rather than alongside `/rpc`/`/ws`.
pub fn metrics_router(metrics: SharedMetrics) -> Router {
    Router::new().route("/metrics", get(metrics_handler)).with_state(metrics)
}

/// Axum handler that renders `/metrics` in Prometheus text format.
async fn metrics_handler(axum::extract::State(metrics): axum::extract::State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (StatusCode::OK, [("content-type", "text/plain; version=0.0.4; charset=utf-8")], body).into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_metrics_encode_without_error() {
        let metrics = GatewayMetrics::new();
        metrics.sessions_connected.set(3);
        metrics.amop_sends_total.with_label_values(&["ok"]).inc();
        let encoded = metrics.encode().unwrap();
        assert!(encoded.contains("gateway_sessions_connected 3"));
        assert!(encoded.contains("gateway_amop_sends_total"));
    }
}
