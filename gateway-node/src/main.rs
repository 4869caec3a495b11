// Copyright (c) 2026 BCOS RPC Gateway Contributors. Apache-2.0 License.
// See LICENSE for details.

//! # BCOS RPC Gateway binary
//!
//! Wires the library crate's engines (session registry, topic manager, AMOP
//! overlay, group manager, RPC dispatcher, event-sub workers) to real I/O:
//! a TCP peer channel and inbound peer listener for AMOP, an HTTP node-service
//! client factory for the group registry, and the axum HTTP/WebSocket front.
//! `anyhow` is used here, at the startup boundary, to collapse every typed
//! library error into one reportable failure; library code itself never
//! returns `anyhow::Error`.

mod api;
mod cli;
mod ledger_reader;
mod logging;
mod metrics;
mod node_service;
mod peer_listener;
mod transport;

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context;
use bcos_rpc_gateway::amop::{AmopEngine, PeerChannel};
use bcos_rpc_gateway::config::GatewayConfig;
use bcos_rpc_gateway::eventsub::GroupWorker;
use bcos_rpc_gateway::frame::{frame_type, Frame};
use bcos_rpc_gateway::group::{ChainNodeInfo, GroupInfo, GroupManager, NodeType};
use bcos_rpc_gateway::rpc::{block_notify_push, group_notify_push, RpcDispatcher};
use bcos_rpc_gateway::session::{ClientRemovalListener, SessionRegistry};
use bcos_rpc_gateway::topic::TopicManager;
use clap::Parser;
use serde_json::Value;

use api::{AppState, EventWorkers};
use cli::{CheckConfigArgs, Commands, GatewayCli, RunArgs};
use logging::LogFormat;
use metrics::GatewayMetrics;

fn main() -> anyhow::Result<()> {
    let cli = GatewayCli::parse();

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::CheckConfig(args) => check_config(args),
        Commands::Version => {
            println!("bcos-rpc-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_config(args: CheckConfigArgs) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&args.config).with_context(|| format!("reading {}", args.config.display()))?;
    match GatewayConfig::from_toml_str(&raw) {
        Ok(config) => {
            println!("config is valid (chain_id={}, listen_port={})", config.chain.chain_id, config.rpc.listen_port);
            Ok(())
        }
        Err(err) => {
            eprintln!("config is invalid: {err}");
            std::process::exit(1);
        }
    }
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            GatewayConfig::from_toml_str(&raw)?
        }
        None => GatewayConfig::default(),
    };

    let log_format = LogFormat::from_str_lossy(&args.log_format);
    logging::init_logging(&args.log_level, log_format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.rpc.thread_count)
        .enable_all()
        .build()
        .context("building the tokio runtime")?;

    runtime.block_on(run_gateway(config))
}

/// Converts one statically-declared bootstrap entry into the [`GroupInfo`]
/// shape the group manager stores, building a bundle for every node.
fn group_info_from_bootstrap(chain_id: &str, bootstrap: &bcos_rpc_gateway::config::BootstrapGroup) -> GroupInfo {
    let mut nodes = BTreeMap::new();
    for node in &bootstrap.nodes {
        nodes.insert(
            node.node_name.clone(),
            ChainNodeInfo {
                node_name: node.node_name.clone(),
                node_type: parse_node_type(&node.node_type),
                status: node.status.clone(),
                ini_config: node.ini_config.clone(),
                deploy_info: node.deploy_info.clone(),
            },
        );
    }
    GroupInfo {
        chain_id: chain_id.to_string(),
        group_id: bootstrap.group_id.clone(),
        genesis_config: bootstrap.genesis_config.clone(),
        ini_config: bootstrap.ini_config.clone(),
        status: bootstrap.status.clone(),
        nodes,
    }
}

fn parse_node_type(s: &str) -> NodeType {
    match s.to_lowercase().as_str() {
        "sm" => NodeType::Sm,
        _ => NodeType::Classical,
    }
}

async fn run_gateway(config: GatewayConfig) -> anyhow::Result<()> {
    let groups = Arc::new(GroupManager::new(
        config.chain.chain_id.clone(),
        Arc::new(node_service::HttpNodeServiceFactory),
    ));
    for bootstrap_group in &config.group.bootstrap {
        groups.upsert_group_info(group_info_from_bootstrap(&config.chain.chain_id, bootstrap_group));
    }

    let sessions = Arc::new(SessionRegistry::new());
    let topics = Arc::new(TopicManager::new());
    let peer_channel: Arc<dyn PeerChannel> = transport::TcpPeerChannel::new(config.amop.peers.clone());
    let amop = Arc::new(AmopEngine::new(topics.clone(), sessions.clone(), peer_channel.clone()));
    sessions.set_removal_listener(Arc::downgrade(&amop) as Weak<dyn ClientRemovalListener>);

    let rpc = Arc::new(RpcDispatcher::new(groups.clone()));
    let metrics = Arc::new(GatewayMetrics::new());

    let mut event_workers_map: EventWorkers = HashMap::new();
    for group_id in groups.group_list() {
        let ledger = ledger_reader::GroupManagerLedgerReader::new(groups.clone());
        let worker = GroupWorker::new(group_id, ledger).with_max_blocks_per_loop(config.eventsub.max_blocks_per_loop);
        event_workers_map.insert(group_id.clone(), Arc::new(worker));
    }
    let event_workers = Arc::new(event_workers_map);

    for worker in event_workers.values() {
        let worker = worker.clone();
        tokio::spawn(async move {
            loop {
                worker.run_once().await;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });
    }

    tokio::spawn(gossip_loop(amop.clone(), peer_channel.clone(), config.amop.gossip_interval_ms));
    tokio::spawn(liveness_sweep_loop(
        groups.clone(),
        sessions.clone(),
        metrics.clone(),
        config.group.liveness_sweep_interval_ms,
        config.session.max_frame_bytes,
    ));
    tokio::spawn(block_poll_loop(
        groups.clone(),
        sessions.clone(),
        event_workers.clone(),
        config.group.block_poll_interval_ms,
        config.session.max_frame_bytes,
    ));

    let peer_listen_addr = SocketAddr::new(config.amop.peer_listen_ip, config.amop.peer_listen_port);
    let peer_listener_amop = amop.clone();
    tokio::spawn(async move {
        if let Err(err) = peer_listener::run(peer_listen_addr, peer_listener_amop).await {
            tracing::error!(%err, "peer listener stopped");
        }
    });

    let state = AppState {
        rpc,
        amop,
        sessions,
        groups,
        event_workers,
        metrics: metrics.clone(),
        max_frame_bytes: config.session.max_frame_bytes,
    };

    let rpc_addr = SocketAddr::new(config.rpc.listen_ip, config.rpc.listen_port);
    let metrics_addr = SocketAddr::new(config.metrics.listen_ip, config.metrics.listen_port);

    let rpc_listener = tokio::net::TcpListener::bind(rpc_addr)
        .await
        .with_context(|| format!("binding rpc listener on {rpc_addr}"))?;
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("binding metrics listener on {metrics_addr}"))?;

    tracing::info!(%rpc_addr, %metrics_addr, "gateway listening");

    let rpc_server = axum::serve(rpc_listener, api::create_router(state).into_make_service_with_connect_info::<SocketAddr>());
    let metrics_server = axum::serve(metrics_listener, metrics::metrics_router(metrics).into_make_service());

    tokio::try_join!(
        async { rpc_server.await.context("rpc server") },
        async { metrics_server.await.context("metrics server") },
    )?;

    Ok(())
}

fn new_frame_seq() -> [u8; 16] {
    *uuid::Uuid::new_v4().as_bytes()
}

/// Broadcasts `frame` to every currently connected session; delivery
/// failures are logged and otherwise ignored, matching every other
/// server-initiated push in this crate.
async fn broadcast_frame(sessions: &SessionRegistry, frame: &Frame, max_frame_bytes: usize) {
    for session in sessions.sessions() {
        if let Err(err) = session.send_frame(frame, max_frame_bytes).await {
            tracing::debug!(endpoint = session.endpoint(), %err, "server push delivery failed");
        }
    }
}

/// Broadcasts the local `topicSeq` to every peer gateway on a fixed
/// interval, so peers notice topic-subscription changes even absent a
/// client-driven subscribe. Piggybacks the peer-list reconciliation on the
/// same tick: the peer channel's `live_peers()` is this gateway's view of
/// which sibling gateways are currently known, and stale entries (a peer
/// that dropped out of the configured set) are reaped from the topic
/// manager's peer state the same way a front-service liveness notification
/// would (spec.md §4.5).
async fn gossip_loop(amop: Arc<AmopEngine>, peer_channel: Arc<dyn PeerChannel>, interval_ms: u64) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        ticker.tick().await;
        amop.on_gossip_tick().await;
        amop.on_peer_list_changed(&peer_channel.live_peers());
    }
}

/// Periodically sweeps unreachable nodes out of the group registry and
/// pushes a fresh `GroupInfo` to every session for each group that changed.
async fn liveness_sweep_loop(
    groups: Arc<GroupManager>,
    sessions: Arc<SessionRegistry>,
    metrics: Arc<GatewayMetrics>,
    interval_ms: u64,
    max_frame_bytes: usize,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        ticker.tick().await;
        let affected = groups.sweep_liveness();
        metrics.group_nodes_unreachable_total.inc_by(affected.len() as u64);
        for group_id in affected {
            let Some(info) = groups.group_info(&group_id) else { continue };
            let Ok(payload) = serde_json::to_vec(&group_notify_push(&info)) else { continue };
            let frame = Frame::new(frame_type::GROUP_NOTIFY, new_frame_seq(), payload);
            broadcast_frame(&sessions, &frame, max_frame_bytes).await;
        }
    }
}

/// Periodically polls each group's selected node for its latest block
/// number, feeding it to [`GroupManager::update_group_block_info`] and each
/// group's [`GroupWorker`], and pushes a `BLOCK_NOTIFY` frame on change.
async fn block_poll_loop(
    groups: Arc<GroupManager>,
    sessions: Arc<SessionRegistry>,
    event_workers: Arc<EventWorkers>,
    interval_ms: u64,
    max_frame_bytes: usize,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        ticker.tick().await;
        for group_id in groups.group_list() {
            let Some(node_name) = groups.select_node(&group_id) else { continue };
            let Some(bundle) = groups.node_service(&group_id, Some(&node_name)) else { continue };

            let result = bundle.ledger.call("getBlockNumber", &[]).await;
            let block_number = match result {
                Ok(value) => match parse_block_number(&value) {
                    Some(n) => n,
                    None => continue,
                },
                Err(err) => {
                    tracing::debug!(group_id, node_name, %err, "getBlockNumber failed during block poll");
                    bundle.mark_unreachable();
                    continue;
                }
            };

            if groups.update_group_block_info(&group_id, &node_name, block_number).is_err() {
                continue;
            }
            if let Some(worker) = event_workers.get(&group_id) {
                worker.on_block_notify(block_number);
            }

            let Ok(payload) = serde_json::to_vec(&block_notify_push(&group_id, &node_name, block_number)) else { continue };
            let frame = Frame::new(frame_type::BLOCK_NOTIFY, new_frame_seq(), payload);
            broadcast_frame(&sessions, &frame, max_frame_bytes).await;
        }
    }
}

fn parse_block_number(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    value
        .as_str()
        .and_then(|s| i64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
}
