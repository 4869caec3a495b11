//! # Gateway Configuration (C10)
//!
//! The gateway's config surface mirrors the ini-style `[rpc]` section from
//! the original deployment format (`listen_ip`, `listen_port`,
//! `thread_count`) plus a handful of tuning knobs for the engines defined
//! elsewhere in this crate. Parsed from TOML via `toml` rather than a
//! hand-rolled ini reader — the section/key shape is preserved, the syntax
//! is not.
//!
//! Every default here matches a constant named explicitly in the
//! specification (gossip interval, liveness sweep interval, session
//! timeout, frame cap, event-sub batch size) so that an operator who reads
//! only this file gets the full picture of what can be tuned.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// Lower and upper bounds (exclusive/inclusive) for a valid listen port.
/// Ports at or below 1024 require elevated privileges on most platforms;
/// a port of exactly 65535 is the last valid TCP port.
const MIN_LISTEN_PORT: u16 = 1024;

/// Default AMOP gossip broadcast interval, in milliseconds (spec.md §4.5).
pub const DEFAULT_AMOP_GOSSIP_INTERVAL_MS: u64 = 2_000;

/// Default group-manager liveness sweep interval, in milliseconds (spec.md §4.6).
pub const DEFAULT_LIVENESS_SWEEP_INTERVAL_MS: u64 = 10_000;

/// Default per-request response timeout, in milliseconds (spec.md §4.2).
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30_000;

/// Default maximum frame size accepted on a session's read path, in bytes
/// (spec.md §4.2: "Frame size cap: 10 MiB").
pub const DEFAULT_MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Default number of blocks an event-sub task processes per worker loop
/// iteration (spec.md §4.7).
pub const DEFAULT_EVENT_SUB_MAX_BLOCKS_PER_LOOP: u64 = 10;

/// Default RPC/WS listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 20200;

/// Default Prometheus metrics listen port.
pub const DEFAULT_METRICS_PORT: u16 = 20201;

/// Default tokio worker thread count.
pub const DEFAULT_THREAD_COUNT: usize = 8;

/// Default inbound peer-channel listen port (sibling gateways dial this to
/// reach the local AMOP engine's gossip/unicast/broadcast handlers).
pub const DEFAULT_PEER_LISTEN_PORT: u16 = 20300;

/// Default interval, in milliseconds, between polls of each node's
/// `getBlockNumber` used to drive `updateGroupBlockInfo` and the event-sub
/// workers' `latestBlockNumber`.
pub const DEFAULT_BLOCK_POLL_INTERVAL_MS: u64 = 1_000;

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

/// `[rpc]` — the dual HTTP+WebSocket listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    pub listen_ip: IpAddr,
    pub listen_port: u16,
    pub thread_count: usize,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: DEFAULT_LISTEN_PORT,
            thread_count: DEFAULT_THREAD_COUNT,
        }
    }
}

/// `[chain]` — identity of the chain this gateway fronts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSection {
    pub chain_id: String,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            chain_id: "chain0".to_string(),
        }
    }
}

/// `[amop]` — topic gossip tuning and the peer channel's static peer list.
///
/// The peer channel (the AMOP "front service") is an external collaborator
/// per spec.md §9; in production it is wired from a fixed set of sibling
/// gateway addresses rather than dynamic discovery, since this crate does
/// not implement a peer discovery protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmopSection {
    pub gossip_interval_ms: u64,
    /// Sibling gateway addresses (`host:port`) the peer channel dials for
    /// unicast/broadcast/gossip traffic.
    pub peers: Vec<String>,
    /// Local address the inbound peer listener binds, so sibling gateways
    /// have something to dial back into.
    pub peer_listen_ip: IpAddr,
    pub peer_listen_port: u16,
}

impl Default for AmopSection {
    fn default() -> Self {
        Self {
            gossip_interval_ms: DEFAULT_AMOP_GOSSIP_INTERVAL_MS,
            peers: Vec::new(),
            peer_listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            peer_listen_port: DEFAULT_PEER_LISTEN_PORT,
        }
    }
}

/// `[group]` — group manager liveness sweep tuning plus a static bootstrap
/// of the groups/nodes this gateway fronts.
///
/// Real deployments discover group/node topology through the gateway's own
/// node-registration channel (out of scope here, spec.md §9's "front
/// service" collaborator). Absent that, the bootstrap list lets an operator
/// declare the topology up front; `upsertGroupInfo` is idempotent, so
/// nothing prevents a future dynamic registration path from overlapping it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSection {
    pub liveness_sweep_interval_ms: u64,
    /// Interval, in milliseconds, between `getBlockNumber` polls that feed
    /// `updateGroupBlockInfo` and each group's event-sub worker.
    pub block_poll_interval_ms: u64,
    pub bootstrap: Vec<BootstrapGroup>,
}

impl Default for GroupSection {
    fn default() -> Self {
        Self {
            liveness_sweep_interval_ms: DEFAULT_LIVENESS_SWEEP_INTERVAL_MS,
            block_poll_interval_ms: DEFAULT_BLOCK_POLL_INTERVAL_MS,
            bootstrap: Vec::new(),
        }
    }
}

/// One statically-declared group, mirroring [`crate::group::GroupInfo`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapGroup {
    pub group_id: String,
    #[serde(default)]
    pub genesis_config: String,
    #[serde(default)]
    pub ini_config: String,
    #[serde(default = "default_group_status")]
    pub status: String,
    pub nodes: Vec<BootstrapNode>,
}

fn default_group_status() -> String {
    "running".to_string()
}

/// One statically-declared node within a [`BootstrapGroup`], mirroring
/// [`crate::group::ChainNodeInfo`]. `deploy_info` maps service tags
/// (`ledger`, `scheduler`, `txpool`, `consensus`, `sync`) to `host:port`
/// addresses; a tag a node omits is served by an always-unreachable client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapNode {
    pub node_name: String,
    #[serde(default = "default_node_type")]
    pub node_type: String,
    #[serde(default = "default_node_status")]
    pub status: String,
    #[serde(default)]
    pub ini_config: String,
    #[serde(default)]
    pub deploy_info: std::collections::BTreeMap<String, String>,
}

fn default_node_type() -> String {
    "classical".to_string()
}

fn default_node_status() -> String {
    "running".to_string()
}

/// `[session]` — per-session request timeout and frame size cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub default_timeout_ms: u64,
    pub max_frame_bytes: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// `[eventsub]` — event subscription worker batch size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSubSection {
    pub max_blocks_per_loop: u64,
}

impl Default for EventSubSection {
    fn default() -> Self {
        Self {
            max_blocks_per_loop: DEFAULT_EVENT_SUB_MAX_BLOCKS_PER_LOOP,
        }
    }
}

/// `[metrics]` — the Prometheus scrape listener, served on its own port per
/// the teacher's pattern of a dedicated metrics listener separate from the
/// RPC/WS listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub listen_ip: IpAddr,
    pub listen_port: u16,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: DEFAULT_METRICS_PORT,
        }
    }
}

// ---------------------------------------------------------------------------
// GatewayConfig
// ---------------------------------------------------------------------------

/// The gateway's full, validated configuration.
///
/// Constructed either from defaults (`GatewayConfig::default()`), parsed
/// from a TOML document (`GatewayConfig::from_toml_str`), or assembled
/// programmatically and then passed through `validate()`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub rpc: RpcSection,
    pub chain: ChainSection,
    pub amop: AmopSection,
    pub group: GroupSection,
    pub session: SessionSection,
    pub eventsub: EventSubSection,
    pub metrics: MetricsSection,
}

/// Errors produced while parsing or validating a [`GatewayConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(
        "invalid listen_port {port}: must be in ({min}, 65535]",
        min = MIN_LISTEN_PORT
    )]
    InvalidPort { port: u16 },

    #[error("chain_id must not be empty")]
    EmptyChainId,

    #[error("thread_count must be at least 1")]
    ZeroThreadCount,
}

impl GatewayConfig {
    /// Parses a `GatewayConfig` from a TOML document and validates it.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field invariants. Per spec.md §6: "Ports must be in
    /// (1024, 65535]; invalid ports abort startup."
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc.listen_port <= MIN_LISTEN_PORT {
            return Err(ConfigError::InvalidPort {
                port: self.rpc.listen_port,
            });
        }
        if self.metrics.listen_port <= MIN_LISTEN_PORT {
            return Err(ConfigError::InvalidPort {
                port: self.metrics.listen_port,
            });
        }
        if self.chain.chain_id.is_empty() {
            return Err(ConfigError::EmptyChainId);
        }
        if self.rpc.thread_count == 0 {
            return Err(ConfigError::ZeroThreadCount);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        GatewayConfig::default().validate().unwrap();
    }

    #[test]
    fn parses_full_toml() {
        let toml_str = r#"
            [rpc]
            listen_ip = "0.0.0.0"
            listen_port = 20200
            thread_count = 4

            [chain]
            chain_id = "chain0"

            [amop]
            gossip_interval_ms = 2000

            [group]
            liveness_sweep_interval_ms = 10000

            [session]
            default_timeout_ms = 30000
            max_frame_bytes = 10485760

            [eventsub]
            max_blocks_per_loop = 10

            [metrics]
            listen_ip = "0.0.0.0"
            listen_port = 20201
        "#;
        let config = GatewayConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.rpc.listen_port, 20200);
        assert_eq!(config.chain.chain_id, "chain0");
        assert_eq!(config.rpc.thread_count, 4);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let toml_str = r#"
            [chain]
            chain_id = "mychain"
        "#;
        let config = GatewayConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.chain.chain_id, "mychain");
        assert_eq!(config.rpc.listen_port, DEFAULT_LISTEN_PORT);
    }

    #[test]
    fn port_at_boundary_is_rejected() {
        let mut config = GatewayConfig::default();
        config.rpc.listen_port = MIN_LISTEN_PORT;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPort { port }) if port == MIN_LISTEN_PORT
        ));
    }

    #[test]
    fn port_just_above_boundary_is_accepted() {
        let mut config = GatewayConfig::default();
        config.rpc.listen_port = MIN_LISTEN_PORT + 1;
        config.metrics.listen_port = MIN_LISTEN_PORT + 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn max_valid_port_is_accepted() {
        let mut config = GatewayConfig::default();
        config.rpc.listen_port = 65535;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_chain_id_is_rejected() {
        let mut config = GatewayConfig::default();
        config.chain.chain_id.clear();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyChainId)));
    }

    #[test]
    fn zero_thread_count_is_rejected() {
        let mut config = GatewayConfig::default();
        config.rpc.thread_count = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroThreadCount)
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = GatewayConfig::from_toml_str("not valid = = toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn amop_peers_parse_as_a_list() {
        let toml_str = r#"
            [amop]
            peers = ["10.0.0.1:20200", "10.0.0.2:20200"]
        "#;
        let config = GatewayConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.amop.peers, vec!["10.0.0.1:20200", "10.0.0.2:20200"]);
    }

    #[test]
    fn group_bootstrap_parses_nodes_and_deploy_info() {
        let toml_str = r#"
            [[group.bootstrap]]
            group_id = "group0"

            [[group.bootstrap.nodes]]
            node_name = "node0"
            deploy_info = { ledger = "127.0.0.1:9001", txpool = "127.0.0.1:9002" }
        "#;
        let config = GatewayConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.group.bootstrap.len(), 1);
        let group = &config.group.bootstrap[0];
        assert_eq!(group.group_id, "group0");
        assert_eq!(group.status, "running");
        assert_eq!(group.nodes.len(), 1);
        assert_eq!(group.nodes[0].deploy_info.get("ledger").unwrap(), "127.0.0.1:9001");
    }
}
