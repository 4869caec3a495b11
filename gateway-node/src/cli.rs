//! # CLI interface
//!
//! Command-line surface for the gateway binary, using `clap` derive:
//! `run` (start the gateway), `check-config` (validate a config file and
//! exit, useful in CI), and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// BCOS RPC gateway.
///
/// The RPC edge of a blockchain node fleet: terminates HTTP/WebSocket from
/// SDK clients, runs the AMOP pub/sub overlay between gateways, and routes
/// JSON-RPC calls to the group/node registry.
#[derive(Parser, Debug)]
#[command(name = "bcos-rpc-gateway", about = "BCOS RPC gateway", version, propagate_version = true)]
pub struct GatewayCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway.
    Run(RunArgs),
    /// Parse and validate a config file, then exit.
    CheckConfig(CheckConfigArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the gateway configuration file (TOML).
    #[arg(long, short = 'c', env = "GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "GATEWAY_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Default log level when `RUST_LOG` is unset.
    #[arg(long, env = "GATEWAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Parser, Debug)]
pub struct CheckConfigArgs {
    /// Path to the config file to validate.
    #[arg(long, short = 'c')]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_structure_is_valid() {
        GatewayCli::command().debug_assert();
    }
}
