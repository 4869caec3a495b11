// Copyright (c) 2026 BCOS RPC Gateway Contributors. Apache-2.0 License.
// See LICENSE for details.

//! # BCOS RPC Gateway — Core Library
//!
//! The RPC edge of a blockchain node fleet: the bidirectional gateway
//! between external SDK clients and an internal cluster of
//! consensus/ledger/transaction-pool services organized into chains,
//! groups, and nodes. It terminates a dual transport (HTTP request/response
//! plus WebSocket framed messages), dispatches JSON-RPC method calls to an
//! appropriate internal node service selected by liveness and recency, and
//! runs an application-layer pub/sub ("AMOP") overlay that lets any SDK
//! client send or broadcast a message addressed by a topic string to any
//! other SDK client attached to any gateway in the cluster.
//!
//! ## Architecture
//!
//! - **frame** — Binary WebSocket frame codec and the inner AMOP request
//!   envelope (C1).
//! - **session** — A live WebSocket peer: read loop, write queue, correlated
//!   response callbacks with timeouts, and the session registry (C2, C3).
//! - **topic** — Per-client topic subscriptions and the peer gossip view
//!   (C4).
//! - **amop** — The topic-routed messaging overlay: gossip, unicast retry,
//!   broadcast fan-out, and cross-gateway forwarding (C5).
//! - **group** — The chain/group/node service registry and node selection
//!   policy (C6).
//! - **eventsub** — Per-group background workers that scan committed blocks
//!   against filter predicates and push matches to subscribers (C7).
//! - **rpc** — The JSON-RPC dispatcher, method table, handshake, and
//!   server-initiated pushes (C8).
//! - **config** — The gateway's configuration surface (C10).
//!
//! ## Design Philosophy
//!
//! 1. Library code returns typed `Result<T, E>` — `anyhow` stays in the
//!    binary crate's startup path.
//! 2. Shared mutable state lives behind readers-writer locks with snapshot
//!    semantics; no operation holds a lock across a suspension point.
//! 3. Every cross-component callback captures only weak references so that
//!    Sessions, the AMOP engine, and the group manager never form a
//!    reference cycle rooted anywhere but the runtime container.

pub mod amop;
pub mod config;
pub mod eventsub;
pub mod frame;
pub mod group;
pub mod rpc;
pub mod session;
pub mod topic;
