//! The JSON-RPC method table: which service category each blockchain
//! method forwards to. The method bodies themselves are external
//! collaborators (ledger/scheduler/txpool/consensus/sync clients); this
//! file fixes only the routing.

/// Which of a node's service bundle handles a given blockchain method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCategory {
    Ledger,
    Scheduler,
    TxPool,
    Consensus,
    Sync,
}

/// Returns the service category a blockchain-specific method routes to, or
/// `None` if `method` isn't in the table (group-management methods and
/// unknown methods both return `None` — the caller distinguishes them).
pub fn service_category_for(method: &str) -> Option<ServiceCategory> {
    match method {
        "getTransaction"
        | "getTransactionReceipt"
        | "getBlockByHash"
        | "getBlockByNumber"
        | "getBlockHashByNumber"
        | "getBlockNumber"
        | "getCode"
        | "getSystemConfigByKey"
        | "getTotalTransactionCount" => Some(ServiceCategory::Ledger),

        "call" => Some(ServiceCategory::Scheduler),

        "sendTransaction" | "getPendingTxSize" => Some(ServiceCategory::TxPool),

        "getSealerList" | "getObserverList" | "getPbftView" => Some(ServiceCategory::Consensus),

        "getSyncStatus" | "getPeers" | "getNodeInfo" => Some(ServiceCategory::Sync),

        _ => None,
    }
}

/// Group-management methods, handled directly against the group manager
/// rather than forwarded to a node service.
pub const GROUP_MANAGEMENT_METHODS: &[&str] = &["getGroupList", "getGroupInfo", "getGroupInfoList", "getGroupNodeInfo"];
