//! Consensus for PyazDB, built on [`openraft`].
//!
//! The library owns elections, replication, and membership changes; this
//! crate is the integration shim around it: the type configuration, the
//! storage adapter bridging openraft onto [`pyaz_storage::LogStore`], and the
//! [`Consensus`] handle exposing role/term/leader observation, bounded
//! proposals, and the non-voter/promotion membership surface.

mod handle;
mod store;

pub use handle::Consensus;
pub use store::Adapter;

pub use openraft::{Config as RaftConfig, ServerState, SnapshotPolicy};

use std::future::Future;

use pyaz_types::Result;

/// The numeric node id the consensus library keys on.
pub type RaftNodeId = u64;

/// Cluster member info carried inside the replicated membership config. The
/// configured string identity rides along so it can be recovered from any
/// membership snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeInfo {
    pub id: String,
    /// Consensus-transport address (host:port).
    pub addr: String,
}

openraft::declare_raft_types!(
    /// Type configuration: commands are opaque encoded bytes owned by the
    /// state machine.
    pub TypeConfig:
        D = Vec<u8>,
        R = (),
        NodeId = RaftNodeId,
        Node = NodeInfo,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = std::io::Cursor<Vec<u8>>,
        AsyncRuntime = openraft::TokioRuntime,
);

/// Stable mapping from a configured node-id string to [`RaftNodeId`]
/// (FNV-1a, identical on every node and across restarts).
pub fn raft_node_id(id: &str) -> RaftNodeId {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Engine timing tuned for a LAN cluster. Snapshots are never scheduled; the
/// log is the durable state and is replayed in full after a restart.
pub fn default_raft_config() -> RaftConfig {
    RaftConfig {
        cluster_name: "pyazdb".to_string(),
        heartbeat_interval: 2_000,
        election_timeout_min: 3_000,
        election_timeout_max: 4_500,
        snapshot_policy: SnapshotPolicy::Never,
        ..Default::default()
    }
}

/// The state machine the consensus layer drives.
///
/// `apply` is invoked exactly once per committed command entry, in log
/// order, and must be deterministic. Command bytes are opaque here; the
/// state machine owns their encoding. `snapshot`/`restore` serialize and
/// replace the full state for snapshot transfer.
pub trait StateMachine: Send + Sync + 'static {
    fn apply(&self, index: u64, command: &[u8]) -> impl Future<Output = Result<()>> + Send;

    fn snapshot(&self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn restore(&self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raft_node_id_is_stable_and_distinct() {
        assert_eq!(raft_node_id("n1"), raft_node_id("n1"));
        assert_ne!(raft_node_id("n1"), raft_node_id("n2"));
    }

    #[test]
    fn default_config_validates() {
        assert!(default_raft_config().validate().is_ok());
    }
}
