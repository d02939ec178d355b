use std::collections::BTreeMap;

/// Stable node identity, unique within a cluster.
pub type NodeId = String;

/// Whether a cluster member participates in quorum decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Suffrage {
    Voter,
    Nonvoter,
}

/// A single cluster member as recorded in the replicated configuration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Server {
    /// Consensus-transport address (host:port).
    pub addr: String,
    pub suffrage: Suffrage,
}

/// The cluster membership configuration, replicated through the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Membership {
    pub servers: BTreeMap<NodeId, Server>,
}

impl Membership {
    /// A single-member configuration with one voter, used at bootstrap.
    pub fn single(id: impl Into<NodeId>, addr: impl Into<String>) -> Self {
        let mut servers = BTreeMap::new();
        servers.insert(id.into(), Server { addr: addr.into(), suffrage: Suffrage::Voter });
        Membership { servers }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.servers.contains_key(id)
    }

    pub fn is_voter(&self, id: &str) -> bool {
        matches!(self.servers.get(id), Some(s) if s.suffrage == Suffrage::Voter)
    }

    /// Ids of all voting members.
    pub fn voter_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.servers
            .iter()
            .filter(|(_, s)| s.suffrage == Suffrage::Voter)
            .map(|(id, _)| id)
    }

    /// Votes needed to win an election or commit an entry.
    pub fn quorum(&self) -> usize {
        self.voter_ids().count() / 2 + 1
    }
}

/// Leader record held by the discovery registry.
///
/// Written by the current leader every publish tick; expires after the
/// registry's leader TTL. Timestamps are unix milliseconds, stamped by the
/// registry on write.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LeaderRecord {
    pub id: NodeId,
    /// Consensus-transport address.
    pub addr: String,
    pub http_addr: String,
    pub grpc_addr: String,
    pub term: u64,
    #[serde(default)]
    pub updated_at: i64,
}

/// Pending join request held by the discovery registry.
///
/// Posted by a node that has not yet been admitted; removed by the leader
/// after promotion, or expired by the registry sweeper.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct JoinRequest {
    pub id: NodeId,
    /// Consensus-transport address.
    pub addr: String,
    #[serde(default)]
    pub started_at: i64,
}

#[derive(thiserror::Error, Debug)]
pub enum PyazError {
    #[error("key not found")]
    NotFound,
    #[error("not the leader; hint: {leader:?}")]
    NotLeader { leader: Option<String> },
    #[error("operation timed out")]
    Timeout,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("consensus error: {0}")]
    Consensus(String),
    #[error("discovery error: {0}")]
    Discovery(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, PyazError>;
