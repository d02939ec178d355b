use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use openraft::error::{ClientWriteError, RaftError};
use openraft::storage::Adaptor;
use openraft::{ChangeMembers, Raft, RaftMetrics, RaftNetworkFactory, ServerState};
use tokio::sync::watch;

use pyaz_storage::LogStore;
use pyaz_types::{Membership, PyazError, Result, Server, Suffrage};

use crate::store::Adapter;
use crate::{raft_node_id, NodeInfo, RaftConfig, RaftNodeId, StateMachine, TypeConfig};

fn consensus_err(e: impl std::fmt::Display) -> PyazError {
    PyazError::Consensus(e.to_string())
}

/// A proposal or membership change refused because this node is not the
/// leader surfaces with the leader's consensus address as a hint.
fn write_error(e: RaftError<RaftNodeId, ClientWriteError<RaftNodeId, NodeInfo>>) -> PyazError {
    match e {
        RaftError::APIError(ClientWriteError::ForwardToLeader(fwd)) => {
            PyazError::NotLeader { leader: fwd.leader_node.map(|n| n.addr) }
        }
        other => consensus_err(other),
    }
}

/// Cloneable handle to a running consensus node.
///
/// Wraps [`openraft::Raft`]: elections, replication, and membership belong
/// to the library; this handle maps its surface onto the store's string node
/// ids and error vocabulary.
#[derive(Clone)]
pub struct Consensus {
    raft: Raft<TypeConfig>,
}

impl Consensus {
    /// Wire the storage adapter into the library and start the node.
    pub async fn start<S, M, NF>(
        id: &str,
        config: RaftConfig,
        store: Arc<S>,
        fsm: Arc<M>,
        network: NF,
    ) -> Result<Consensus>
    where
        S: LogStore,
        M: StateMachine,
        NF: RaftNetworkFactory<TypeConfig>,
    {
        let config = Arc::new(config.validate().map_err(consensus_err)?);
        let (log_store, state_machine) = Adaptor::new(Adapter::new(store, fsm));
        let raft = Raft::new(raft_node_id(id), config, network, log_store, state_machine)
            .await
            .map_err(consensus_err)?;
        Ok(Consensus { raft })
    }

    /// The underlying library handle, used by the RPC surface to feed
    /// inbound consensus messages in.
    pub fn raw(&self) -> &Raft<TypeConfig> {
        &self.raft
    }

    /// Observable engine state, published on every transition. May be stale
    /// by the time it is read.
    pub fn metrics(&self) -> watch::Receiver<RaftMetrics<RaftNodeId, NodeInfo>> {
        self.raft.metrics()
    }

    pub fn server_state(&self) -> ServerState {
        self.raft.metrics().borrow().state
    }

    pub fn is_leader(&self) -> bool {
        self.server_state() == ServerState::Leader
    }

    pub fn current_term(&self) -> u64 {
        self.raft.metrics().borrow().current_term
    }

    /// The current leader's consensus-transport address, if one is known.
    pub fn leader_addr(&self) -> Option<String> {
        let metrics = self.raft.metrics();
        let m = metrics.borrow();
        let leader = m.current_leader?;
        m.membership_config.membership().get_node(&leader).map(|n| n.addr.clone())
    }

    /// The membership currently in force, keyed by configured node-id
    /// strings.
    pub fn configuration(&self) -> Membership {
        let metrics = self.raft.metrics();
        let m = metrics.borrow();
        let membership = m.membership_config.membership();
        let voters: BTreeSet<RaftNodeId> = membership.voter_ids().collect();
        let mut servers = BTreeMap::new();
        for (nid, node) in membership.nodes() {
            let suffrage =
                if voters.contains(nid) { Suffrage::Voter } else { Suffrage::Nonvoter };
            servers.insert(node.id.clone(), Server { addr: node.addr.clone(), suffrage });
        }
        Membership { servers }
    }

    /// Propose a command and wait until it is committed and applied, bounded
    /// by `timeout`. On [`PyazError::Timeout`] the caller must not assume
    /// either success or failure; commands are expected to be idempotent and
    /// safe to retry.
    pub async fn apply(&self, command: Vec<u8>, timeout: Duration) -> Result<u64> {
        match tokio::time::timeout(timeout, self.raft.client_write(command)).await {
            Err(_) => Err(PyazError::Timeout),
            Ok(Ok(resp)) => Ok(resp.log_id.index),
            Ok(Err(e)) => Err(write_error(e)),
        }
    }

    /// Write the initial single-member configuration. Valid only on a node
    /// with no persisted consensus state.
    pub async fn bootstrap(&self, id: &str, addr: &str) -> Result<()> {
        let mut nodes = BTreeMap::new();
        nodes.insert(raft_node_id(id), NodeInfo { id: id.to_string(), addr: addr.to_string() });
        self.raft.initialize(nodes).await.map_err(consensus_err)
    }

    /// Add `id` as a non-voting replica. Leader only; acknowledged once the
    /// configuration entry commits (catch-up runs in the background).
    pub async fn add_nonvoter(&self, id: &str, addr: &str, timeout: Duration) -> Result<()> {
        let node = NodeInfo { id: id.to_string(), addr: addr.to_string() };
        match tokio::time::timeout(
            timeout,
            self.raft.add_learner(raft_node_id(id), node, false),
        )
        .await
        {
            Err(_) => Err(PyazError::Timeout),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(write_error(e)),
        }
    }

    /// Promote `id` to a voting member. Leader only.
    pub async fn promote_to_voter(&self, id: &str, addr: &str, timeout: Duration) -> Result<()> {
        let mut voters = BTreeMap::new();
        voters.insert(raft_node_id(id), NodeInfo { id: id.to_string(), addr: addr.to_string() });
        match tokio::time::timeout(
            timeout,
            self.raft.change_membership(ChangeMembers::AddVoters(voters), false),
        )
        .await
        {
            Err(_) => Err(PyazError::Timeout),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(write_error(e)),
        }
    }

    /// Remove `id` from the cluster. Leader only.
    pub async fn remove_server(&self, id: &str, timeout: Duration) -> Result<()> {
        let nid = raft_node_id(id);
        let ids: BTreeSet<RaftNodeId> = [nid].into_iter().collect();
        let change = if self.configuration().is_voter(id) {
            ChangeMembers::RemoveVoters(ids)
        } else {
            ChangeMembers::RemoveNodes(ids)
        };
        match tokio::time::timeout(timeout, self.raft.change_membership(change, false)).await {
            Err(_) => Err(PyazError::Timeout),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(write_error(e)),
        }
    }

    /// Stop the node. In-flight proposals observe an error; an
    /// already-replicated entry may still commit cluster-wide.
    pub async fn shutdown(&self) {
        let _ = self.raft.shutdown().await;
    }
}
