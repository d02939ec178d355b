//! Consensus behavior through the integration shim, driven over an
//! in-process network: elections, replication, membership changes, failover,
//! and restart recovery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use openraft::error::{InstallSnapshotError, NetworkError, RPCError, RaftError, RemoteError};
use openraft::network::RPCOption;
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::{RaftNetwork, RaftNetworkFactory};

use pyaz_raft::{
    raft_node_id, Consensus, NodeInfo, RaftConfig, RaftNodeId, SnapshotPolicy, StateMachine,
    TypeConfig,
};
use pyaz_storage::{MemLogStore, SledLogStore};
use pyaz_types::{PyazError, Suffrage};

/// Routes consensus RPCs to registered nodes. Deregistering a node makes it
/// unreachable, which is how tests partition and kill nodes.
#[derive(Clone, Default)]
struct Router {
    nodes: Arc<Mutex<HashMap<RaftNodeId, Consensus>>>,
}

impl Router {
    fn register(&self, id: &str, consensus: Consensus) {
        self.nodes.lock().unwrap().insert(raft_node_id(id), consensus);
    }

    fn deregister(&self, id: &str) {
        self.nodes.lock().unwrap().remove(&raft_node_id(id));
    }

    fn lookup(&self, target: RaftNodeId) -> Option<Consensus> {
        self.nodes.lock().unwrap().get(&target).cloned()
    }
}

struct Conn {
    target: RaftNodeId,
    router: Router,
}

fn unreachable<E: std::error::Error>(target: RaftNodeId) -> RPCError<RaftNodeId, NodeInfo, E> {
    RPCError::Network(NetworkError::new(&std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        format!("node {target} unreachable"),
    )))
}

impl RaftNetworkFactory<TypeConfig> for Router {
    type Network = Conn;

    async fn new_client(&mut self, target: RaftNodeId, _node: &NodeInfo) -> Conn {
        Conn { target, router: self.clone() }
    }
}

impl RaftNetwork<TypeConfig> for Conn {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        AppendEntriesResponse<RaftNodeId>,
        RPCError<RaftNodeId, NodeInfo, RaftError<RaftNodeId>>,
    > {
        let Some(peer) = self.router.lookup(self.target) else {
            return Err(unreachable(self.target));
        };
        peer.raw()
            .append_entries(rpc)
            .await
            .map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<RaftNodeId>,
        RPCError<RaftNodeId, NodeInfo, RaftError<RaftNodeId, InstallSnapshotError>>,
    > {
        let Some(peer) = self.router.lookup(self.target) else {
            return Err(unreachable(self.target));
        };
        peer.raw()
            .install_snapshot(rpc)
            .await
            .map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<RaftNodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<RaftNodeId>, RPCError<RaftNodeId, NodeInfo, RaftError<RaftNodeId>>>
    {
        let Some(peer) = self.router.lookup(self.target) else {
            return Err(unreachable(self.target));
        };
        peer.raw()
            .vote(rpc)
            .await
            .map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
    }
}

/// Records applied commands for assertions.
#[derive(Default)]
struct TestFsm {
    applied: Mutex<Vec<(u64, String)>>,
}

impl TestFsm {
    fn commands(&self) -> Vec<String> {
        self.applied.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }
}

impl StateMachine for TestFsm {
    async fn apply(&self, index: u64, command: &[u8]) -> pyaz_types::Result<()> {
        self.applied
            .lock()
            .unwrap()
            .push((index, String::from_utf8_lossy(command).into_owned()));
        Ok(())
    }

    async fn snapshot(&self) -> pyaz_types::Result<Vec<u8>> {
        serde_json::to_vec(&*self.applied.lock().unwrap())
            .map_err(|e| PyazError::Storage(e.to_string()))
    }

    async fn restore(&self, data: &[u8]) -> pyaz_types::Result<()> {
        let entries: Vec<(u64, String)> =
            serde_json::from_slice(data).map_err(|e| PyazError::Storage(e.to_string()))?;
        *self.applied.lock().unwrap() = entries;
        Ok(())
    }
}

fn fast_config() -> RaftConfig {
    RaftConfig {
        cluster_name: "pyazdb-test".to_string(),
        heartbeat_interval: 50,
        election_timeout_min: 150,
        election_timeout_max: 300,
        snapshot_policy: SnapshotPolicy::Never,
        ..Default::default()
    }
}

async fn wait_for<F: Fn() -> bool>(cond: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn spawn_node(router: &Router, id: &str) -> (Consensus, Arc<TestFsm>) {
    let fsm = Arc::new(TestFsm::default());
    let consensus = Consensus::start(
        id,
        fast_config(),
        Arc::new(MemLogStore::new()),
        fsm.clone(),
        router.clone(),
    )
    .await
    .unwrap();
    router.register(id, consensus.clone());
    (consensus, fsm)
}

const APPLY: Duration = Duration::from_secs(5);
const MEMBER: Duration = Duration::from_secs(5);

fn addr_of(id: &str) -> String {
    format!("{id}:1")
}

async fn admit(leader: &Consensus, id: &str) {
    leader.add_nonvoter(id, &addr_of(id), MEMBER).await.unwrap();
    leader.promote_to_voter(id, &addr_of(id), MEMBER).await.unwrap();
}

/// Bootstrap n1 and admit n2 and n3 as voters.
async fn three_node_cluster(router: &Router) -> Vec<(Consensus, Arc<TestFsm>)> {
    let (c1, f1) = spawn_node(router, "n1").await;
    c1.bootstrap("n1", &addr_of("n1")).await.unwrap();
    wait_for(|| c1.is_leader(), "n1 leadership").await;

    let (c2, f2) = spawn_node(router, "n2").await;
    let (c3, f3) = spawn_node(router, "n3").await;
    admit(&c1, "n2").await;
    admit(&c1, "n3").await;

    vec![(c1, f1), (c2, f2), (c3, f3)]
}

#[tokio::test(flavor = "multi_thread")]
async fn single_node_bootstrap_elects_and_commits() {
    let router = Router::default();
    let (consensus, fsm) = spawn_node(&router, "n1").await;

    consensus.bootstrap("n1", &addr_of("n1")).await.unwrap();
    wait_for(|| consensus.is_leader(), "leader election").await;

    let index = consensus.apply(b"cmd-1".to_vec(), APPLY).await.unwrap();
    assert!(index > 0);
    assert_eq!(fsm.commands(), vec!["cmd-1".to_string()]);

    assert!(consensus.current_term() >= 1);
    assert_eq!(consensus.leader_addr().as_deref(), Some("n1:1"));
    assert!(consensus.configuration().is_voter("n1"));

    consensus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn bootstrap_requires_pristine_state() {
    let router = Router::default();
    let (consensus, _) = spawn_node(&router, "n1").await;

    consensus.bootstrap("n1", &addr_of("n1")).await.unwrap();
    wait_for(|| consensus.is_leader(), "leader election").await;
    let err = consensus.bootstrap("n1", &addr_of("n1")).await.unwrap_err();
    assert!(matches!(err, PyazError::Consensus(_)));

    consensus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn learner_catches_up_and_is_promoted() {
    let router = Router::default();
    let (c1, _f1) = spawn_node(&router, "n1").await;
    c1.bootstrap("n1", &addr_of("n1")).await.unwrap();
    wait_for(|| c1.is_leader(), "n1 leadership").await;

    for i in 0..5 {
        c1.apply(format!("cmd-{i}").into_bytes(), APPLY).await.unwrap();
    }

    let (c2, f2) = spawn_node(&router, "n2").await;
    c1.add_nonvoter("n2", &addr_of("n2"), MEMBER).await.unwrap();

    // The learner replays the leader's log.
    wait_for(|| f2.commands().len() == 5, "learner catch-up").await;
    assert_eq!(c1.configuration().servers["n2"].suffrage, Suffrage::Nonvoter);

    c1.promote_to_voter("n2", &addr_of("n2"), MEMBER).await.unwrap();
    wait_for(|| c2.configuration().is_voter("n2"), "promotion visible on n2").await;
    assert!(c1.configuration().is_voter("n2"));

    c1.shutdown().await;
    c2.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn followers_reject_proposals_with_leader_hint() {
    let router = Router::default();
    let nodes = three_node_cluster(&router).await;

    let follower = nodes.iter().find(|(c, _)| !c.is_leader()).expect("a follower exists");
    let err = follower.0.apply(b"nope".to_vec(), APPLY).await.unwrap_err();
    match err {
        PyazError::NotLeader { leader } => assert_eq!(leader.as_deref(), Some("n1:1")),
        other => panic!("expected NotLeader, got {other}"),
    }

    for (c, _) in nodes {
        c.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn replicated_writes_reach_every_member() {
    let router = Router::default();
    let nodes = three_node_cluster(&router).await;

    for i in 0..10 {
        nodes[0].0.apply(format!("cmd-{i}").into_bytes(), APPLY).await.unwrap();
    }

    for (_, fsm) in &nodes {
        let fsm = fsm.clone();
        wait_for(|| fsm.commands().len() >= 10, "replication to all members").await;
        assert!(fsm.commands().contains(&"cmd-9".to_string()));
    }

    for (c, _) in nodes {
        c.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn at_most_one_leader_per_term() {
    let router = Router::default();
    let nodes = three_node_cluster(&router).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut leaders_by_term: HashMap<u64, usize> = HashMap::new();
    for (c, _) in &nodes {
        if c.is_leader() {
            *leaders_by_term.entry(c.current_term()).or_default() += 1;
        }
    }
    assert!(leaders_by_term.values().all(|&n| n <= 1));

    for (c, _) in nodes {
        c.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn leader_failover_preserves_committed_writes() {
    let router = Router::default();
    let nodes = three_node_cluster(&router).await;
    let (c1, _) = &nodes[0];

    c1.apply(b"before-failover".to_vec(), APPLY).await.unwrap();

    // Kill the leader.
    router.deregister("n1");
    c1.shutdown().await;

    let survivors: Vec<&(Consensus, Arc<TestFsm>)> = nodes[1..].iter().collect();
    wait_for(|| survivors.iter().any(|(c, _)| c.is_leader()), "new leader election").await;

    let (new_leader, _) = survivors.iter().find(|(c, _)| c.is_leader()).unwrap();
    new_leader.apply(b"after-failover".to_vec(), APPLY).await.unwrap();

    for (_, fsm) in &survivors {
        let fsm = (*fsm).clone();
        wait_for(
            || {
                let cmds = fsm.commands();
                cmds.contains(&"before-failover".to_string())
                    && cmds.contains(&"after-failover".to_string())
            },
            "survivor state",
        )
        .await;
    }

    for (c, _) in &nodes[1..] {
        c.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn partitioned_follower_catches_up_after_heal() {
    let router = Router::default();
    let nodes = three_node_cluster(&router).await;
    let (c1, _) = &nodes[0];
    let (_, f3) = &nodes[2];

    // Partition n3 away from the leader.
    router.deregister("n3");

    for i in 0..100 {
        c1.apply(format!("cmd-{i}").into_bytes(), APPLY).await.unwrap();
    }
    assert!(f3.commands().len() < 100);

    // Heal. Replication walks n3 forward.
    router.register("n3", nodes[2].0.clone());
    let f3 = f3.clone();
    wait_for(|| f3.commands().len() >= 100, "partitioned follower catch-up").await;

    for (c, _) in nodes {
        c.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_replays_log_and_recovers_membership() {
    let dir = tempfile::tempdir().unwrap();
    let router = Router::default();

    {
        let fsm = Arc::new(TestFsm::default());
        let store = Arc::new(SledLogStore::open(dir.path()).unwrap());
        let consensus =
            Consensus::start("n1", fast_config(), store, fsm.clone(), router.clone())
                .await
                .unwrap();
        consensus.bootstrap("n1", &addr_of("n1")).await.unwrap();
        wait_for(|| consensus.is_leader(), "first boot leadership").await;

        for i in 0..3 {
            consensus.apply(format!("cmd-{i}").into_bytes(), APPLY).await.unwrap();
        }
        consensus.shutdown().await;
    }

    // Give the node time to drop its sled handles, then reopen.
    let store = {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match SledLogStore::open(dir.path()) {
                Ok(store) => break store,
                Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => panic!("sled did not release the directory: {e}"),
            }
        }
    };
    assert!(store.has_existing_state().unwrap());

    let fsm = Arc::new(TestFsm::default());
    let consensus =
        Consensus::start("n1", fast_config(), Arc::new(store), fsm.clone(), router.clone())
            .await
            .unwrap();

    // Membership comes back from the log, so the node elects itself again
    // and replays every committed command into the fresh state machine.
    wait_for(|| consensus.is_leader(), "re-election after restart").await;
    assert!(consensus.configuration().is_voter("n1"));
    wait_for(|| fsm.commands().len() == 3, "log replay").await;
    assert_eq!(fsm.commands(), vec!["cmd-0", "cmd-1", "cmd-2"]);

    consensus.shutdown().await;
}
