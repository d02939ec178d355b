use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use pyaz_discovery::DiscoveryClient;
use pyaz_kv::{InstrumentedStore, MemStore, RaftStore};
use pyaz_raft::{Consensus, RaftConfig};
use pyaz_server::{
    serve_grpc, serve_http, serve_raft, GrpcRaftNetworkFactory, KvContext, NodeStore,
};
use pyaz_storage::SledLogStore;

use crate::config::NodeConfig;
use crate::monitor::NodeIdentity;
use crate::{join, monitor};

/// A running node: the consensus handle, the instrumented store, and the
/// actual bound addresses (useful when the configuration asked for port 0).
pub struct NodeHandle {
    pub raft: Consensus,
    pub store: Arc<NodeStore>,
    pub raft_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub grpc_addr: SocketAddr,
    http_task: JoinHandle<anyhow::Result<()>>,
    grpc_task: JoinHandle<anyhow::Result<()>>,
    raft_task: JoinHandle<anyhow::Result<()>>,
}

impl NodeHandle {
    /// Block until any server task exits.
    pub async fn wait(self) -> anyhow::Result<()> {
        let (http, grpc, raft) =
            tokio::try_join!(self.http_task, self.grpc_task, self.raft_task)?;
        http?;
        grpc?;
        raft?;
        Ok(())
    }

    /// Stop the consensus node and the server tasks.
    pub async fn shutdown(&self) {
        self.raft.shutdown().await;
        self.http_task.abort();
        self.grpc_task.abort();
        self.raft_task.abort();
    }
}

/// Assemble and start a node: storage, store stack, consensus (two-phase
/// with the store), request surfaces, and the cluster-lifecycle loops.
pub async fn start(config: NodeConfig, raft_config: RaftConfig) -> anyhow::Result<NodeHandle> {
    let raft_listener = bind(&config.raft_addr).await?;
    let http_listener = bind(&config.http_addr).await?;
    let grpc_listener = bind(&config.grpc_addr).await?;
    let raft_bound = raft_listener.local_addr()?;
    let http_bound = http_listener.local_addr()?;
    let grpc_bound = grpc_listener.local_addr()?;

    let advertised_raft = advertised_addr(&config.raft_addr, raft_bound);

    let log_store = Arc::new(
        SledLogStore::open(&config.raft_data).context("failed to open consensus storage")?,
    );
    let fresh = !log_store.has_existing_state().context("failed to inspect consensus storage")?;

    let mem = Arc::new(MemStore::new());
    let raft_store = Arc::new(RaftStore::new(mem));
    let network = GrpcRaftNetworkFactory::new();
    let raft = Consensus::start(
        &config.node_id,
        raft_config,
        log_store,
        raft_store.clone(),
        network,
    )
    .await?;
    raft_store.attach_engine(raft.clone())?;

    if config.raft_leader {
        if fresh {
            raft.bootstrap(&config.node_id, &advertised_raft).await?;
            tracing::info!(id = %config.node_id, "cluster bootstrapped");
        } else {
            tracing::info!(id = %config.node_id, "existing state found, skipping bootstrap");
        }
    }

    let store: Arc<NodeStore> = Arc::new(InstrumentedStore::new(raft_store));
    let discovery = DiscoveryClient::new(&config.mandi_addr)?;
    let ctx = KvContext::new(store.clone(), raft.clone(), discovery.clone())?;

    let raft_task = tokio::spawn(serve_raft(raft_listener, raft.clone()));
    let grpc_task = tokio::spawn(serve_grpc(grpc_listener, ctx.clone()));
    let http_task = tokio::spawn(serve_http(http_listener, ctx));

    let identity = NodeIdentity {
        id: config.node_id.clone(),
        raft_addr: advertised_raft.clone(),
        http_addr: advertised_addr(&config.http_addr, http_bound),
        grpc_addr: advertised_addr(&config.grpc_addr, grpc_bound),
    };
    tokio::spawn(monitor::run(raft.clone(), discovery.clone(), identity));
    if !config.raft_leader {
        tokio::spawn(join::run(
            raft.clone(),
            discovery,
            config.node_id.clone(),
            advertised_raft,
        ));
    }

    Ok(NodeHandle {
        raft,
        store,
        raft_addr: raft_bound,
        http_addr: http_bound,
        grpc_addr: grpc_bound,
        http_task,
        grpc_task,
        raft_task,
    })
}

/// Bind an address, accepting the `:port` shorthand for a wildcard host.
async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    let addr = if addr.starts_with(':') { format!("0.0.0.0{addr}") } else { addr.to_string() };
    TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))
}

/// The address other processes should dial: the configured host (which may be
/// a DNS name) with the actually-bound port substituted when the
/// configuration asked for port 0.
fn advertised_addr(configured: &str, bound: SocketAddr) -> String {
    let (host, port) = configured.rsplit_once(':').unwrap_or((configured, ""));
    let host = match host {
        "" | "0.0.0.0" => "127.0.0.1",
        other => other,
    };
    let port = match port.parse::<u16>() {
        Ok(0) | Err(_) => bound.port(),
        Ok(p) => p,
    };
    format!("{host}:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertised_addr_substitutes_bound_port() {
        let bound: SocketAddr = "127.0.0.1:43512".parse().unwrap();
        assert_eq!(advertised_addr("127.0.0.1:0", bound), "127.0.0.1:43512");
        assert_eq!(advertised_addr("node1:12000", bound), "node1:12000");
        assert_eq!(advertised_addr(":8080", bound), "127.0.0.1:8080");
        assert_eq!(advertised_addr("0.0.0.0:0", bound), "127.0.0.1:43512");
    }
}
