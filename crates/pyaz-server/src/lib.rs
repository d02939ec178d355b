//! The per-node request surfaces: the text (HTTP) surface, the binary (gRPC)
//! surface, and the inter-node consensus transport. Any node accepts client
//! traffic; non-leaders transparently forward to the current leader.

mod grpc;
mod http;
mod raft_service;

pub use raft_service::{GrpcRaftConnection, GrpcRaftNetworkFactory, RaftServiceImpl};

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic_reflection::server::Builder as ReflectionBuilder;

use pyaz_discovery::DiscoveryClient;
use pyaz_kv::{InstrumentedStore, RaftStore};
use pyaz_proto::v1::kv_service_server::KvServiceServer;
use pyaz_proto::v1::raft_service_server::RaftServiceServer;
use pyaz_raft::Consensus;

use grpc::KvServiceImpl;

/// Bound on a forwarded request to the leader.
pub(crate) const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// The store a node serves: the replicated store behind the metrics facet.
pub type NodeStore = InstrumentedStore<Arc<RaftStore>>;

/// Everything a request handler needs: the store, the consensus node's
/// observable state, the discovery client for leader lookup, and an HTTP
/// client for forwarding.
#[derive(Clone)]
pub struct KvContext {
    pub store: Arc<NodeStore>,
    pub raft: Consensus,
    pub discovery: DiscoveryClient,
    pub(crate) http: reqwest::Client,
}

impl KvContext {
    pub fn new(
        store: Arc<NodeStore>,
        raft: Consensus,
        discovery: DiscoveryClient,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(FORWARD_TIMEOUT).build()?;
        Ok(KvContext { store, raft, discovery, http })
    }
}

/// Serve the text surface on an already-bound listener.
pub async fn serve_http(listener: TcpListener, ctx: KvContext) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "http server starting");
    axum::serve(listener, http::router(ctx)).await.map_err(Into::into)
}

/// Serve the binary surface on an already-bound listener.
pub async fn serve_grpc(listener: TcpListener, ctx: KvContext) -> anyhow::Result<()> {
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(pyaz_proto::FILE_DESCRIPTOR_SET)
        .build_v1()?;
    tracing::info!(addr = %listener.local_addr()?, "grpc server starting");
    tonic::transport::Server::builder()
        .add_service(KvServiceServer::new(KvServiceImpl::new(ctx)))
        .add_service(reflection)
        .serve_with_incoming(TcpListenerStream::new(listener))
        .await
        .map_err(Into::into)
}

/// Serve the inter-node consensus transport on an already-bound listener.
pub async fn serve_raft(listener: TcpListener, raft: Consensus) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "consensus transport starting");
    tonic::transport::Server::builder()
        .add_service(RaftServiceServer::new(RaftServiceImpl::new(raft)))
        .serve_with_incoming(TcpListenerStream::new(listener))
        .await
        .map_err(Into::into)
}
