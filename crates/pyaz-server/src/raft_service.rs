use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status};

use openraft::error::{InstallSnapshotError, NetworkError, RPCError, RaftError, RemoteError};
use openraft::network::RPCOption;
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::{RaftNetwork, RaftNetworkFactory};

use pyaz_proto::v1 as pb;
use pyaz_proto::v1::raft_service_client::RaftServiceClient;
use pyaz_proto::v1::raft_service_server::RaftService;
use pyaz_raft::{Consensus, NodeInfo, RaftNodeId, TypeConfig};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

fn decode_req<T: DeserializeOwned>(payload: &[u8]) -> Result<T, Status> {
    serde_json::from_slice(payload).map_err(|e| Status::invalid_argument(e.to_string()))
}

fn encode_reply<T: Serialize>(value: &T) -> Result<Response<pb::RaftMessage>, Status> {
    let payload =
        serde_json::to_vec(value).map_err(|e| Status::internal(e.to_string()))?;
    Ok(Response::new(pb::RaftMessage { payload }))
}

/// Inbound consensus RPCs: decode the payload, hand it to the local node,
/// encode the result (including consensus-level errors) back into the reply
/// payload.
pub struct RaftServiceImpl {
    raft: Consensus,
}

impl RaftServiceImpl {
    pub fn new(raft: Consensus) -> Self {
        RaftServiceImpl { raft }
    }
}

#[tonic::async_trait]
impl RaftService for RaftServiceImpl {
    async fn append_entries(
        &self,
        request: Request<pb::RaftMessage>,
    ) -> Result<Response<pb::RaftMessage>, Status> {
        let rpc: AppendEntriesRequest<TypeConfig> =
            decode_req(&request.into_inner().payload)?;
        let resp = self.raft.raw().append_entries(rpc).await;
        encode_reply(&resp)
    }

    async fn vote(
        &self,
        request: Request<pb::RaftMessage>,
    ) -> Result<Response<pb::RaftMessage>, Status> {
        let rpc: VoteRequest<RaftNodeId> = decode_req(&request.into_inner().payload)?;
        let resp = self.raft.raw().vote(rpc).await;
        encode_reply(&resp)
    }

    async fn install_snapshot(
        &self,
        request: Request<pb::RaftMessage>,
    ) -> Result<Response<pb::RaftMessage>, Status> {
        let rpc: InstallSnapshotRequest<TypeConfig> =
            decode_req(&request.into_inner().payload)?;
        let resp = self.raft.raw().install_snapshot(rpc).await;
        encode_reply(&resp)
    }
}

/// Outbound consensus RPCs over gRPC, with one cached channel per peer
/// shared by all connections. A channel that fails an RPC is dropped so the
/// next attempt redials.
#[derive(Clone, Default)]
pub struct GrpcRaftNetworkFactory {
    channels: Arc<Mutex<HashMap<String, Channel>>>,
}

impl GrpcRaftNetworkFactory {
    pub fn new() -> Self {
        GrpcRaftNetworkFactory { channels: Arc::new(Mutex::new(HashMap::new())) }
    }

    async fn channel(&self, addr: &str) -> Result<Channel, tonic::transport::Error> {
        if let Some(channel) = self.channels.lock().await.get(addr) {
            return Ok(channel.clone());
        }
        let endpoint =
            Endpoint::from_shared(format!("http://{addr}"))?.connect_timeout(CONNECT_TIMEOUT);
        let channel = endpoint.connect().await?;
        self.channels.lock().await.insert(addr.to_string(), channel.clone());
        Ok(channel)
    }

    async fn evict(&self, addr: &str) {
        self.channels.lock().await.remove(addr);
    }
}

impl RaftNetworkFactory<TypeConfig> for GrpcRaftNetworkFactory {
    type Network = GrpcRaftConnection;

    async fn new_client(&mut self, target: RaftNodeId, node: &NodeInfo) -> GrpcRaftConnection {
        GrpcRaftConnection { target, addr: node.addr.clone(), factory: self.clone() }
    }
}

/// A connection to one peer, addressed by its consensus-transport address.
pub struct GrpcRaftConnection {
    target: RaftNodeId,
    addr: String,
    factory: GrpcRaftNetworkFactory,
}

fn net_err<E: std::error::Error>(e: impl std::error::Error + 'static) -> RPCError<RaftNodeId, NodeInfo, E> {
    RPCError::Network(NetworkError::new(&e))
}

impl GrpcRaftConnection {
    async fn client(
        &self,
    ) -> Result<RaftServiceClient<Channel>, tonic::transport::Error> {
        Ok(RaftServiceClient::new(self.factory.channel(&self.addr).await?))
    }

    /// Unpack the reply payload: the remote serializes its full `Result`,
    /// and a remote error is re-raised against `target`.
    fn unpack<Resp, Fail>(
        &self,
        reply: pb::RaftMessage,
    ) -> Result<Resp, RPCError<RaftNodeId, NodeInfo, Fail>>
    where
        Resp: DeserializeOwned,
        Fail: DeserializeOwned + std::error::Error,
    {
        let result: Result<Resp, Fail> =
            serde_json::from_slice(&reply.payload).map_err(net_err)?;
        result.map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
    }
}

impl RaftNetwork<TypeConfig> for GrpcRaftConnection {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        AppendEntriesResponse<RaftNodeId>,
        RPCError<RaftNodeId, NodeInfo, RaftError<RaftNodeId>>,
    > {
        let payload = serde_json::to_vec(&rpc).map_err(net_err)?;
        let mut client = self.client().await.map_err(net_err)?;
        match client.append_entries(pb::RaftMessage { payload }).await {
            Ok(reply) => self.unpack(reply.into_inner()),
            Err(status) => {
                self.factory.evict(&self.addr).await;
                Err(net_err(status))
            }
        }
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<RaftNodeId>,
        RPCError<RaftNodeId, NodeInfo, RaftError<RaftNodeId, InstallSnapshotError>>,
    > {
        let payload = serde_json::to_vec(&rpc).map_err(net_err)?;
        let mut client = self.client().await.map_err(net_err)?;
        match client.install_snapshot(pb::RaftMessage { payload }).await {
            Ok(reply) => self.unpack(reply.into_inner()),
            Err(status) => {
                self.factory.evict(&self.addr).await;
                Err(net_err(status))
            }
        }
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<RaftNodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<RaftNodeId>, RPCError<RaftNodeId, NodeInfo, RaftError<RaftNodeId>>>
    {
        let payload = serde_json::to_vec(&rpc).map_err(net_err)?;
        let mut client = self.client().await.map_err(net_err)?;
        match client.vote(pb::RaftMessage { payload }).await {
            Ok(reply) => self.unpack(reply.into_inner()),
            Err(status) => {
                self.factory.evict(&self.addr).await;
                Err(net_err(status))
            }
        }
    }
}
