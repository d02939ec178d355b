use tonic::{Request, Response, Status};

use pyaz_kv::KvStore;
use pyaz_proto::v1 as pb;
use pyaz_proto::v1::kv_service_client::KvServiceClient;
use pyaz_proto::v1::kv_service_server::KvService;
use pyaz_types::PyazError;

use crate::KvContext;

type GrpcResult<T> = std::result::Result<Response<T>, Status>;

/// The binary request surface. Validates, checks the local role, and either
/// serves from the replicated store or forwards to the leader's gRPC surface
/// over an insecure client connection.
pub struct KvServiceImpl {
    ctx: KvContext,
}

impl KvServiceImpl {
    pub fn new(ctx: KvContext) -> Self {
        KvServiceImpl { ctx }
    }

    fn is_leader(&self) -> bool {
        self.ctx.raft.is_leader()
    }

    /// The leader's gRPC surface address, per the discovery registry.
    async fn leader_grpc_addr(&self) -> Option<String> {
        match self.ctx.discovery.get_leader().await {
            Ok(Some(record)) => Some(record.grpc_addr),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(error = %e, "leader lookup failed");
                None
            }
        }
    }

    async fn leader_client(&self) -> std::result::Result<KvServiceClient<tonic::transport::Channel>, Status> {
        let Some(addr) = self.leader_grpc_addr().await else {
            return Err(Status::unavailable("not leader and no leader known"));
        };
        KvServiceClient::connect(format!("http://{addr}"))
            .await
            .map_err(|e| Status::unavailable(format!("cannot connect to leader: {e}")))
    }
}

#[tonic::async_trait]
impl KvService for KvServiceImpl {
    async fn get(&self, request: Request<pb::GetRequest>) -> GrpcResult<pb::GetResponse> {
        let req = request.into_inner();
        if req.key.is_empty() {
            return Err(Status::invalid_argument("key is required"));
        }
        if !self.is_leader() {
            let mut client = self.leader_client().await?;
            return client.get(req).await;
        }
        let value = self.ctx.store.get(&req.key).await.map_err(internal)?;
        Ok(Response::new(pb::GetResponse {
            found: value.is_some(),
            value: value.unwrap_or_default(),
        }))
    }

    async fn set(&self, request: Request<pb::SetRequest>) -> GrpcResult<pb::SetResponse> {
        let req = request.into_inner();
        if req.key.is_empty() {
            return Err(Status::invalid_argument("key is required"));
        }
        if !self.is_leader() {
            let mut client = self.leader_client().await?;
            return client.set(req).await;
        }
        match self.ctx.store.set(&req.key, &req.value).await {
            Ok(()) => Ok(Response::new(pb::SetResponse { success: true })),
            // Leadership flipped between the role check and the proposal;
            // retry the lookup once and forward.
            Err(PyazError::NotLeader { .. }) => {
                let mut client = self.leader_client().await?;
                client.set(req).await
            }
            Err(PyazError::Timeout) => Err(Status::unavailable("proposal timed out")),
            Err(_) => Err(Status::internal("failed to set key")),
        }
    }

    async fn delete(&self, request: Request<pb::DeleteRequest>) -> GrpcResult<pb::DeleteResponse> {
        let req = request.into_inner();
        if req.key.is_empty() {
            return Err(Status::invalid_argument("key is required"));
        }
        if !self.is_leader() {
            let mut client = self.leader_client().await?;
            return client.delete(req).await;
        }
        match self.ctx.store.delete(&req.key).await {
            Ok(()) => Ok(Response::new(pb::DeleteResponse { success: true })),
            Err(PyazError::NotLeader { .. }) => {
                let mut client = self.leader_client().await?;
                client.delete(req).await
            }
            Err(PyazError::Timeout) => Err(Status::unavailable("proposal timed out")),
            Err(_) => Err(Status::internal("failed to delete key")),
        }
    }
}

fn internal(e: PyazError) -> Status {
    Status::internal(e.to_string())
}
