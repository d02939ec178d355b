use pyaz_node::{start, NodeConfig};
use pyaz_raft::default_raft_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = NodeConfig::load()?;
    tracing::info!(
        node_id = %config.node_id,
        raft_addr = %config.raft_addr,
        http_addr = %config.http_addr,
        grpc_addr = %config.grpc_addr,
        "node starting"
    );

    let handle = start(config, default_raft_config()).await?;
    handle.wait().await
}
