use std::sync::Arc;

use anyhow::Context;

use pyaz_discovery::{router, spawn_sweeper, Registry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut addr = std::env::var("MANDI_ADDR").unwrap_or_else(|_| ":7000".to_string());
    if addr.starts_with(':') {
        addr = format!("0.0.0.0{addr}");
    }

    let registry = Arc::new(Registry::new());
    spawn_sweeper(registry.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "mandi listening");
    axum::serve(listener, router(registry)).await.context("mandi server failed")?;
    Ok(())
}
