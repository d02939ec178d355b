//! mandi, a soft-state discovery service for cluster joins.
//!
//! It is NOT authoritative and NOT part of consensus correctness: losing it
//! pauses leader lookup and new joins, nothing else. Nodes talk to it through
//! [`DiscoveryClient`]; the registry itself ships as the `pyaz-mandi` binary.

mod client;
mod http;
mod registry;

pub use client::DiscoveryClient;
pub use http::router;
pub use registry::{Registry, JOIN_REQUEST_TTL, LEADER_TTL, SWEEP_INTERVAL};

use std::sync::Arc;

use tokio::task::JoinHandle;

/// Evict expired records on a fixed cadence.
pub fn spawn_sweeper(registry: Arc<Registry>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            registry.sweep();
        }
    })
}
