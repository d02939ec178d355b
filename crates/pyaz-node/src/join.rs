use std::time::Duration;

use pyaz_discovery::DiscoveryClient;
use pyaz_raft::Consensus;

const JOIN_INTERVAL: Duration = Duration::from_secs(2);

/// Announce this node to the discovery registry until the leader has admitted
/// it into the configuration. Admission itself is driven entirely by the
/// leader's join-drain loop; errors here are absorbed and retried.
pub async fn run(raft: Consensus, discovery: DiscoveryClient, id: String, raft_addr: String) {
    let mut ticker = tokio::time::interval(JOIN_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = discovery.post_join(&id, &raft_addr).await {
            tracing::debug!(error = %e, "join announcement failed");
        }
        if raft.configuration().contains(&id) {
            tracing::info!(%id, "joined cluster");
            return;
        }
    }
}
