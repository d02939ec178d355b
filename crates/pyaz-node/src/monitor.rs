use std::time::Duration;

use pyaz_discovery::DiscoveryClient;
use pyaz_raft::{Consensus, ServerState};
use pyaz_types::LeaderRecord;

const PUBLISH_INTERVAL: Duration = Duration::from_secs(2);
const JOIN_DRAIN_INTERVAL: Duration = Duration::from_secs(3);
/// Wait after adding a non-voter so initial log catch-up can happen before
/// the promotion is proposed.
const CATCH_UP_DELAY: Duration = Duration::from_secs(2);
const MEMBERSHIP_TIMEOUT: Duration = Duration::from_secs(10);

/// The addresses this node would publish if it became leader.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub id: String,
    pub raft_addr: String,
    pub http_addr: String,
    pub grpc_addr: String,
}

/// The leader monitor: idles until this node wins an election, then runs the
/// leader duties (publish the leader record, drain the join queue) until
/// leadership is lost. All registry interactions are best effort; a failed
/// tick is absorbed by the next one.
pub async fn run(raft: Consensus, discovery: DiscoveryClient, identity: NodeIdentity) {
    let mut watch = raft.metrics();
    loop {
        while watch.borrow().state != ServerState::Leader {
            if watch.changed().await.is_err() {
                return;
            }
        }
        tracing::info!(id = %identity.id, "became leader, starting leader duties");
        run_leader_duties(&raft, &discovery, &identity).await;
        tracing::info!(id = %identity.id, "lost leadership, waiting for next election");
    }
}

async fn run_leader_duties(
    raft: &Consensus,
    discovery: &DiscoveryClient,
    identity: &NodeIdentity,
) {
    let mut publish = tokio::time::interval(PUBLISH_INTERVAL);
    let mut drain = tokio::time::interval(JOIN_DRAIN_INTERVAL);
    loop {
        if !raft.is_leader() {
            return;
        }
        tokio::select! {
            _ = publish.tick() => {
                if let Err(e) = publish_leader(raft, discovery, identity).await {
                    tracing::debug!(error = %e, "leader record publish failed");
                }
            }
            _ = drain.tick() => {
                drain_joins(raft, discovery, identity).await;
            }
        }
    }
}

async fn publish_leader(
    raft: &Consensus,
    discovery: &DiscoveryClient,
    identity: &NodeIdentity,
) -> pyaz_types::Result<()> {
    let record = LeaderRecord {
        id: identity.id.clone(),
        addr: identity.raft_addr.clone(),
        http_addr: rewrite_wildcard(&identity.http_addr, &identity.raft_addr),
        grpc_addr: rewrite_wildcard(&identity.grpc_addr, &identity.raft_addr),
        term: raft.current_term(),
        updated_at: 0,
    };
    discovery.put_leader(&record).await
}

async fn drain_joins(raft: &Consensus, discovery: &DiscoveryClient, identity: &NodeIdentity) {
    let joins = match discovery.list_joins().await {
        Ok(joins) => joins,
        Err(e) => {
            tracing::debug!(error = %e, "listing join requests failed");
            return;
        }
    };
    for join in joins {
        if join.id == identity.id {
            continue;
        }
        tracing::info!(peer = %join.id, addr = %join.addr, "adding non-voter");
        if let Err(e) = raft.add_nonvoter(&join.id, &join.addr, MEMBERSHIP_TIMEOUT).await {
            tracing::warn!(peer = %join.id, error = %e, "failed to add non-voter");
            continue;
        }

        tokio::time::sleep(CATCH_UP_DELAY).await;

        if let Err(e) = raft.promote_to_voter(&join.id, &join.addr, MEMBERSHIP_TIMEOUT).await {
            // Leave the join request in place so a later tick retries.
            tracing::warn!(peer = %join.id, error = %e, "failed to promote to voter");
            continue;
        }
        if let Err(e) = discovery.delete_join(&join.id).await {
            tracing::debug!(peer = %join.id, error = %e, "failed to delete join request");
        }
        tracing::info!(peer = %join.id, "promoted to voter");
    }
}

/// Request-surface addresses bound to a wildcard are not dialable by other
/// hosts; rewrite them with the host of the consensus-transport address.
pub fn rewrite_wildcard(addr: &str, raft_addr: &str) -> String {
    let host = raft_addr.rsplit_once(':').map(|(host, _)| host).unwrap_or("localhost");
    let host = if host.is_empty() { "localhost" } else { host };
    if let Some(port) = addr.strip_prefix(':') {
        return format!("{host}:{port}");
    }
    if let Some(port) = addr.strip_prefix("0.0.0.0:") {
        return format!("{host}:{port}");
    }
    addr.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_addresses_inherit_the_consensus_host() {
        assert_eq!(rewrite_wildcard(":8080", "pyazdb-node1:12000"), "pyazdb-node1:8080");
        assert_eq!(
            rewrite_wildcard("0.0.0.0:8080", "pyazdb-node1:12000"),
            "pyazdb-node1:8080"
        );
    }

    #[test]
    fn qualified_addresses_pass_through() {
        assert_eq!(rewrite_wildcard("10.0.0.5:8080", "pyazdb-node1:12000"), "10.0.0.5:8080");
        assert_eq!(rewrite_wildcard("kv.internal:80", "node1:12000"), "kv.internal:80");
    }

    #[test]
    fn degenerate_consensus_addr_falls_back_to_localhost() {
        assert_eq!(rewrite_wildcard(":8080", ":12000"), "localhost:8080");
        assert_eq!(rewrite_wildcard(":8080", "nohost"), "localhost:8080");
    }
}
