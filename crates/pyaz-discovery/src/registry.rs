use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pyaz_types::{JoinRequest, LeaderRecord, NodeId};

pub const LEADER_TTL: Duration = Duration::from_secs(10);
pub const JOIN_REQUEST_TTL: Duration = Duration::from_secs(30);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

struct Inner {
    leader: Option<LeaderRecord>,
    joins: HashMap<NodeId, JoinRequest>,
}

/// Process-wide soft state: one leader-record slot and the pending join
/// requests, each bounded by a TTL. Everything serializes on a single lock;
/// contention is negligible for this traffic.
pub struct Registry {
    inner: Mutex<Inner>,
    leader_ttl: Duration,
    join_ttl: Duration,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_ttls(LEADER_TTL, JOIN_REQUEST_TTL)
    }

    pub fn with_ttls(leader_ttl: Duration, join_ttl: Duration) -> Self {
        Registry {
            inner: Mutex::new(Inner { leader: None, joins: HashMap::new() }),
            leader_ttl,
            join_ttl,
        }
    }

    /// The current leader record, unless it has gone stale.
    pub fn get_leader(&self) -> Option<LeaderRecord> {
        let g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.leader
            .as_ref()
            .filter(|rec| !expired(rec.updated_at, self.leader_ttl))
            .cloned()
    }

    /// Replace the leader slot, stamping `updated_at`. Idempotent.
    pub fn put_leader(&self, mut record: LeaderRecord) {
        record.updated_at = now_ms();
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.leader = Some(record);
    }

    /// Upsert a join request by node id. `started_at` is stamped on first
    /// insert only; a refresh keeps the original timestamp so the TTL bounds
    /// the entry's total lifetime.
    pub fn post_join(&self, mut request: JoinRequest) {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        request.started_at = match g.joins.get(&request.id) {
            Some(existing) => existing.started_at,
            None => now_ms(),
        };
        g.joins.insert(request.id.clone(), request);
    }

    /// All non-expired join requests, in unspecified order.
    pub fn list_joins(&self) -> Vec<JoinRequest> {
        let g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.joins
            .values()
            .filter(|req| !expired(req.started_at, self.join_ttl))
            .cloned()
            .collect()
    }

    /// Idempotent.
    pub fn delete_join(&self, id: &str) {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.joins.remove(id);
    }

    /// Evict the leader record and any join requests past their TTL.
    pub fn sweep(&self) {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if g.leader.as_ref().is_some_and(|rec| expired(rec.updated_at, self.leader_ttl)) {
            g.leader = None;
        }
        let join_ttl = self.join_ttl;
        g.joins.retain(|_, req| !expired(req.started_at, join_ttl));
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn expired(stamp_ms: i64, ttl: Duration) -> bool {
    now_ms().saturating_sub(stamp_ms) > ttl.as_millis() as i64
}
