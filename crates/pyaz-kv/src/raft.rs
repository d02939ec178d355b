use std::sync::{Arc, OnceLock};
use std::time::Duration;

use pyaz_raft::{Consensus, StateMachine};
use pyaz_types::{PyazError, Result};

use crate::{KvStore, MemStore};

/// Bound on how long a proposal may wait for commit and apply.
const APPLY_TIMEOUT: Duration = Duration::from_secs(10);

pub const OP_SET: &str = "set";
pub const OP_DELETE: &str = "delete";

/// A replicated mutation, JSON-encoded into the consensus log.
///
/// `value` is present iff `op` is a set. Unrecognized `op` values are
/// ignored on apply so newer nodes can replicate entries through older ones.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Command {
    pub op: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Command {
    pub fn set(key: &str, value: &str) -> Self {
        Command { op: OP_SET.into(), key: key.into(), value: Some(value.into()) }
    }

    pub fn delete(key: &str) -> Self {
        Command { op: OP_DELETE.into(), key: key.into(), value: None }
    }
}

/// The replicated store: serializes mutations through the consensus layer
/// and applies committed entries to the in-memory map.
///
/// Constructed in two phases to break the cycle with the consensus node:
/// build the store first (it is the node's state machine), then inject the
/// handle with [`RaftStore::attach_engine`] before accepting proposals.
pub struct RaftStore {
    mem: Arc<MemStore>,
    engine: OnceLock<Consensus>,
}

impl RaftStore {
    pub fn new(mem: Arc<MemStore>) -> Self {
        RaftStore { mem, engine: OnceLock::new() }
    }

    /// Inject the consensus handle. Must be called exactly once, before any
    /// proposal is accepted.
    pub fn attach_engine(&self, consensus: Consensus) -> Result<()> {
        self.engine
            .set(consensus)
            .map_err(|_| PyazError::Consensus("engine already attached".into()))
    }

    fn engine(&self) -> Result<&Consensus> {
        self.engine
            .get()
            .ok_or_else(|| PyazError::Consensus("engine not attached".into()))
    }

    async fn propose(&self, cmd: &Command) -> Result<()> {
        let payload = serde_json::to_vec(cmd)
            .map_err(|e| PyazError::Storage(e.to_string()))?;
        self.engine()?.apply(payload, APPLY_TIMEOUT).await?;
        Ok(())
    }
}

impl KvStore for RaftStore {
    /// Reads come straight from the map. Valid only on the leader; the
    /// request router checks the role before calling.
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.mem.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.propose(&Command::set(key, value)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.propose(&Command::delete(key)).await
    }
}

impl StateMachine for RaftStore {
    async fn apply(&self, index: u64, command: &[u8]) -> Result<()> {
        let cmd: Command = match serde_json::from_slice(command) {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!(index, error = %e, "ignoring undecodable log entry");
                return Ok(());
            }
        };
        match cmd.op.as_str() {
            OP_SET => self.mem.set(&cmd.key, cmd.value.as_deref().unwrap_or_default()).await?,
            OP_DELETE => self.mem.delete(&cmd.key).await?,
            other => {
                tracing::warn!(index, op = other, "ignoring unknown replicated op");
            }
        }
        Ok(())
    }

    /// Serialize the full map for snapshot transfer.
    async fn snapshot(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.mem.dump()).map_err(|e| PyazError::Storage(e.to_string()))
    }

    /// Replace the map from a snapshot produced by [`StateMachine::snapshot`].
    async fn restore(&self, data: &[u8]) -> Result<()> {
        let map = serde_json::from_slice(data).map_err(|e| PyazError::Storage(e.to_string()))?;
        self.mem.replace(map);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (Arc<MemStore>, RaftStore) {
        let mem = Arc::new(MemStore::new());
        (mem.clone(), RaftStore::new(mem))
    }

    #[tokio::test]
    async fn apply_set_and_delete() {
        let (mem, rs) = store();

        let set = serde_json::to_vec(&Command::set("k", "v")).unwrap();
        rs.apply(1, &set).await.unwrap();
        assert_eq!(mem.get("k").await.unwrap(), Some("v".to_string()));

        let del = serde_json::to_vec(&Command::delete("k")).unwrap();
        rs.apply(2, &del).await.unwrap();
        assert_eq!(mem.get("k").await.unwrap(), None);

        // Deleting again commits fine and leaves the store unchanged.
        rs.apply(3, &del).await.unwrap();
        assert_eq!(mem.len(), 0);
    }

    #[tokio::test]
    async fn apply_ignores_unknown_op() {
        let (mem, rs) = store();
        let payload = br#"{"op":"increment","key":"k","value":"1"}"#;
        rs.apply(1, payload).await.unwrap();
        assert_eq!(mem.len(), 0);
    }

    #[tokio::test]
    async fn apply_ignores_undecodable_entry() {
        let (mem, rs) = store();
        rs.apply(1, b"not json").await.unwrap();
        assert_eq!(mem.len(), 0);
    }

    #[tokio::test]
    async fn set_without_value_writes_empty_string() {
        let (mem, rs) = store();
        let payload = br#"{"op":"set","key":"k"}"#;
        rs.apply(1, payload).await.unwrap();
        assert_eq!(mem.get("k").await.unwrap(), Some(String::new()));
    }

    #[tokio::test]
    async fn proposals_require_an_attached_engine() {
        let (_, rs) = store();
        let err = rs.set("k", "v").await.unwrap_err();
        assert!(matches!(err, PyazError::Consensus(_)));
    }

    #[tokio::test]
    async fn snapshot_restore_round_trip() {
        let (mem, rs) = store();
        mem.set("a", "1").await.unwrap();
        mem.set("b", "2").await.unwrap();

        let snap = rs.snapshot().await.unwrap();

        let (mem2, rs2) = store();
        mem2.set("stale", "x").await.unwrap();
        rs2.restore(&snap).await.unwrap();
        assert_eq!(mem2.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(mem2.get("b").await.unwrap(), Some("2".to_string()));
        assert_eq!(mem2.get("stale").await.unwrap(), None);
    }

    #[test]
    fn command_encoding_omits_absent_value() {
        let raw = serde_json::to_string(&Command::delete("k")).unwrap();
        assert_eq!(raw, r#"{"op":"delete","key":"k"}"#);

        let raw = serde_json::to_string(&Command::set("k", "v")).unwrap();
        assert_eq!(raw, r#"{"op":"set","key":"k","value":"v"}"#);
    }
}
