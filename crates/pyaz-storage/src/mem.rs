use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;

use pyaz_types::Result;

use crate::traits::LogStore;

struct MemLogInner {
    entries: BTreeMap<u64, Vec<u8>>,
    meta: HashMap<String, Vec<u8>>,
}

/// In-memory [`LogStore`] backed by a `BTreeMap`.
///
/// Intended for unit tests; not persisted across restarts.
pub struct MemLogStore {
    inner: Arc<RwLock<MemLogInner>>,
}

impl MemLogStore {
    pub fn new() -> Self {
        MemLogStore {
            inner: Arc::new(RwLock::new(MemLogInner {
                entries: BTreeMap::new(),
                meta: HashMap::new(),
            })),
        }
    }
}

impl Default for MemLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore for MemLogStore {
    async fn last_index(&self) -> Result<Option<u64>> {
        Ok(self.inner.read().await.entries.keys().next_back().copied())
    }

    async fn entry(&self, index: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().await.entries.get(&index).cloned())
    }

    async fn entries(&self, from: u64, to_inclusive: u64) -> Result<Vec<Vec<u8>>> {
        if from > to_inclusive {
            return Ok(Vec::new());
        }
        let g = self.inner.read().await;
        Ok(g.entries.range(from..=to_inclusive).map(|(_, e)| e.clone()).collect())
    }

    async fn append(&self, entries: Vec<(u64, Vec<u8>)>) -> Result<()> {
        let mut g = self.inner.write().await;
        for (index, entry) in entries {
            g.entries.insert(index, entry);
        }
        Ok(())
    }

    async fn truncate_since(&self, from_index: u64) -> Result<()> {
        let mut g = self.inner.write().await;
        g.entries.retain(|&idx, _| idx < from_index);
        Ok(())
    }

    async fn purge_upto(&self, up_to_index: u64) -> Result<()> {
        let mut g = self.inner.write().await;
        g.entries.retain(|&idx, _| idx > up_to_index);
        Ok(())
    }

    async fn put_meta(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.inner.write().await.meta.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().await.meta.get(key).cloned())
    }
}
