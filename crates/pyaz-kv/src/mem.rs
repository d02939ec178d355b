use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use pyaz_types::Result;

use crate::KvStore;

/// The in-memory key-value map.
///
/// Multi-reader/single-writer: readers never block each other, writers
/// serialize and hold the lock only for the map operation itself.
pub struct MemStore {
    data: RwLock<HashMap<String, String>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore { data: RwLock::new(HashMap::new()) }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let g = self.data.read().unwrap_or_else(|e| e.into_inner());
        g.get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) {
        let mut g = self.data.write().unwrap_or_else(|e| e.into_inner());
        g.insert(key.to_string(), value.to_string());
    }

    /// Removing an absent key succeeds silently.
    pub fn delete(&self, key: &str) {
        let mut g = self.data.write().unwrap_or_else(|e| e.into_inner());
        g.remove(key);
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ordered copy of the full map, used by the snapshot path.
    pub(crate) fn dump(&self) -> BTreeMap<String, String> {
        let g = self.data.read().unwrap_or_else(|e| e.into_inner());
        g.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Replace the full map, used by the restore path.
    pub(crate) fn replace(&self, data: BTreeMap<String, String>) {
        let mut g = self.data.write().unwrap_or_else(|e| e.into_inner());
        *g = data.into_iter().collect();
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(MemStore::get(self, key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        MemStore::set(self, key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        MemStore::delete(self, key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let store = MemStore::new();
        assert_eq!(store.get("k"), None);

        store.set("k", "v");
        assert_eq!(store.get("k"), Some("v".to_string()));

        // Insert-or-replace semantics.
        store.set("k", "v2");
        assert_eq!(store.get("k"), Some("v2".to_string()));

        store.delete("k");
        assert_eq!(store.get("k"), None);

        // Deleting an absent key is not an error.
        store.delete("k");
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn empty_values_are_valid() {
        let store = MemStore::new();
        store.set("k", "");
        assert_eq!(store.get("k"), Some(String::new()));
    }

    #[test]
    fn dump_and_replace_round_trip() {
        let store = MemStore::new();
        store.set("a", "1");
        store.set("b", "2");

        let other = MemStore::new();
        other.replace(store.dump());
        assert_eq!(other.get("a"), Some("1".to_string()));
        assert_eq!(other.get("b"), Some("2".to_string()));
        assert_eq!(other.len(), 2);
    }
}
