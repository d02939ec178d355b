use std::path::Path;

use pyaz_types::{PyazError, Result};

use crate::traits::LogStore;

fn log_key(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

fn sled_err(e: sled::Error) -> PyazError {
    PyazError::Storage(e.to_string())
}

fn join_err(e: tokio::task::JoinError) -> PyazError {
    PyazError::Storage(e.to_string())
}

/// [`LogStore`] backed by sled trees.
///
/// Two trees: `log` maps big-endian index to the encoded entry, `meta` holds
/// the named metadata blobs. Writes are flushed before returning. All
/// blocking I/O runs on `tokio::task::spawn_blocking`.
pub struct SledLogStore {
    log: sled::Tree,
    meta: sled::Tree,
    _db: sled::Db,
}

impl SledLogStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).map_err(sled_err)?;
        let log = db.open_tree("log").map_err(sled_err)?;
        let meta = db.open_tree("meta").map_err(sled_err)?;
        Ok(SledLogStore { log, meta, _db: db })
    }

    /// Whether any consensus state has been persisted. Bootstrap is only
    /// legal when this is false.
    pub fn has_existing_state(&self) -> Result<bool> {
        let has_log = self.log.first().map_err(sled_err)?.is_some();
        let has_meta = self.meta.first().map_err(sled_err)?.is_some();
        Ok(has_log || has_meta)
    }
}

impl LogStore for SledLogStore {
    async fn last_index(&self) -> Result<Option<u64>> {
        let log = self.log.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<u64>> {
            match log.last().map_err(sled_err)? {
                Some((k, _)) => {
                    let bytes: [u8; 8] = k
                        .as_ref()
                        .try_into()
                        .map_err(|_| PyazError::Storage("short log key".into()))?;
                    Ok(Some(u64::from_be_bytes(bytes)))
                }
                None => Ok(None),
            }
        })
        .await
        .map_err(join_err)?
    }

    async fn entry(&self, index: u64) -> Result<Option<Vec<u8>>> {
        let log = self.log.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>> {
            Ok(log.get(log_key(index)).map_err(sled_err)?.map(|v| v.to_vec()))
        })
        .await
        .map_err(join_err)?
    }

    async fn entries(&self, from: u64, to_inclusive: u64) -> Result<Vec<Vec<u8>>> {
        if from > to_inclusive {
            return Ok(Vec::new());
        }
        let log = self.log.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Vec<u8>>> {
            let mut out = Vec::new();
            for item in log.range(log_key(from)..=log_key(to_inclusive)) {
                let (_, raw) = item.map_err(sled_err)?;
                out.push(raw.to_vec());
            }
            Ok(out)
        })
        .await
        .map_err(join_err)?
    }

    async fn append(&self, entries: Vec<(u64, Vec<u8>)>) -> Result<()> {
        let log = self.log.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            for (index, entry) in entries {
                log.insert(log_key(index), entry).map_err(sled_err)?;
            }
            log.flush().map_err(sled_err)?;
            Ok(())
        })
        .await
        .map_err(join_err)?
    }

    async fn truncate_since(&self, from_index: u64) -> Result<()> {
        let log = self.log.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let doomed: Vec<sled::IVec> = log
                .range(log_key(from_index)..)
                .map(|item| item.map(|(k, _)| k).map_err(sled_err))
                .collect::<Result<_>>()?;
            for key in doomed {
                log.remove(key).map_err(sled_err)?;
            }
            log.flush().map_err(sled_err)?;
            Ok(())
        })
        .await
        .map_err(join_err)?
    }

    async fn purge_upto(&self, up_to_index: u64) -> Result<()> {
        let log = self.log.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let doomed: Vec<sled::IVec> = log
                .range(..=log_key(up_to_index))
                .map(|item| item.map(|(k, _)| k).map_err(sled_err))
                .collect::<Result<_>>()?;
            for key in doomed {
                log.remove(key).map_err(sled_err)?;
            }
            log.flush().map_err(sled_err)?;
            Ok(())
        })
        .await
        .map_err(join_err)?
    }

    async fn put_meta(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let meta = self.meta.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            meta.insert(key.as_bytes(), value).map_err(sled_err)?;
            meta.flush().map_err(sled_err)?;
            Ok(())
        })
        .await
        .map_err(join_err)?
    }

    async fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let meta = self.meta.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>> {
            Ok(meta.get(key.as_bytes()).map_err(sled_err)?.map(|v| v.to_vec()))
        })
        .await
        .map_err(join_err)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(index: u64) -> Vec<u8> {
        vec![index as u8, 0xaa]
    }

    #[tokio::test]
    async fn sled_log_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledLogStore::open(dir.path()).unwrap();

        assert!(!store.has_existing_state().unwrap());

        store
            .append(vec![(1, blob(1)), (2, blob(2)), (3, blob(3))])
            .await
            .unwrap();
        assert_eq!(store.last_index().await.unwrap(), Some(3));
        assert_eq!(store.entry(3).await.unwrap(), Some(blob(3)));

        let entries = store.entries(1, 2).await.unwrap();
        assert_eq!(entries, vec![blob(1), blob(2)]);

        store.truncate_since(2).await.unwrap();
        assert_eq!(store.last_index().await.unwrap(), Some(1));

        assert!(store.has_existing_state().unwrap());
    }

    #[tokio::test]
    async fn sled_purge_removes_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledLogStore::open(dir.path()).unwrap();

        store
            .append(vec![(1, blob(1)), (2, blob(2)), (3, blob(3))])
            .await
            .unwrap();
        store.purge_upto(2).await.unwrap();

        assert!(store.entry(1).await.unwrap().is_none());
        assert!(store.entry(2).await.unwrap().is_none());
        assert_eq!(store.entry(3).await.unwrap(), Some(blob(3)));
        assert_eq!(store.last_index().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn sled_meta_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledLogStore::open(dir.path()).unwrap();
            store.put_meta("vote", vec![7, 7]).await.unwrap();
        }

        let store = SledLogStore::open(dir.path()).unwrap();
        assert_eq!(store.get_meta("vote").await.unwrap(), Some(vec![7, 7]));
        assert!(store.has_existing_state().unwrap());
    }

    #[tokio::test]
    async fn sled_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledLogStore::open(dir.path()).unwrap();
            store.append(vec![(1, blob(1)), (2, blob(2))]).await.unwrap();
        }

        let store = SledLogStore::open(dir.path()).unwrap();
        let entries = store.entries(1, 2).await.unwrap();
        assert_eq!(entries.len(), 2);
    }
}
