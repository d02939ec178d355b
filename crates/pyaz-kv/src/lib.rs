//! The PyazDB store stack: the in-memory map, the replicated store that
//! drives it through consensus, and the instrumentation facet.

mod mem;
mod metrics;
mod raft;

pub use mem::MemStore;
pub use metrics::{InstrumentedStore, MetricsSnapshot};
pub use raft::{Command, RaftStore, OP_DELETE, OP_SET};

use std::future::Future;
use std::sync::Arc;

use pyaz_types::Result;

/// The key-value store interface.
///
/// Implementations can be swapped out: the plain in-memory map, the
/// consensus-replicated store, or the instrumented wrapper around either.
pub trait KvStore: Send + Sync + 'static {
    /// Retrieve the value associated with `key`, or `None` if absent.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Store a key-value pair. Idempotent and safe to retry.
    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;

    /// Remove `key`. Removing an absent key succeeds. Idempotent and safe to
    /// retry.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

impl<S: KvStore> KvStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}
