use std::future::Future;

use pyaz_types::Result;

/// Persistence for the consensus layer: log entries as encoded blobs keyed by
/// index, plus a small named-blob metadata space (vote, purge cursor, and the
/// like). This crate deliberately does not depend on the consensus library;
/// the adapter that owns the encoding lives in `pyaz-raft`.
///
/// Methods use RPITIT (`-> impl Future + Send`); implementations write plain
/// `async fn`s. Appends and metadata writes must be durable before the
/// returned future resolves; the consensus layer acknowledges callers on the
/// strength of that guarantee.
pub trait LogStore: Send + Sync + 'static {
    /// The largest index currently in the log (`None` if the log is empty).
    fn last_index(&self) -> impl Future<Output = Result<Option<u64>>> + Send;

    /// The encoded entry at `index`, or `None` if absent.
    fn entry(&self, index: u64) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// All encoded entries in the inclusive range `[from, to_inclusive]`.
    fn entries(
        &self,
        from: u64,
        to_inclusive: u64,
    ) -> impl Future<Output = Result<Vec<Vec<u8>>>> + Send;

    /// Append `(index, encoded entry)` pairs, overwriting any existing entry
    /// at the same index.
    fn append(&self, entries: Vec<(u64, Vec<u8>)>) -> impl Future<Output = Result<()>> + Send;

    /// Delete all entries with `index >= from_index` (conflict resolution).
    fn truncate_since(&self, from_index: u64) -> impl Future<Output = Result<()>> + Send;

    /// Delete all entries with `index <= up_to_index` (post-snapshot GC).
    fn purge_upto(&self, up_to_index: u64) -> impl Future<Output = Result<()>> + Send;

    /// Durably store a named metadata blob (vote, purge cursor, snapshot).
    fn put_meta(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Retrieve a named metadata blob.
    fn get_meta(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;
}
