mod memory;
mod postgres;

pub use memory::MemoryStagingBuffer;
pub use postgres::PgStagingBuffer;

use crate::error::StoreError;
use crate::reading::{Reading, StagingEntry};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Transient holding area for readings that have not been committed yet.
///
/// Every operation is atomic per key and safe to call concurrently; callers
/// never hold a lock across calls. There is no cross-key atomicity.
#[async_trait]
pub trait StagingBuffer: Send + Sync {
    /// Stores one entry. An existing key is rejected, never overwritten.
    async fn put(&self, key: &str, reading: &Reading) -> Result<(), StoreError>;

    /// One-shot, finite stream over the staged entries, ordered by key.
    /// Calling again starts a fresh scan of the buffer as it is then.
    fn scan_all(&self) -> BoxStream<'_, Result<StagingEntry, StoreError>>;

    /// Removes one entry. A missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn len(&self) -> Result<u64, StoreError>;
}
