//! Key-value storage abstraction for persisted window state.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

mod memory;

pub use memory::MemoryStorage;

/// Minimal key-value contract required by the limiter.
///
/// Values are opaque bytes; the window codec owns their layout. Decisions
/// for the same key serialize through `compare_and_swap`, which must be
/// atomic per key: two concurrent swaps from the same expected value must
/// never both succeed. The backing can be in-process memory or a shared
/// networked cache, so both calls may suspend the calling task.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Load the stored value for `key`, `None` when absent or expired.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically replace the value for `key` if it still equals `expected`.
    ///
    /// `expected = None` asserts the key is absent. Returns `false` on
    /// conflict, in which case the caller re-runs its whole decision
    /// sequence against a fresh load. `ttl` bounds how long an untouched
    /// entry survives; eviction after that only loosens limits for idle
    /// keys, never tightens them.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Duration,
    ) -> Result<bool>;
}
