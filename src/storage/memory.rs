//! In-process storage backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;

use super::StorageBackend;

/// A stored value together with its expiry.
#[derive(Debug, Clone)]
struct StoredEntry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// In-memory storage for single-process deployments and tests.
///
/// Per-key atomicity comes from the dashmap entry lock: the compare and the
/// swap happen under one shard guard, so racing consumers of the same key
/// observe a linearized sequence of states. Expired entries read as absent
/// and are reclaimed lazily on the next swap or via [`purge_expired`].
///
/// [`purge_expired`]: MemoryStorage::purge_expired
pub struct MemoryStorage {
    entries: DashMap<String, StoredEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryStorage {
    /// Create a store judging TTLs against the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store judging TTLs against the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of entries currently held, including expired ones not yet
    /// reclaimed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop entries whose TTL elapsed.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone()))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Duration,
    ) -> Result<bool> {
        let now = self.clock.now();
        // Absurd TTLs clamp to a year rather than failing the conversion.
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        let entry = StoredEntry {
            value: new.to_vec(),
            expires_at: now + ttl,
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let live = occupied.get().expires_at > now;
                let matches = match expected {
                    // An expired entry counts as absent for the comparison.
                    Some(bytes) => live && occupied.get().value.as_slice() == bytes,
                    None => !live,
                };
                if matches {
                    occupied.insert(entry);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(entry);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}
