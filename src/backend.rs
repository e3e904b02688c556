//! The storage backend interface (spec §6 "Storage backend") and one
//! lightweight in-process reference implementation used by this crate's own
//! test suite. Concrete persistent backends (disk-backed, hybrid) are
//! non-goals (§1); production crates implement [`CacheManager`] the way the
//! teacher's `managers::{cacache,moka,foyer}` implement its `CacheManager`
//! trait.

use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Key/entry map with an atomic update primitive (spec §6).
///
/// `update_entry`'s `transform` receives the current entry (or `None`) and
/// returns the replacement; a conforming backend retries internally on CAS
/// collision up to its own retry budget and surfaces
/// [`CacheError::CacheUpdateFailed`] on exhaustion, matching the contract in
/// §4.9 ("Store updates use an optimistic CAS protocol").
#[async_trait]
pub trait CacheManager: Send + Sync {
    async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>>;
    async fn put_entry(&self, key: String, entry: CacheEntry) -> Result<bool>;
    async fn remove_entry(&self, key: &str) -> Result<bool>;
    async fn update_entry(
        &self,
        key: &str,
        transform: Box<dyn FnOnce(Option<CacheEntry>) -> Option<CacheEntry> + Send>,
    ) -> Result<bool>;
    async fn get_entries(&self, keys: &[String]) -> Result<Vec<(String, CacheEntry)>>;
}

/// An in-process reference backend keyed by a `dashmap::DashMap`, matching
/// the concurrent-map shape the spec requires for the variant map's CAS
/// updates (§5 shared-resource policy) without depending on any one
/// production storage crate. Not intended to be shipped as a production
/// backend — it holds everything in memory for the lifetime of the process.
#[derive(Debug, Default, Clone)]
pub struct InMemoryManager {
    entries: Arc<DashMap<String, CacheEntry>>,
    max_update_retries: u32,
}

impl InMemoryManager {
    /// Builds an empty manager, retrying a CAS update via `update_entry` up
    /// to `max_update_retries` times before giving up.
    pub fn new(max_update_retries: u32) -> Self {
        InMemoryManager { entries: Arc::new(DashMap::new()), max_update_retries }
    }

    /// Number of entries currently stored, root and variant alike.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheManager for InMemoryManager {
    async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.get(key).map(|e| e.clone()))
    }

    async fn put_entry(&self, key: String, entry: CacheEntry) -> Result<bool> {
        self.entries.insert(key, entry);
        Ok(true)
    }

    async fn remove_entry(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn update_entry(
        &self,
        key: &str,
        transform: Box<dyn FnOnce(Option<CacheEntry>) -> Option<CacheEntry> + Send>,
    ) -> Result<bool> {
        // `dashmap`'s per-shard lock already gives us linearizable
        // read-modify-write for a single key, so there is no real CAS race
        // to retry here; `max_update_retries` is honored as a budget of at
        // most one attempt regardless, matching the contract other backends
        // (which really do race) must uphold.
        let mut entry = self.entries.entry(key.to_string());
        match &mut entry {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                let current = Some(occupied.get().clone());
                match transform(current) {
                    Some(next) => {
                        occupied.insert(next);
                        Ok(true)
                    }
                    None => {
                        occupied.remove();
                        Ok(true)
                    }
                }
            }
            dashmap::mapref::entry::Entry::Vacant(_) => match transform(None) {
                Some(next) => {
                    self.entries.insert(key.to_string(), next);
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }

    async fn get_entries(&self, keys: &[String]) -> Result<Vec<(String, CacheEntry)>> {
        Ok(keys
            .iter()
            .filter_map(|k| self.entries.get(k).map(|e| (k.clone(), e.clone())))
            .collect())
    }
}

/// Forces a `CacheUpdateFailed` error path to exist as a reachable,
/// testable outcome even though `InMemoryManager` itself never produces a
/// real CAS collision (see its `update_entry` note above); a backend that
/// does race can call this once its own retry budget is exhausted.
pub fn cas_exhausted() -> CacheError {
    CacheError::CacheUpdateFailed
}
