/*!
 * Translation dedup cache.
 *
 * Maps `(fingerprint, target language)` to a translated text and is shared
 * by every job. Writes are idempotent: storing the same text again is a
 * no-op, storing a different text for an existing key is a conflict and
 * the first writer's text stays in the cache.
 *
 * `MemoryCache` keeps entries in process memory; `SqliteCache` persists
 * them through the repository so they survive restarts.
 */

use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::database::models::CacheStats;
use crate::database::{CacheInsert, Repository};
use crate::errors::CacheError;

/// How a job reacts when its cache write conflicts with the stored entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Log the conflict and keep going with the job's own text
    #[default]
    FirstWriterWins,
    /// Fail the stage
    Strict,
}

/// Result of a successful `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The key was empty; the text is now stored
    Inserted,
    /// The key already held exactly this text
    Unchanged,
}

/// Content-addressed translation store shared across jobs
#[async_trait]
pub trait DedupCache: Send + Sync {
    /// Look up a translation
    async fn get(&self, fingerprint: &str, language: &str) -> Result<Option<String>, CacheError>;

    /// Store a translation, failing with `CacheError::Conflict` when the key
    /// already holds a different text
    async fn put(&self, fingerprint: &str, language: &str, text: &str) -> Result<PutOutcome, CacheError>;

    /// Entry and hit counts
    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Classify a stored text against the one being written
fn compare(fingerprint: &str, language: &str, existing: String, text: &str) -> Result<PutOutcome, CacheError> {
    if existing == text {
        Ok(PutOutcome::Unchanged)
    } else {
        Err(CacheError::Conflict {
            fingerprint: fingerprint.to_string(),
            language: language.to_string(),
            existing,
        })
    }
}

/// Stored entry with its write order
#[derive(Debug, Clone)]
struct CachedEntry {
    text: String,
    written_seq: u64,
}

/// In-memory cache
#[derive(Clone, Default)]
pub struct MemoryCache {
    /// Entries keyed by (fingerprint, language)
    entries: Arc<RwLock<HashMap<(String, String), CachedEntry>>>,

    /// Cache hit counter
    hits: Arc<AtomicU64>,

    /// Cache miss counter
    misses: Arc<AtomicU64>,

    /// Monotonic write counter
    writes: Arc<AtomicU64>,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// `(hits, misses, hit_rate)` since creation
    pub fn hit_rate(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let rate = if total > 0 { hits as f64 / total as f64 } else { 0.0 };
        (hits, misses, rate)
    }

    /// Sequence number assigned when the key was first written
    pub fn written_seq(&self, fingerprint: &str, language: &str) -> Option<u64> {
        self.entries
            .read()
            .get(&(fingerprint.to_string(), language.to_string()))
            .map(|e| e.written_seq)
    }
}

#[async_trait]
impl DedupCache for MemoryCache {
    async fn get(&self, fingerprint: &str, language: &str) -> Result<Option<String>, CacheError> {
        let key = (fingerprint.to_string(), language.to_string());
        let found = self.entries.read().get(&key).map(|e| e.text.clone());

        match &found {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let short: String = fingerprint.chars().take(12).collect();
                debug!("Cache hit for {} ({})", short, language);
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(found)
    }

    async fn put(&self, fingerprint: &str, language: &str, text: &str) -> Result<PutOutcome, CacheError> {
        let key = (fingerprint.to_string(), language.to_string());
        let mut entries = self.entries.write();

        match entries.entry(key) {
            Entry::Vacant(slot) => {
                let written_seq = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
                slot.insert(CachedEntry {
                    text: text.to_string(),
                    written_seq,
                });
                Ok(PutOutcome::Inserted)
            }
            Entry::Occupied(slot) => compare(fingerprint, language, slot.get().text.clone(), text),
        }
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            total_entries: self.len() as i64,
            total_hits: self.hits.load(Ordering::Relaxed) as i64,
        })
    }
}

/// Cache persisted in the `translation_cache` table
#[derive(Clone)]
pub struct SqliteCache {
    repo: Repository,
}

impl SqliteCache {
    /// Create a cache over the given repository
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl DedupCache for SqliteCache {
    async fn get(&self, fingerprint: &str, language: &str) -> Result<Option<String>, CacheError> {
        Ok(self.repo.get_cached_translation(fingerprint, language).await?)
    }

    async fn put(&self, fingerprint: &str, language: &str, text: &str) -> Result<PutOutcome, CacheError> {
        match self.repo.insert_cache_entry(fingerprint, language, text).await? {
            CacheInsert::Inserted => Ok(PutOutcome::Inserted),
            CacheInsert::Existing(existing) => compare(fingerprint, language, existing, text),
        }
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(self.repo.get_cache_stats().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise_put_semantics(cache: &dyn DedupCache) {
        assert_eq!(cache.put("fp1", "es", "hola").await.unwrap(), PutOutcome::Inserted);
        assert_eq!(cache.put("fp1", "es", "hola").await.unwrap(), PutOutcome::Unchanged);

        match cache.put("fp1", "es", "buenas").await {
            Err(CacheError::Conflict { existing, .. }) => assert_eq!(existing, "hola"),
            other => panic!("expected conflict, got {:?}", other),
        }

        assert_eq!(cache.get("fp1", "es").await.unwrap().as_deref(), Some("hola"));
        assert_eq!(cache.get("fp1", "fr").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memoryCache_put_shouldBeIdempotentAndKeepFirstWriter() {
        exercise_put_semantics(&MemoryCache::new()).await;
    }

    #[tokio::test]
    async fn test_sqliteCache_put_shouldBeIdempotentAndKeepFirstWriter() {
        let cache = SqliteCache::new(Repository::new_in_memory().unwrap());
        exercise_put_semantics(&cache).await;
    }

    #[tokio::test]
    async fn test_memoryCache_writtenSeq_shouldIncrease() {
        let cache = MemoryCache::new();
        cache.put("a", "es", "x").await.unwrap();
        cache.put("b", "es", "y").await.unwrap();
        assert!(cache.written_seq("a", "es").unwrap() < cache.written_seq("b", "es").unwrap());
    }

    #[tokio::test]
    async fn test_memoryCache_stats_shouldCountHits() {
        let cache = MemoryCache::new();
        cache.put("a", "es", "x").await.unwrap();
        cache.get("a", "es").await.unwrap();
        cache.get("missing", "es").await.unwrap();

        let (hits, misses, rate) = cache.hit_rate();
        assert_eq!((hits, misses), (1, 1));
        assert_eq!(rate, 0.5);
        assert_eq!(cache.stats().await.unwrap().total_entries, 1);
    }
}
