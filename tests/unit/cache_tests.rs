/*!
 * Tests for fingerprints and the dedup cache implementations
 */

use bookling::database::Repository;
use bookling::errors::CacheError;
use bookling::translation::fingerprint::normalize_text;
use bookling::translation::{fingerprint, DedupCache, MemoryCache, PutOutcome, SqliteCache};

#[test]
fn test_fingerprint_shouldBeStableHexSha256() {
    let fp = fingerprint("A paragraph.");
    assert_eq!(fp.len(), 64);
    assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(fp, fingerprint("a   PARAGRAPH."));
}

#[test]
fn test_normalizeText_shouldCollapseWhitespace() {
    assert_eq!(normalize_text("  Two\n\nLines\there "), "two lines here");
}

async fn exercise_cache(cache: &dyn DedupCache) {
    let fp = fingerprint("The cat sleeps.");

    assert_eq!(cache.get(&fp, "es").await.unwrap(), None);
    assert_eq!(cache.put(&fp, "es", "El gato duerme.").await.unwrap(), PutOutcome::Inserted);
    assert_eq!(cache.put(&fp, "es", "El gato duerme.").await.unwrap(), PutOutcome::Unchanged);
    assert_eq!(cache.get(&fp, "es").await.unwrap().as_deref(), Some("El gato duerme."));

    // Same fingerprint, other language is a separate entry
    assert_eq!(cache.get(&fp, "fr").await.unwrap(), None);

    match cache.put(&fp, "es", "El gato está durmiendo.").await {
        Err(CacheError::Conflict { existing, .. }) => assert_eq!(existing, "El gato duerme."),
        other => panic!("expected conflict, got {:?}", other),
    }
    // First writer wins
    assert_eq!(cache.get(&fp, "es").await.unwrap().as_deref(), Some("El gato duerme."));

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.total_entries, 1);
    assert!(stats.total_hits >= 2);
}

#[tokio::test]
async fn test_memoryCache_shouldKeepFirstWriter() {
    let cache = MemoryCache::new();
    exercise_cache(&cache).await;
    let (hits, misses, _) = cache.hit_rate();
    assert_eq!(hits, 2);
    assert_eq!(misses, 2);
}

#[tokio::test]
async fn test_sqliteCache_shouldKeepFirstWriter() {
    let repo = Repository::new_in_memory().unwrap();
    let cache = SqliteCache::new(repo.clone());
    exercise_cache(&cache).await;

    assert_eq!(repo.clear_cache().await.unwrap(), 1);
    assert_eq!(cache.stats().await.unwrap().total_entries, 0);
}

#[tokio::test]
async fn test_sqliteCache_shouldBeSharedAcrossHandles() {
    let repo = Repository::new_in_memory().unwrap();
    let writer = SqliteCache::new(repo.clone());
    let reader = SqliteCache::new(repo);
    let fp = fingerprint("Shared paragraph.");

    writer.put(&fp, "de", "Geteilter Absatz.").await.unwrap();
    assert_eq!(reader.get(&fp, "de").await.unwrap().as_deref(), Some("Geteilter Absatz."));
}
