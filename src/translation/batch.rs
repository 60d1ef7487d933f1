/*!
 * Batch planning and concurrent batch translation.
 *
 * `plan_batches` partitions a worklist into contiguous batches bounded by
 * a paragraph count and an estimated token budget. The plan depends only
 * on the worklist and the limits, so a resumed job sees the same batches.
 *
 * `BatchTranslator` runs the plan against a translation client: each
 * batch consults the dedup cache first, sends only the distinct uncached
 * texts, retries transient failures with backoff and writes fresh results
 * back to the cache. Batches run concurrently up to the worker count and
 * are yielded as a stream in completion order.
 */

use anyhow::{anyhow, Result};
use futures::stream::{self, Stream, StreamExt};
use log::{debug, warn};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::app_config::TranslationConfig;
use crate::errors::{CacheError, ProviderError, StageError};
use crate::providers::TranslationClient;
use crate::translation::cache::{ConflictPolicy, DedupCache};
use crate::translation::retry::{retry_with_backoff, RetryPolicy, Sleeper};

/// Estimated token count of a text: a quarter of its character count, at least 1
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4).max(1)
}

/// Size limits for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum paragraphs in a batch
    pub max_paragraphs: usize,
    /// Model context size in estimated tokens
    pub max_tokens: usize,
    /// Tokens held back for the completion
    pub reserved_tokens: usize,
}

impl BatchLimits {
    /// Create validated limits
    pub fn new(max_paragraphs: usize, max_tokens: usize, reserved_tokens: usize) -> Result<Self> {
        let limits = Self {
            max_paragraphs,
            max_tokens,
            reserved_tokens,
        };
        limits.validate()?;
        Ok(limits)
    }

    /// Limits from the translation settings, unvalidated
    pub fn from_config(config: &TranslationConfig) -> Self {
        Self {
            max_paragraphs: config.max_paragraphs_per_batch,
            max_tokens: config.max_tokens_per_batch,
            reserved_tokens: config.reserved_tokens,
        }
    }

    /// Reject limits that cannot hold a single paragraph
    pub fn validate(&self) -> Result<()> {
        if self.max_paragraphs == 0 {
            return Err(anyhow!("max_paragraphs_per_batch must be at least 1"));
        }
        if self.max_tokens == 0 {
            return Err(anyhow!("max_tokens_per_batch must be at least 1"));
        }
        if self.reserved_tokens >= self.max_tokens {
            return Err(anyhow!(
                "reserved_tokens ({}) must be smaller than max_tokens_per_batch ({})",
                self.reserved_tokens,
                self.max_tokens
            ));
        }
        Ok(())
    }

    /// Estimated tokens available for input texts
    pub fn token_budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved_tokens)
    }
}

/// Partition `texts` into contiguous index ranges.
///
/// A batch closes when adding the next text would exceed either limit.
/// A text larger than the whole token budget becomes a batch of its own.
/// Every index appears in exactly one range, in order.
pub fn plan_batches<S: AsRef<str>>(texts: &[S], limits: &BatchLimits) -> Vec<Range<usize>> {
    let budget = limits.token_budget();
    let mut batches = Vec::new();
    let mut start = 0;
    let mut tokens = 0;

    for (index, text) in texts.iter().enumerate() {
        let cost = estimate_tokens(text.as_ref());
        let count = index - start;
        let full = count >= limits.max_paragraphs || (count > 0 && tokens + cost > budget);
        if full {
            batches.push(start..index);
            start = index;
            tokens = 0;
        }
        tokens += cost;
    }
    if start < texts.len() {
        batches.push(start..texts.len());
    }

    batches
}

/// One paragraph to translate
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    /// Caller's identifier for the paragraph
    pub key: i64,
    /// Content fingerprint of `text`
    pub fingerprint: String,
    /// Source text
    pub text: String,
}

/// Where a translation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationSource {
    /// Found in the dedup cache
    Cache,
    /// Produced by the client in this run
    Client,
}

/// Translations of one batch, ready to apply
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Position of the batch in the plan
    pub batch_index: usize,
    /// `(key, translation, source)` for every item of the batch
    pub translations: Vec<(i64, String, TranslationSource)>,
    /// Client calls made for this batch, including retries
    pub client_calls: usize,
    /// Cache writes that found a different stored text
    pub conflicts: usize,
}

/// Concurrent batch executor
pub struct BatchTranslator {
    /// Translation backend
    client: Arc<dyn TranslationClient>,
    /// Shared dedup cache
    cache: Arc<dyn DedupCache>,
    /// Per-batch retry policy
    retry: RetryPolicy,
    /// Backoff waiter
    sleeper: Arc<dyn Sleeper>,
    /// Maximum batches in flight
    workers: usize,
    /// Reaction to cache conflicts
    conflict_policy: ConflictPolicy,
}

impl BatchTranslator {
    /// Create a new batch translator
    pub fn new(
        client: Arc<dyn TranslationClient>,
        cache: Arc<dyn DedupCache>,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
        workers: usize,
    ) -> Self {
        Self {
            client,
            cache,
            retry,
            sleeper,
            workers: workers.max(1),
            conflict_policy: ConflictPolicy::default(),
        }
    }

    /// Set the conflict policy
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Translate planned batches concurrently.
    ///
    /// Outcomes arrive in completion order. Once `cancel` fires, batches in
    /// flight resolve to `StageError::Cancelled` and their results are not
    /// written to the cache.
    pub fn translate_batches<'a>(
        &'a self,
        batches: Vec<Vec<WorkItem>>,
        source_language: String,
        target_language: String,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<BatchOutcome, StageError>> + 'a {
        stream::iter(batches.into_iter().enumerate())
            .map(move |(batch_index, items)| {
                let source_language = source_language.clone();
                let target_language = target_language.clone();
                let cancel = cancel.clone();
                async move {
                    self.translate_batch(batch_index, items, &source_language, &target_language, &cancel)
                        .await
                }
            })
            .buffer_unordered(self.workers)
    }

    /// Translate one batch
    pub async fn translate_batch(
        &self,
        batch_index: usize,
        items: Vec<WorkItem>,
        source_language: &str,
        target_language: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, StageError> {
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let mut resolved: HashMap<String, (String, TranslationSource)> = HashMap::new();
        let mut pending: Vec<(String, String)> = Vec::new();

        for item in &items {
            if resolved.contains_key(&item.fingerprint) || pending.iter().any(|(fp, _)| fp == &item.fingerprint) {
                continue;
            }
            match self.cache.get(&item.fingerprint, target_language).await {
                Ok(Some(text)) => {
                    resolved.insert(item.fingerprint.clone(), (text, TranslationSource::Cache));
                }
                Ok(None) => pending.push((item.fingerprint.clone(), item.text.clone())),
                Err(e) => return Err(StageError::retryable(e)),
            }
        }

        let mut client_calls = 0;
        let mut conflicts = 0;

        if !pending.is_empty() {
            let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
            let label = format!("batch {}", batch_index + 1);
            let calls = std::sync::atomic::AtomicUsize::new(0);

            let call = retry_with_backoff(
                &self.retry,
                self.sleeper.as_ref(),
                &label,
                ProviderError::is_retryable,
                |_attempt| {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    let texts = &texts;
                    async move {
                        let translated = self
                            .client
                            .translate_batch(texts, source_language, target_language)
                            .await?;
                        if translated.len() != texts.len() {
                            return Err(ProviderError::ShapeMismatch {
                                expected: texts.len(),
                                actual: translated.len(),
                            });
                        }
                        Ok(translated)
                    }
                },
            );

            let translated = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StageError::Cancelled),
                result = call => result.map_err(StageError::from)?,
            };
            client_calls = calls.load(std::sync::atomic::Ordering::SeqCst);

            // Late results of a cancelled job are dropped
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled);
            }

            for ((fp, _), text) in pending.into_iter().zip(translated) {
                match self.cache.put(&fp, target_language, &text).await {
                    Ok(_) => {}
                    Err(CacheError::Conflict { existing, .. }) => {
                        conflicts += 1;
                        if self.conflict_policy == ConflictPolicy::Strict {
                            return Err(StageError::fatal(format!(
                                "cache conflict for {} ({}): stored translation differs",
                                fp, target_language
                            )));
                        }
                        warn!(
                            "Cache conflict for {} ({}); keeping stored '{}' and using this job's result",
                            fp,
                            target_language,
                            existing.chars().take(40).collect::<String>()
                        );
                    }
                    Err(e) => return Err(StageError::retryable(e)),
                }
                resolved.insert(fp, (text, TranslationSource::Client));
            }
        }

        let mut translations = Vec::with_capacity(items.len());
        for item in items {
            let (text, source) = resolved
                .get(&item.fingerprint)
                .cloned()
                .ok_or_else(|| StageError::fatal(format!("no translation produced for paragraph {}", item.key)))?;
            translations.push((item.key, text, source));
        }

        debug!(
            "Batch {} resolved {} paragraphs with {} client calls",
            batch_index + 1,
            translations.len(),
            client_calls
        );

        Ok(BatchOutcome {
            batch_index,
            translations,
            client_calls,
            conflicts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockClient;
    use crate::translation::cache::MemoryCache;
    use crate::translation::fingerprint::fingerprint;
    use crate::translation::retry::RecordingSleeper;
    use std::time::Duration;

    fn limits(max_paragraphs: usize, max_tokens: usize, reserved: usize) -> BatchLimits {
        BatchLimits::new(max_paragraphs, max_tokens, reserved).unwrap()
    }

    fn item(key: i64, text: &str) -> WorkItem {
        WorkItem {
            key,
            fingerprint: fingerprint(text),
            text: text.to_string(),
        }
    }

    fn translator(client: MockClient, cache: Arc<dyn DedupCache>) -> BatchTranslator {
        BatchTranslator::new(
            Arc::new(client),
            cache,
            RetryPolicy::new(4, Duration::from_millis(10), 2.0, Duration::from_millis(100)),
            Arc::new(RecordingSleeper::new()),
            2,
        )
    }

    #[test]
    fn test_estimateTokens_shouldRoundUpWithMinimumOne() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("ñññññ"), 2);
    }

    #[test]
    fn test_batchLimits_withReservedAboveContext_shouldBeRejected() {
        assert!(BatchLimits::new(4, 100, 100).is_err());
        assert!(BatchLimits::new(0, 100, 10).is_err());
        assert_eq!(limits(4, 100, 40).token_budget(), 60);
    }

    #[test]
    fn test_planBatches_shouldRespectParagraphLimit() {
        let texts = vec!["a"; 7];
        let plan = plan_batches(&texts, &limits(3, 1000, 0));
        assert_eq!(plan, vec![0..3, 3..6, 6..7]);
    }

    #[test]
    fn test_planBatches_shouldRespectTokenBudget() {
        // 40 chars = 10 tokens each, budget 25
        let text = "x".repeat(40);
        let texts = vec![text.as_str(); 5];
        let plan = plan_batches(&texts, &limits(10, 35, 10));
        assert_eq!(plan, vec![0..2, 2..4, 4..5]);
    }

    #[test]
    fn test_planBatches_withOversizedParagraph_shouldIsolateIt() {
        let big = "y".repeat(400);
        let texts = vec!["a", big.as_str(), "b"];
        let plan = plan_batches(&texts, &limits(10, 20, 0));
        assert_eq!(plan, vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn test_planBatches_shouldBeDeterministicAndCoverEveryIndex() {
        let texts: Vec<String> = (0..50).map(|i| "w".repeat(i * 7 % 90 + 1)).collect();
        let l = limits(6, 80, 20);
        let plan = plan_batches(&texts, &l);
        assert_eq!(plan, plan_batches(&texts, &l));

        let covered: Vec<usize> = plan.iter().flat_map(|r| r.clone()).collect();
        assert_eq!(covered, (0..50).collect::<Vec<_>>());
        assert!(plan.iter().all(|r| !r.is_empty() && r.len() <= 6));
    }

    #[test]
    fn test_planBatches_withEmptyWorklist_shouldReturnNoBatches() {
        let texts: Vec<&str> = Vec::new();
        assert!(plan_batches(&texts, &limits(3, 10, 0)).is_empty());
    }

    #[tokio::test]
    async fn test_translateBatch_withDuplicateTexts_shouldSendEachOnce() {
        let mock = MockClient::working();
        let t = translator(mock.clone(), Arc::new(MemoryCache::new()));
        let items = vec![item(1, "Same text."), item(2, "same  TEXT."), item(3, "Other.")];

        let outcome = t
            .translate_batch(0, items, "en", "es", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(mock.requests(), vec![vec!["Same text.".to_string(), "Other.".to_string()]]);
        assert_eq!(outcome.translations.len(), 3);
        assert_eq!(outcome.translations[0].1, outcome.translations[1].1);
    }

    #[tokio::test]
    async fn test_translateBatch_withCachedTexts_shouldNotCallClient() {
        let cache = Arc::new(MemoryCache::new());
        cache.put(&fingerprint("Hello."), "es", "Hola.").await.unwrap();
        let mock = MockClient::working();
        let t = translator(mock.clone(), cache);

        let outcome = t
            .translate_batch(0, vec![item(1, "Hello.")], "en", "es", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(mock.call_count(), 0);
        assert_eq!(outcome.translations[0], (1, "Hola.".to_string(), TranslationSource::Cache));
    }

    #[tokio::test]
    async fn test_translateBatch_withTransientFailures_shouldRetryUntilSuccess() {
        let mock = MockClient::fail_first(2);
        let t = translator(mock.clone(), Arc::new(MemoryCache::new()));

        let outcome = t
            .translate_batch(0, vec![item(1, "Hello.")], "en", "es", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(mock.call_count(), 3);
        assert_eq!(outcome.client_calls, 3);
    }

    #[tokio::test]
    async fn test_translateBatch_withShortResponse_shouldExhaustAsRetryable() {
        let mock = MockClient::short_response();
        let t = translator(mock.clone(), Arc::new(MemoryCache::new()));

        let err = t
            .translate_batch(0, vec![item(1, "a"), item(2, "b")], "en", "es", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test]
    async fn test_translateBatch_withFatalClientError_shouldNotRetry() {
        let mock = MockClient::failing();
        let t = translator(mock.clone(), Arc::new(MemoryCache::new()));

        let err = t
            .translate_batch(0, vec![item(1, "a")], "en", "es", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::Fatal(_)));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_translateBatch_withConflict_shouldUseOwnResultUnlessStrict() {
        let cache = Arc::new(MemoryCache::new());
        let fp = fingerprint("Hello.");
        let mock = MockClient::working();

        // A concurrent writer lands between lookup and write-back
        struct RacingCache {
            inner: Arc<MemoryCache>,
        }
        #[async_trait::async_trait]
        impl DedupCache for RacingCache {
            async fn get(&self, _fp: &str, _lang: &str) -> Result<Option<String>, CacheError> {
                Ok(None)
            }
            async fn put(&self, fp: &str, lang: &str, text: &str) -> Result<crate::translation::cache::PutOutcome, CacheError> {
                self.inner.put(fp, lang, text).await
            }
            async fn stats(&self) -> Result<crate::database::models::CacheStats, CacheError> {
                self.inner.stats().await
            }
        }
        cache.put(&fp, "es", "Hola (otro).").await.unwrap();
        let racing: Arc<dyn DedupCache> = Arc::new(RacingCache { inner: cache.clone() });

        let lenient = translator(mock.clone(), racing.clone());
        let outcome = lenient
            .translate_batch(0, vec![item(1, "Hello.")], "en", "es", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.conflicts, 1);
        assert_eq!(outcome.translations[0].1, MockClient::translation_of("Hello.", "es"));
        assert_eq!(cache.get(&fp, "es").await.unwrap().as_deref(), Some("Hola (otro)."));

        let strict = translator(mock, racing).with_conflict_policy(ConflictPolicy::Strict);
        let err = strict
            .translate_batch(0, vec![item(1, "Hello.")], "en", "es", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_translateBatch_whenCancelledInFlight_shouldDiscardResult() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let mock = MockClient::working().with_gate(gate.clone());
        let cache = Arc::new(MemoryCache::new());
        let t = translator(mock.clone(), cache.clone());
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::task::yield_now().await;
                cancel.cancel();
                gate.notify_one();
            }
        };
        let (result, _) = tokio::join!(
            t.translate_batch(0, vec![item(1, "Hello.")], "en", "es", &cancel),
            canceller
        );

        assert_eq!(result.unwrap_err(), StageError::Cancelled);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_translateBatches_shouldYieldEveryBatch() {
        let mock = MockClient::working();
        let t = translator(mock.clone(), Arc::new(MemoryCache::new()));
        let batches = vec![vec![item(1, "a")], vec![item(2, "b")], vec![item(3, "c")]];

        let mut outcomes: Vec<BatchOutcome> = t
            .translate_batches(batches, "en".into(), "es".into(), CancellationToken::new())
            .map(|r| r.unwrap())
            .collect()
            .await;
        outcomes.sort_by_key(|o| o.batch_index);

        assert_eq!(outcomes.len(), 3);
        assert_eq!(mock.call_count(), 3);
    }
}
