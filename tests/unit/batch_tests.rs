/*!
 * Tests for batch planning and the batch executor
 */

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use bookling::errors::StageError;
use bookling::providers::mock::MockClient;
use bookling::translation::batch::TranslationSource;
use bookling::translation::retry::RecordingSleeper;
use bookling::translation::{fingerprint, plan_batches, BatchLimits, BatchTranslator, MemoryCache, RetryPolicy, WorkItem};

fn items(texts: &[&str]) -> Vec<WorkItem> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| WorkItem {
            key: i as i64,
            fingerprint: fingerprint(text),
            text: text.to_string(),
        })
        .collect()
}

fn translator(client: MockClient, retry: RetryPolicy) -> (BatchTranslator, Arc<MockClient>, MemoryCache, RecordingSleeper) {
    let client = Arc::new(client);
    let cache = MemoryCache::new();
    let sleeper = RecordingSleeper::new();
    let translator = BatchTranslator::new(
        client.clone(),
        Arc::new(cache.clone()),
        retry,
        Arc::new(sleeper.clone()),
        2,
    );
    (translator, client, cache, sleeper)
}

fn batch_retry() -> RetryPolicy {
    RetryPolicy::new(4, Duration::from_millis(1000), 2.0, Duration::from_millis(30_000))
}

#[test]
fn test_planBatches_shouldCoverEveryIndexOnceInOrder() {
    let texts: Vec<String> = (0..37).map(|i| format!("paragraph number {}", i)).collect();
    let limits = BatchLimits::new(8, 4000, 1000).unwrap();

    let batches = plan_batches(&texts, &limits);
    let flattened: Vec<usize> = batches.iter().cloned().flatten().collect();

    assert_eq!(flattened, (0..37).collect::<Vec<_>>());
    assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 8));
    assert_eq!(batches, plan_batches(&texts, &limits));
}

#[test]
fn test_planBatches_withTokenBudget_shouldCloseBatchesEarly() {
    // 40 characters is 10 estimated tokens, budget is 25
    let texts = vec!["a".repeat(40); 5];
    let limits = BatchLimits::new(16, 30, 5).unwrap();

    let batches = plan_batches(&texts, &limits);
    assert_eq!(batches, vec![0..2, 2..4, 4..5]);
}

#[test]
fn test_planBatches_withOversizedText_shouldIsolateIt() {
    let texts = vec!["short".to_string(), "x".repeat(400), "short again".to_string()];
    let limits = BatchLimits::new(16, 50, 10).unwrap();

    let batches = plan_batches(&texts, &limits);
    assert_eq!(batches, vec![0..1, 1..2, 2..3]);
}

#[test]
fn test_batchLimits_withReservedAboveContext_shouldBeRejected() {
    assert!(BatchLimits::new(8, 100, 100).is_err());
    assert!(BatchLimits::new(0, 100, 10).is_err());
}

#[tokio::test]
async fn test_translateBatch_withDuplicateTexts_shouldSendEachOnce() {
    let (translator, client, _, _) = translator(MockClient::working(), batch_retry());
    let batch = items(&["Hello there.", "hello   THERE.", "Goodbye."]);

    let outcome = translator
        .translate_batch(0, batch, "en", "es", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(client.call_count(), 1);
    assert_eq!(client.texts_sent(), 2);
    assert_eq!(outcome.translations.len(), 3);
    assert_eq!(outcome.translations[0].1, outcome.translations[1].1);
}

#[tokio::test]
async fn test_translateBatch_withWarmCache_shouldNotCallClient() {
    let (translator, client, cache, _) = translator(MockClient::working(), batch_retry());
    let cancel = CancellationToken::new();

    translator
        .translate_batch(0, items(&["One.", "Two."]), "en", "fr", &cancel)
        .await
        .unwrap();
    let again = translator
        .translate_batch(0, items(&["One.", "Two."]), "en", "fr", &cancel)
        .await
        .unwrap();

    assert_eq!(client.call_count(), 1);
    assert_eq!(again.client_calls, 0);
    assert!(again.translations.iter().all(|(_, _, s)| *s == TranslationSource::Cache));
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_translateBatch_withTwoTransientFailures_shouldCallClientThreeTimes() {
    let (translator, client, _, sleeper) = translator(MockClient::fail_first(2), batch_retry());

    let outcome = translator
        .translate_batch(0, items(&["Only paragraph."]), "en", "es", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(client.call_count(), 3);
    assert_eq!(outcome.client_calls, 3);
    assert_eq!(sleeper.delays(), vec![Duration::from_millis(1000), Duration::from_millis(2000)]);
}

#[tokio::test]
async fn test_translateBatch_withFatalError_shouldNotRetry() {
    let (translator, client, cache, _) = translator(MockClient::failing(), batch_retry());

    let err = translator
        .translate_batch(0, items(&["Paragraph."]), "en", "es", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(!err.is_retryable());
    assert_eq!(client.call_count(), 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_translateBatch_whenCancelled_shouldNotCallClient() {
    let (translator, client, _, _) = translator(MockClient::working(), batch_retry());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = translator
        .translate_batch(0, items(&["Paragraph."]), "en", "es", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, StageError::Cancelled));
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn test_translateBatches_shouldResolveEveryBatch() {
    let (translator, _, _, _) = translator(MockClient::working(), batch_retry());
    let batches = vec![items(&["A one."]), items(&["B two.", "B three."]), items(&["C four."])];

    let mut outcomes: Vec<_> = translator
        .translate_batches(batches, "en".into(), "de".into(), CancellationToken::new())
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    outcomes.sort_by_key(|o| o.batch_index);

    let sizes: Vec<usize> = outcomes.iter().map(|o| o.translations.len()).collect();
    assert_eq!(sizes, vec![1, 2, 1]);
    assert_eq!(outcomes[1].translations[1].1, MockClient::translation_of("B three.", "de"));
}
