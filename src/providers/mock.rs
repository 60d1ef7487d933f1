/*!
 * Mock translation client for testing.
 *
 * - `MockClient::working()` - Always succeeds
 * - `MockClient::fail_first(n)` - First `n` calls fail with a retryable error
 * - `MockClient::failing()` - Always fails with a fatal error
 * - `MockClient::flaky()` - Always fails with a retryable error
 * - `MockClient::short_response()` - Returns one translation too few
 * - `MockClient::slow(ms)` - Succeeds after a delay
 *
 * Every call is recorded so tests can count billable requests.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use crate::errors::ProviderError;
use crate::providers::TranslationClient;

/// Behavior mode for the mock client
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockBehavior {
    /// Always succeeds
    Working,
    /// The first `failures` calls fail with a rate-limit error
    FailFirst { failures: usize },
    /// Always fails with a fatal error
    Failing,
    /// Always fails with a retryable error
    Flaky,
    /// Drops the last translation of every batch
    ShortResponse,
    /// Succeeds after `delay_ms`
    Slow { delay_ms: u64 },
}

/// Mock client for testing translation behavior
#[derive(Debug, Clone)]
pub struct MockClient {
    /// Behavior mode
    behavior: MockBehavior,
    /// Number of calls so far
    request_count: Arc<AtomicUsize>,
    /// Texts of every call, in call order
    requests: Arc<Mutex<Vec<Vec<String>>>>,
    /// When set, each call waits for a notification before answering
    gate: Option<Arc<Notify>>,
}

impl MockClient {
    /// Create a new mock client with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            request_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            gate: None,
        }
    }

    /// Mock that always succeeds
    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    /// Mock whose first `failures` calls fail with a retryable error
    pub fn fail_first(failures: usize) -> Self {
        Self::new(MockBehavior::FailFirst { failures })
    }

    /// Mock that always fails fatally
    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    /// Mock that always fails with a retryable error
    pub fn flaky() -> Self {
        Self::new(MockBehavior::Flaky)
    }

    /// Mock that returns one translation too few
    pub fn short_response() -> Self {
        Self::new(MockBehavior::ShortResponse)
    }

    /// Mock that answers after a delay
    pub fn slow(delay_ms: u64) -> Self {
        Self::new(MockBehavior::Slow { delay_ms })
    }

    /// Hold every call until `gate` is notified
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// The translation this mock produces for `text`
    pub fn translation_of(text: &str, target_language: &str) -> String {
        format!("[TRANSLATED to {}] {}", target_language, text)
    }

    /// Number of calls so far
    pub fn call_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Texts of every call, in call order
    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().clone()
    }

    /// Total number of texts sent across all calls
    pub fn texts_sent(&self) -> usize {
        self.requests.lock().iter().map(Vec::len).sum()
    }

    fn translate_all(texts: &[String], target_language: &str) -> Vec<String> {
        texts.iter().map(|t| Self::translation_of(t, target_language)).collect()
    }
}

#[async_trait]
impl TranslationClient for MockClient {
    async fn translate_batch(
        &self,
        texts: &[String],
        _source_language: &str,
        target_language: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(texts.to_vec());

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        match self.behavior {
            MockBehavior::Working => Ok(Self::translate_all(texts, target_language)),

            MockBehavior::FailFirst { failures } => {
                if count < failures {
                    Err(ProviderError::RateLimitExceeded(format!("simulated failure {}", count + 1)))
                } else {
                    Ok(Self::translate_all(texts, target_language))
                }
            }

            MockBehavior::Failing => Err(ProviderError::AuthenticationError(
                "simulated invalid credentials".to_string(),
            )),

            MockBehavior::Flaky => Err(ProviderError::ConnectionError("simulated reset".to_string())),

            MockBehavior::ShortResponse => {
                let mut out = Self::translate_all(texts, target_language);
                out.pop();
                Ok(out)
            }

            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(Self::translate_all(texts, target_language))
            }
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
