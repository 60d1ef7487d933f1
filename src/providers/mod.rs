/*!
 * Translation client adapters.
 *
 * Every backend implements `TranslationClient`, which translates a batch
 * of texts in one call and returns one translation per input, in order.
 * Failures are reported as `ProviderError`, whose classification decides
 * whether the batch is retried.
 *
 * - `stub`: offline deterministic backend
 * - `openai`: OpenAI-compatible chat completions endpoint
 * - `mock`: scripted behaviors for tests
 */

use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use crate::app_config::{ProviderKind, TranslationConfig};
use crate::errors::ProviderError;

pub mod mock;
pub mod openai;
pub mod stub;

/// Common trait for all translation backends
#[async_trait]
pub trait TranslationClient: Send + Sync + Debug {
    /// Translate `texts` from `source_language` to `target_language`.
    ///
    /// On success the result has exactly one entry per input, in input order.
    async fn translate_batch(
        &self,
        texts: &[String],
        source_language: &str,
        target_language: &str,
    ) -> Result<Vec<String>, ProviderError>;

    /// Short backend name for logs
    fn name(&self) -> &str;
}

/// Build the configured client
pub fn create_client(config: &TranslationConfig) -> Result<Arc<dyn TranslationClient>> {
    let client: Arc<dyn TranslationClient> = match config.provider {
        ProviderKind::Stub => Arc::new(stub::StubClient::new()),
        ProviderKind::OpenAI => Arc::new(openai::OpenAIClient::from_config(config)?),
    };
    Ok(client)
}

/// Separator markers used when several texts travel in one prompt
pub mod markers {
    use crate::errors::ProviderError;

    /// Terminal marker
    pub const END: &str = "<<END>>";

    /// Marker that precedes entry `index`
    pub fn entry(index: usize) -> String {
        format!("<<ENTRY_{}>>", index)
    }

    /// Join texts into one marked-up payload
    pub fn pack(texts: &[String]) -> String {
        let mut combined = String::new();
        for (index, text) in texts.iter().enumerate() {
            combined.push_str(&entry(index));
            combined.push('\n');
            combined.push_str(text);
            combined.push('\n');
        }
        combined.push_str(END);
        combined
    }

    /// Split a marked-up reply back into `expected` texts
    pub fn unpack(reply: &str, expected: usize) -> Result<Vec<String>, ProviderError> {
        let mut texts = Vec::with_capacity(expected);
        let mut cursor = 0;

        for index in 0..expected {
            let start_marker = entry(index);
            let end_marker = if index + 1 == expected { END.to_string() } else { entry(index + 1) };

            let start = reply[cursor..]
                .find(&start_marker)
                .map(|pos| cursor + pos + start_marker.len())
                .ok_or(ProviderError::ShapeMismatch { expected, actual: index })?;
            let end = reply[start..]
                .find(&end_marker)
                .map(|pos| start + pos)
                .ok_or(ProviderError::ShapeMismatch { expected, actual: index })?;

            texts.push(reply[start..end].trim().to_string());
            cursor = end;
        }

        Ok(texts)
    }
}
