use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::language_utils;
use crate::providers::TranslationClient;

/// Offline backend that tags each text with the target language.
///
/// Output is `"[<target>] <text>"`, which keeps runs reproducible without
/// network access.
#[derive(Debug, Default, Clone)]
pub struct StubClient;

impl StubClient {
    /// Create a new stub client
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TranslationClient for StubClient {
    async fn translate_batch(
        &self,
        texts: &[String],
        source_language: &str,
        target_language: &str,
    ) -> Result<Vec<String>, ProviderError> {
        for code in [source_language, target_language] {
            language_utils::validate_language_code(code)
                .map_err(|_| ProviderError::UnsupportedLanguage(code.to_string()))?;
        }

        Ok(texts
            .iter()
            .map(|text| format!("[{}] {}", target_language, text))
            .collect())
    }

    fn name(&self) -> &str {
        "stub"
    }
}
