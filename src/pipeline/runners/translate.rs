use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use std::sync::Arc;

use super::{StageContext, StageOutput, StageRunner};
use crate::errors::StageError;
use crate::pipeline::stage::Stage;
use crate::translation::batch::{plan_batches, BatchLimits, BatchTranslator, TranslationSource, WorkItem};

/// Translates every paragraph of the job that has no translation yet
pub struct TranslateRunner {
    translator: Arc<BatchTranslator>,
    limits: BatchLimits,
}

impl TranslateRunner {
    pub fn new(translator: Arc<BatchTranslator>, limits: BatchLimits) -> Self {
        Self { translator, limits }
    }
}

#[async_trait]
impl StageRunner for TranslateRunner {
    fn stage(&self) -> Stage {
        Stage::Translating
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        ctx.check_cancelled()?;
        let job_id = ctx.job.id.as_str();

        let paragraphs = ctx.repo.get_paragraphs(job_id).await?;
        let total = paragraphs.len();
        if total == 0 {
            return Err(StageError::fatal("no paragraphs to translate"));
        }

        // Paragraphs translated by an earlier run are kept as they are
        let pending: Vec<WorkItem> = paragraphs
            .into_iter()
            .filter(|p| p.translated_text.is_none())
            .map(|p| WorkItem {
                key: p.id,
                fingerprint: p.fingerprint,
                text: p.source_text,
            })
            .collect();
        let mut translated = total - pending.len();
        ctx.progress
            .update(
                translated as f64 / total as f64,
                Some(format!("{}/{} paragraphs translated", translated, total)),
            )
            .await?;

        let texts: Vec<&str> = pending.iter().map(|item| item.text.as_str()).collect();
        let batches: Vec<Vec<WorkItem>> = plan_batches(&texts, &self.limits)
            .into_iter()
            .map(|range| pending[range].to_vec())
            .collect();
        info!(
            "Job {}: {} of {} paragraphs pending in {} batches",
            job_id,
            pending.len(),
            total,
            batches.len()
        );

        let mut outcomes = Box::pin(self.translator.translate_batches(
            batches,
            ctx.job.source_language.clone(),
            ctx.job.target_language.clone(),
            ctx.cancel.clone(),
        ));

        let mut client_calls = 0;
        let mut cache_hits = 0;
        let mut deferred: Option<StageError> = None;

        while let Some(result) = outcomes.next().await {
            match result {
                Ok(outcome) => {
                    // Results that arrive after cancellation are dropped
                    ctx.check_cancelled()?;

                    client_calls += outcome.client_calls;
                    cache_hits += outcome
                        .translations
                        .iter()
                        .filter(|(_, _, source)| *source == TranslationSource::Cache)
                        .count();

                    let updates: Vec<(i64, String)> = outcome
                        .translations
                        .into_iter()
                        .map(|(key, text, _)| (key, text))
                        .collect();
                    translated += ctx.repo.apply_translations(job_id, updates).await?;

                    debug!("Job {}: batch {} applied", job_id, outcome.batch_index + 1);
                    ctx.progress
                        .update(
                            translated as f64 / total as f64,
                            Some(format!("{}/{} paragraphs translated", translated, total)),
                        )
                        .await?;
                }
                Err(StageError::Retryable(message)) => {
                    // Finish the other batches so a retry only redoes this one
                    warn!("Job {}: batch failed after retries: {}", job_id, message);
                    deferred.get_or_insert(StageError::Retryable(message));
                }
                Err(error) => return Err(error),
            }
        }

        if let Some(error) = deferred {
            return Err(error);
        }

        let (total, done) = ctx.repo.paragraph_counts(job_id).await?;
        if done < total {
            return Err(StageError::fatal(format!(
                "{} of {} paragraphs are still untranslated",
                total - done,
                total
            )));
        }

        info!(
            "Job {}: translated {} paragraphs ({} from cache, {} client calls)",
            job_id, total, cache_hits, client_calls
        );
        Ok(StageOutput::detail(format!(
            "{} paragraphs translated, {} client calls",
            total, client_calls
        )))
    }
}
