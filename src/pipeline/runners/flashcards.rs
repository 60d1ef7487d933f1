use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::{StageContext, StageOutput, StageRunner};
use crate::app_config::FlashcardConfig;
use crate::database::models::{ArtifactRef, FlashcardRecord};
use crate::errors::StageError;
use crate::flashcards::{tokenize, CorpusStats, Lexicon, RankedWord, RankingEngine, TokenizedChapter};
use crate::pipeline::stage::Stage;
use crate::translation::batch::{plan_batches, BatchLimits, BatchTranslator, WorkItem};
use crate::translation::fingerprint::fingerprint;

/// Artifact name of the exported deck
pub const DECK_ARTIFACT: &str = "flashcards.csv";

#[derive(Debug, Serialize)]
struct DeckRow<'a> {
    chapter: i64,
    lemma: &'a str,
    pos: &'a str,
    score: f64,
    definition: &'a str,
    example: &'a str,
}

/// Selects study vocabulary per chapter and exports the deck
pub struct FlashcardRunner {
    translator: Arc<BatchTranslator>,
    limits: BatchLimits,
    settings: FlashcardConfig,
}

impl FlashcardRunner {
    pub fn new(translator: Arc<BatchTranslator>, limits: BatchLimits, settings: FlashcardConfig) -> Self {
        Self {
            translator,
            limits,
            settings,
        }
    }

    /// Definition lookups for `words`, keyed by rank and split like paragraphs
    fn definition_batches(words: &[RankedWord], limits: &BatchLimits) -> Vec<Vec<WorkItem>> {
        let items: Vec<WorkItem> = words
            .iter()
            .enumerate()
            .map(|(rank, word)| WorkItem {
                key: rank as i64,
                fingerprint: fingerprint(&word.lemma),
                text: word.lemma.clone(),
            })
            .collect();
        let lemmas: Vec<&str> = words.iter().map(|word| word.lemma.as_str()).collect();
        plan_batches(&lemmas, limits)
            .into_iter()
            .map(|range| items[range].to_vec())
            .collect()
    }

    /// Definitions are the lemmas translated back into the source language
    async fn define(&self, ctx: &StageContext, words: &[RankedWord]) -> Result<Vec<String>, StageError> {
        let batches = Self::definition_batches(words, &self.limits);
        let mut outcomes = Box::pin(self.translator.translate_batches(
            batches,
            ctx.job.target_language.clone(),
            ctx.job.source_language.clone(),
            ctx.cancel.clone(),
        ));

        let mut definitions: HashMap<i64, String> = HashMap::with_capacity(words.len());
        while let Some(outcome) = outcomes.next().await {
            for (rank, text, _) in outcome?.translations {
                definitions.insert(rank, text);
            }
        }

        (0..words.len() as i64)
            .map(|rank| {
                definitions
                    .remove(&rank)
                    .ok_or_else(|| StageError::fatal(format!("no definition for lemma at rank {}", rank + 1)))
            })
            .collect()
    }

    /// Render cards as CSV with a header row
    pub fn render_csv(cards: &[FlashcardRecord]) -> Result<Vec<u8>, StageError> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        // Written by hand so an empty deck still has a header
        writer
            .write_record(["chapter", "lemma", "pos", "score", "definition", "example"])
            .map_err(StageError::fatal)?;
        for card in cards {
            writer
                .serialize(DeckRow {
                    chapter: card.chapter_index,
                    lemma: &card.lemma,
                    pos: &card.pos,
                    score: card.score,
                    definition: &card.definition,
                    example: &card.example,
                })
                .map_err(StageError::fatal)?;
        }
        writer.into_inner().map_err(StageError::fatal)
    }
}

#[async_trait]
impl StageRunner for FlashcardRunner {
    fn stage(&self) -> Stage {
        Stage::Flashcards
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        ctx.check_cancelled()?;
        let job = &ctx.job;

        let lexicon = Lexicon::for_language(self.settings.lexicon_dir.as_deref(), &job.target_language)
            .map_err(|e| StageError::fatal(format!("{:#}", e)))?;
        let engine = RankingEngine::new(Arc::new(lexicon), &job.target_language, self.settings.pos_boost);

        let chapters = ctx.repo.get_chapters(&job.id).await?;
        let paragraphs = ctx.repo.get_paragraphs(&job.id).await?;

        let mut tokenized: Vec<TokenizedChapter> = Vec::with_capacity(chapters.len());
        for chapter in &chapters {
            let texts = paragraphs
                .iter()
                .filter(|p| p.chapter_index == chapter.chapter_index)
                .map(|p| {
                    p.translated_text.as_deref().ok_or_else(|| {
                        StageError::fatal(format!("chapter {} has untranslated paragraphs", chapter.chapter_index))
                    })
                })
                .collect::<Result<Vec<&str>, StageError>>()?;
            tokenized.push(tokenize(&texts));
        }
        let corpus = CorpusStats::from_chapters(&tokenized);

        for (i, (chapter, tokens)) in chapters.iter().zip(&tokenized).enumerate() {
            ctx.check_cancelled()?;

            let ranked = engine.rank(tokens, &corpus);
            let selected = RankingEngine::select(&ranked, self.settings.top_n);

            let definitions = self.define(ctx, &selected).await?;

            let cards: Vec<FlashcardRecord> = selected
                .iter()
                .zip(definitions)
                .enumerate()
                .map(|(rank, (word, definition))| FlashcardRecord {
                    chapter_index: chapter.chapter_index,
                    rank: rank as i64 + 1,
                    lemma: word.lemma.clone(),
                    pos: word.pos.to_string(),
                    score: word.score,
                    definition,
                    example: tokens.first_sentence_with(&word.lemma).unwrap_or_default().to_string(),
                })
                .collect();

            debug!(
                "Job {}: chapter {} yields {} cards from {} ranked lemmas",
                job.id,
                chapter.chapter_index,
                cards.len(),
                ranked.len()
            );
            ctx.repo.replace_flashcards(&job.id, chapter.chapter_index, cards).await?;
            ctx.progress
                .update((i + 1) as f64 / chapters.len() as f64 * 0.9, None)
                .await?;
        }

        let cards = ctx.repo.get_flashcards(&job.id).await?;
        let csv = Self::render_csv(&cards)?;
        let reference = ctx.artifacts.write(&job.id, DECK_ARTIFACT, &csv).await?;
        ctx.progress
            .update(1.0, Some(format!("{} flashcards", cards.len())))
            .await?;

        info!("Job {}: {} flashcards written to {}", job.id, cards.len(), reference);
        Ok(StageOutput::with_artifact(
            ArtifactRef::Deck(reference),
            format!("{} flashcards", cards.len()),
        ))
    }
}
