use async_trait::async_trait;
use log::info;
use serde::Serialize;

use super::{StageContext, StageOutput, StageRunner};
use crate::errors::StageError;
use crate::pipeline::stage::Stage;

/// Artifact name of the job manifest
pub const MANIFEST_ARTIFACT: &str = "manifest.json";

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    job_id: &'a str,
    source_path: &'a str,
    source_language: &'a str,
    target_language: &'a str,
    chapters: usize,
    paragraphs: usize,
    flashcards: usize,
    book: &'a str,
    deck: &'a str,
    created_at: &'a str,
    finished_at: String,
}

/// Verifies the produced artifacts and writes the manifest
#[derive(Debug, Default)]
pub struct FinalizeRunner;

impl FinalizeRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageRunner for FinalizeRunner {
    fn stage(&self) -> Stage {
        Stage::Finalizing
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        ctx.check_cancelled()?;
        let job = &ctx.job;

        let book = job
            .book_path
            .as_deref()
            .ok_or_else(|| StageError::fatal("book artifact missing"))?;
        let deck = job
            .cards_path
            .as_deref()
            .ok_or_else(|| StageError::fatal("flashcard deck missing"))?;
        for reference in [book, deck] {
            if !ctx.artifacts.exists(reference).await {
                return Err(StageError::fatal(format!("artifact {} not found", reference)));
            }
        }

        let chapters = ctx.repo.get_chapters(&job.id).await?.len();
        let (paragraphs, _) = ctx.repo.paragraph_counts(&job.id).await?;
        let flashcards = ctx.repo.get_flashcards(&job.id).await?.len();
        ctx.progress.update(0.5, None).await?;

        let manifest = Manifest {
            job_id: &job.id,
            source_path: &job.source_path,
            source_language: &job.source_language,
            target_language: &job.target_language,
            chapters,
            paragraphs,
            flashcards,
            book,
            deck,
            created_at: &job.created_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_vec_pretty(&manifest).map_err(StageError::fatal)?;
        ctx.artifacts.write(&job.id, MANIFEST_ARTIFACT, &json).await?;
        ctx.progress.update(1.0, None).await?;

        info!("Job {}: finalized ({} flashcards)", job.id, flashcards);
        Ok(StageOutput::detail("artifacts verified"))
    }
}
