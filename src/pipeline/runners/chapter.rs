use async_trait::async_trait;
use log::info;
use std::sync::Arc;

use super::{StageContext, StageOutput, StageRunner};
use crate::errors::StageError;
use crate::pipeline::collaborators::Chapterizer;
use crate::pipeline::stage::Stage;

/// Groups extracted blocks into chapters and stores the paragraphs
pub struct ChapterRunner {
    chapterizer: Arc<dyn Chapterizer>,
}

impl ChapterRunner {
    pub fn new(chapterizer: Arc<dyn Chapterizer>) -> Self {
        Self { chapterizer }
    }
}

#[async_trait]
impl StageRunner for ChapterRunner {
    fn stage(&self) -> Stage {
        Stage::Chaptering
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        ctx.check_cancelled()?;
        let reference = ctx
            .job
            .extracted_path
            .as_deref()
            .ok_or_else(|| StageError::fatal("extraction artifact missing"))?;

        let bytes = ctx.artifacts.read(reference).await?;
        let blocks: Vec<String> = serde_json::from_slice(&bytes)
            .map_err(|e| StageError::fatal(format!("extraction artifact is corrupt: {}", e)))?;

        let drafts = self.chapterizer.chapterize(&blocks);
        if drafts.iter().all(|c| c.paragraphs.is_empty()) {
            return Err(StageError::fatal("no paragraphs found in document"));
        }
        ctx.progress.update(0.5, None).await?;

        // Replaces anything a previous, interrupted run stored
        let (chapters, paragraphs) = ctx.repo.replace_document(&ctx.job.id, drafts).await?;
        ctx.progress
            .update(1.0, Some(format!("{} chapters, {} paragraphs", chapters, paragraphs)))
            .await?;

        info!("Job {}: {} chapters, {} paragraphs", ctx.job.id, chapters, paragraphs);
        Ok(StageOutput::detail(format!("{} chapters, {} paragraphs", chapters, paragraphs)))
    }
}
