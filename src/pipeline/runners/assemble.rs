use async_trait::async_trait;
use log::info;
use std::sync::Arc;

use super::{StageContext, StageOutput, StageRunner};
use crate::database::models::ArtifactRef;
use crate::errors::StageError;
use crate::pipeline::collaborators::Assembler;
use crate::pipeline::stage::Stage;

/// Builds the translated book artifact
pub struct AssembleRunner {
    assembler: Arc<dyn Assembler>,
}

impl AssembleRunner {
    pub fn new(assembler: Arc<dyn Assembler>) -> Self {
        Self { assembler }
    }
}

#[async_trait]
impl StageRunner for AssembleRunner {
    fn stage(&self) -> Stage {
        Stage::Assembling
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        ctx.check_cancelled()?;
        let chapters = ctx.repo.get_chapters(&ctx.job.id).await?;
        let paragraphs = ctx.repo.get_paragraphs(&ctx.job.id).await?;
        ctx.progress.update(0.3, None).await?;

        let reference = self
            .assembler
            .assemble(&ctx.job.id, &chapters, &paragraphs, ctx.artifacts.as_ref())
            .await?;
        ctx.progress.update(1.0, Some("book assembled".to_string())).await?;

        info!("Job {}: book written to {}", ctx.job.id, reference);
        Ok(StageOutput::with_artifact(
            ArtifactRef::Book(reference),
            format!("{} chapters assembled", chapters.len()),
        ))
    }
}
