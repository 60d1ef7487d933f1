use async_trait::async_trait;
use log::info;
use std::path::Path;
use std::sync::Arc;

use super::{StageContext, StageOutput, StageRunner};
use crate::database::models::ArtifactRef;
use crate::errors::StageError;
use crate::pipeline::collaborators::TextExtractor;
use crate::pipeline::stage::Stage;

/// Artifact name of the extracted block list
pub const EXTRACTED_ARTIFACT: &str = "extracted.json";

/// Pulls text blocks out of the source document
pub struct ExtractRunner {
    extractor: Arc<dyn TextExtractor>,
}

impl ExtractRunner {
    pub fn new(extractor: Arc<dyn TextExtractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl StageRunner for ExtractRunner {
    fn stage(&self) -> Stage {
        Stage::Extracting
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        ctx.check_cancelled()?;
        let blocks = self.extractor.extract(Path::new(&ctx.job.source_path)).await?;
        if blocks.is_empty() {
            return Err(StageError::fatal("document contains no text"));
        }
        ctx.progress
            .update(0.6, Some(format!("extracted {} blocks", blocks.len())))
            .await?;

        let json = serde_json::to_vec(&blocks).map_err(StageError::fatal)?;
        let reference = ctx.artifacts.write(&ctx.job.id, EXTRACTED_ARTIFACT, &json).await?;
        ctx.progress.update(1.0, None).await?;

        info!("Job {}: extracted {} blocks", ctx.job.id, blocks.len());
        Ok(StageOutput::with_artifact(
            ArtifactRef::Extracted(reference),
            format!("{} text blocks", blocks.len()),
        ))
    }
}
