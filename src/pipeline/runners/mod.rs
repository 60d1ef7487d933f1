/*!
 * Stage runners.
 *
 * A runner executes one working stage of a job from start to finish. It
 * reads its input from the repository or the artifact store, reports
 * progress inside its stage band and returns either the artifact it
 * produced or a classified `StageError`.
 *
 * Runners are re-entrant: after a crash or a retry the orchestrator runs
 * the same stage again, and a second run must reuse whatever the first
 * one already finished.
 */

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::collaborators::ArtifactStore;
use super::progress::StageProgress;
use super::stage::Stage;
use crate::database::models::{ArtifactRef, JobRecord};
use crate::database::Repository;
use crate::errors::StageError;

pub use self::assemble::AssembleRunner;
pub use self::chapter::ChapterRunner;
pub use self::extract::ExtractRunner;
pub use self::finalize::FinalizeRunner;
pub use self::flashcards::FlashcardRunner;
pub use self::translate::TranslateRunner;

pub mod assemble;
pub mod chapter;
pub mod extract;
pub mod finalize;
pub mod flashcards;
pub mod translate;

/// Everything a runner needs for one run
pub struct StageContext {
    /// Job as loaded before the run
    pub job: JobRecord,
    /// Persistent state
    pub repo: Repository,
    /// Progress reporter for the running stage
    pub progress: StageProgress,
    /// Fires when the job is cancelled
    pub cancel: CancellationToken,
    /// Artifact storage
    pub artifacts: Arc<dyn ArtifactStore>,
}

impl StageContext {
    /// Fail with `Cancelled` if the job was cancelled
    pub fn check_cancelled(&self) -> Result<(), StageError> {
        if self.cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        Ok(())
    }
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    /// Artifact to record on the job
    pub artifact: Option<ArtifactRef>,
    /// Summary for the transition event
    pub detail: String,
}

impl StageOutput {
    /// Output without an artifact
    pub fn detail(detail: impl Into<String>) -> Self {
        Self {
            artifact: None,
            detail: detail.into(),
        }
    }

    /// Output with an artifact
    pub fn with_artifact(artifact: ArtifactRef, detail: impl Into<String>) -> Self {
        Self {
            artifact: Some(artifact),
            detail: detail.into(),
        }
    }
}

/// One working stage of the pipeline
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Stage this runner executes
    fn stage(&self) -> Stage;

    /// Run the stage for `ctx.job`
    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError>;
}
