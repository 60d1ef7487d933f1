/*!
 * Job orchestrator.
 *
 * Drives jobs through `Stage::SEQUENCE`. Every transition is a single
 * compare-and-set on the persisted stage, so after a restart a job is
 * simply re-entered at its stored stage and that stage's runner runs again.
 *
 * Stages of one job are serialized by a per-job lock; different jobs run
 * in parallel. Retryable stage failures are retried with exponential
 * backoff, and the attempt count is persisted so the budget holds across
 * restarts.
 */

use anyhow::Result;
use futures::future::join_all;
use futures::Stream;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::collaborators::{
    ArtifactStore, HeadingChapterizer, LocalArtifactStore, MarkdownAssembler, PlainTextExtractor,
};
use super::progress::{ProgressHub, StageProgress};
use super::runners::{
    AssembleRunner, ChapterRunner, ExtractRunner, FinalizeRunner, FlashcardRunner, StageContext,
    StageOutput, StageRunner, TranslateRunner,
};
use super::stage::Stage;
use crate::app_config::Config;
use crate::database::models::{ArtifactRef, JobEventRecord, JobRecord};
use crate::database::Repository;
use crate::errors::{AppError, StageError};
use crate::language_utils;
use crate::providers::TranslationClient;
use crate::translation::batch::{BatchLimits, BatchTranslator};
use crate::translation::cache::{DedupCache, SqliteCache};
use crate::translation::retry::{RetryPolicy, Sleeper, TokioSleeper};

/// What one call to `advance` did
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// The job moved forward
    Advanced {
        /// Stage that completed
        from: Stage,
        /// Stage now stored on the job
        to: Stage,
    },
    /// The job failed at `stage`
    Failed {
        /// Stage that was running
        stage: Stage,
        /// Error recorded on the job
        error: String,
    },
    /// The job is cancelled and stays at `stage`
    Cancelled {
        /// Stage the job will resume at
        stage: Stage,
    },
    /// The job was already done or failed
    Terminal(Stage),
}

impl AdvanceOutcome {
    /// Whether calling `advance` again can make progress
    pub fn can_continue(&self) -> bool {
        matches!(self, AdvanceOutcome::Advanced { to, .. } if !to.is_terminal())
    }
}

/// Snapshot of a job's progress
#[derive(Debug, Clone, PartialEq)]
pub struct JobState {
    pub stage: Stage,
    pub percentage: f64,
    pub detail: Option<String>,
    pub error: Option<String>,
    pub failed_stage: Option<Stage>,
}

impl From<&JobRecord> for JobState {
    fn from(job: &JobRecord) -> Self {
        Self {
            stage: job.stage,
            percentage: job.percentage,
            detail: job.detail.clone(),
            error: job.error.clone(),
            failed_stage: job.failed_stage,
        }
    }
}

/// Drives jobs through the pipeline
pub struct Orchestrator {
    repo: Repository,
    hub: ProgressHub,
    runners: HashMap<Stage, Arc<dyn StageRunner>>,
    artifacts: Arc<dyn ArtifactStore>,
    stage_retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    job_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cancellations: Mutex<HashMap<String, CancellationToken>>,
}

impl Orchestrator {
    /// Create an orchestrator with the given runners. Later runners for the
    /// same stage replace earlier ones.
    pub fn new(
        repo: Repository,
        artifacts: Arc<dyn ArtifactStore>,
        runners: Vec<Arc<dyn StageRunner>>,
    ) -> Self {
        let runners = runners.into_iter().map(|r| (r.stage(), r)).collect();
        Self {
            hub: ProgressHub::new(repo.clone()),
            repo,
            runners,
            artifacts,
            stage_retry: RetryPolicy::no_retry(),
            sleeper: Arc::new(TokioSleeper),
            job_locks: Mutex::new(HashMap::new()),
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    /// Set the retry policy for whole stages
    pub fn with_stage_retry(mut self, policy: RetryPolicy) -> Self {
        self.stage_retry = policy;
        self
    }

    /// Set the sleeper used between stage attempts
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Build the standard pipeline from configuration
    pub fn from_config(config: &Config, repo: Repository, client: Arc<dyn TranslationClient>) -> Result<Self> {
        Self::from_config_with_sleeper(config, repo, client, Arc::new(TokioSleeper))
    }

    /// Build the standard pipeline with a custom sleeper for every backoff
    pub fn from_config_with_sleeper(
        config: &Config,
        repo: Repository,
        client: Arc<dyn TranslationClient>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        let limits = BatchLimits::from_config(&config.translation);
        limits.validate()?;

        let cache: Arc<dyn DedupCache> = Arc::new(SqliteCache::new(repo.clone()));
        let translator = Arc::new(
            BatchTranslator::new(
                client,
                cache,
                RetryPolicy::from(&config.retry.batch),
                sleeper.clone(),
                config.translation.worker_count,
            )
            .with_conflict_policy(config.translation.conflict_policy),
        );
        let artifacts: Arc<dyn ArtifactStore> = Arc::new(LocalArtifactStore::new(&config.storage.artifact_dir));

        let runners: Vec<Arc<dyn StageRunner>> = vec![
            Arc::new(ExtractRunner::new(Arc::new(PlainTextExtractor::new(config.max_input_bytes())))),
            Arc::new(ChapterRunner::new(Arc::new(HeadingChapterizer))),
            Arc::new(TranslateRunner::new(translator.clone(), limits)),
            Arc::new(AssembleRunner::new(Arc::new(MarkdownAssembler))),
            Arc::new(FlashcardRunner::new(translator, limits, config.flashcards.clone())),
            Arc::new(FinalizeRunner::new()),
        ];

        Ok(Self::new(repo, artifacts, runners)
            .with_stage_retry(RetryPolicy::from(&config.retry.stage))
            .with_sleeper(sleeper))
    }

    /// Repository the orchestrator persists to
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Progress hub of this orchestrator
    pub fn progress_hub(&self) -> &ProgressHub {
        &self.hub
    }

    fn job_lock(&self, job_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.job_locks
            .lock()
            .entry(job_id.to_string())
            .or_default()
            .clone()
    }

    fn cancellation(&self, job_id: &str) -> CancellationToken {
        self.cancellations
            .lock()
            .entry(job_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the job's lock once no other call holds it, and its token once
    /// the job is terminal or the token was never cancelled.
    fn release(&self, job_id: &str, terminal: bool) {
        let mut locks = self.job_locks.lock();
        let idle = locks.get(job_id).is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(job_id);
        }

        let mut cancellations = self.cancellations.lock();
        let finished_with = cancellations
            .get(job_id)
            .is_some_and(|token| terminal || (idle && !token.is_cancelled()));
        if finished_with {
            cancellations.remove(job_id);
        }
    }

    async fn load_job(&self, job_id: &str) -> Result<JobRecord, AppError> {
        self.repo
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(job_id.to_string()))
    }

    /// Accept a document for processing
    pub async fn create_job(
        &self,
        source_path: &Path,
        source_language: &str,
        target_language: &str,
    ) -> Result<JobRecord, AppError> {
        let source_language = language_utils::normalize_to_part1_or_part2t(source_language)
            .map_err(|e| AppError::Config(e.to_string()))?;
        let target_language = language_utils::normalize_to_part1_or_part2t(target_language)
            .map_err(|e| AppError::Config(e.to_string()))?;
        if language_utils::language_codes_match(&source_language, &target_language) {
            return Err(AppError::Config(format!(
                "source and target language are both '{}'",
                source_language
            )));
        }

        let job = JobRecord::new(
            uuid::Uuid::new_v4().to_string(),
            source_path.to_string_lossy().to_string(),
            source_language,
            target_language,
        );
        let event = self.repo.create_job(&job).await?;
        self.hub.publish(&event);

        info!(
            "Job {} created for {} ({} -> {})",
            job.id, job.source_path, job.source_language, job.target_language
        );
        Ok(job)
    }

    /// Run the job's current stage and move it to the next one, or record
    /// its failure.
    pub async fn advance(&self, job_id: &str) -> Result<AdvanceOutcome, AppError> {
        let outcome = {
            let lock = self.job_lock(job_id);
            let _guard = lock.lock().await;
            self.advance_locked(job_id).await
        };

        let terminal = match &outcome {
            Ok(AdvanceOutcome::Terminal(_)) | Ok(AdvanceOutcome::Failed { .. }) => true,
            Ok(AdvanceOutcome::Advanced { to, .. }) => to.is_terminal(),
            Ok(AdvanceOutcome::Cancelled { .. }) => false,
            Err(AppError::JobNotFound(_)) => true,
            Err(_) => false,
        };
        self.release(job_id, terminal);
        outcome
    }

    async fn advance_locked(&self, job_id: &str) -> Result<AdvanceOutcome, AppError> {
        let job = self.load_job(job_id).await?;
        let stage = job.stage;
        if stage.is_terminal() {
            return Ok(AdvanceOutcome::Terminal(stage));
        }

        let cancel = self.cancellation(job_id);
        if cancel.is_cancelled() {
            info!("Job {} is cancelled, staying at {}", job_id, stage);
            return Ok(AdvanceOutcome::Cancelled { stage });
        }

        if stage == Stage::Queued {
            let output = StageOutput::detail("started");
            return self.complete_stage(&job, output).await;
        }

        let runner = self
            .runners
            .get(&stage)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("no runner registered for stage {}", stage)))?;

        loop {
            let attempt = self.repo.record_attempt(job_id).await?;
            info!("Job {}: running {} (attempt {})", job_id, stage, attempt);

            let ctx = StageContext {
                job: job.clone(),
                repo: self.repo.clone(),
                progress: StageProgress::new(self.hub.clone(), job_id, stage),
                cancel: cancel.clone(),
                artifacts: self.artifacts.clone(),
            };

            match runner.run(&ctx).await {
                Ok(output) => return self.complete_stage(&job, output).await,
                Err(StageError::Cancelled) => {
                    // An interrupted run does not count against the retry budget
                    self.repo.release_attempt(job_id).await?;
                    info!("Job {} cancelled during {}", job_id, stage);
                    return Ok(AdvanceOutcome::Cancelled { stage });
                }
                Err(e) if e.is_retryable() && attempt < self.stage_retry.max_attempts => {
                    let delay = self.stage_retry.delay_for_attempt(attempt);
                    warn!(
                        "Job {}: {} failed (attempt {}/{}): {}; retrying in {:?}",
                        job_id,
                        stage,
                        attempt,
                        self.stage_retry.max_attempts,
                        e.message(),
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(AdvanceOutcome::Cancelled { stage }),
                        _ = self.sleeper.sleep(delay) => {}
                    }
                }
                Err(e) => {
                    let message = if e.is_retryable() {
                        format!("{} (gave up after {} attempts)", e.message(), attempt)
                    } else {
                        e.message()
                    };
                    return self.fail(&job, message).await;
                }
            }
        }
    }

    /// Check the produced artifact and move the job forward
    async fn complete_stage(&self, job: &JobRecord, output: StageOutput) -> Result<AdvanceOutcome, AppError> {
        let from = job.stage;
        let to = from
            .next()
            .ok_or_else(|| AppError::Unknown(format!("stage {} has no successor", from)))?;

        if let Err(message) = self.check_precondition(job, to, output.artifact.as_ref()).await? {
            return self.fail(job, message).await;
        }

        let event = self
            .repo
            .transition_stage(&job.id, from, to, output.artifact, Some(output.detail))
            .await?
            .ok_or_else(|| {
                AppError::Stage(StageError::fatal(format!(
                    "job {} left stage {} while it was running",
                    job.id, from
                )))
            })?;
        self.hub.publish(&event);

        info!("Job {}: {} -> {} ({:.0}%)", job.id, from, to, event.percentage);
        Ok(AdvanceOutcome::Advanced { from, to })
    }

    async fn fail(&self, job: &JobRecord, message: String) -> Result<AdvanceOutcome, AppError> {
        error!("Job {} failed at {}: {}", job.id, job.stage, message);
        if let Some(event) = self.repo.fail_job(&job.id, job.stage, &message).await? {
            self.hub.publish(&event);
        }
        Ok(AdvanceOutcome::Failed {
            stage: job.stage,
            error: message,
        })
    }

    /// Structural check of the input `to` will consume. The outer result
    /// carries storage errors, the inner one a violated precondition.
    async fn check_precondition(
        &self,
        job: &JobRecord,
        to: Stage,
        artifact: Option<&ArtifactRef>,
    ) -> Result<std::result::Result<(), String>, AppError> {
        // A stage only ever produces its own kind of artifact
        let produced = artifact.map(ArtifactRef::path);

        match to {
            Stage::Extracting => {
                if !Path::new(&job.source_path).is_file() {
                    return Ok(Err(format!("source document {} not found", job.source_path)));
                }
            }
            Stage::Chaptering => {
                let Some(path) = produced.or(job.extracted_path.as_deref()) else {
                    return Ok(Err("extraction produced no artifact".to_string()));
                };
                let bytes = match self.artifacts.read(path).await {
                    Ok(bytes) => bytes,
                    Err(e) => return Ok(Err(format!("extraction artifact unreadable: {:#}", e))),
                };
                match serde_json::from_slice::<Vec<String>>(&bytes) {
                    Ok(blocks) if !blocks.is_empty() => {}
                    _ => return Ok(Err("extraction artifact has no text blocks".to_string())),
                }
            }
            Stage::Translating => {
                let (total, _) = self.repo.paragraph_counts(&job.id).await?;
                if total == 0 {
                    return Ok(Err("chaptering produced no paragraphs".to_string()));
                }
            }
            Stage::Assembling => {
                let (total, translated) = self.repo.paragraph_counts(&job.id).await?;
                if total == 0 || translated < total {
                    return Ok(Err(format!("{} of {} paragraphs translated", translated, total)));
                }
            }
            Stage::Flashcards => {
                if !self.artifact_exists(produced.or(job.book_path.as_deref())).await {
                    return Ok(Err("book artifact missing".to_string()));
                }
            }
            Stage::Finalizing => {
                if !self.artifact_exists(produced.or(job.cards_path.as_deref())).await {
                    return Ok(Err("flashcard deck missing".to_string()));
                }
            }
            Stage::Done => {
                if !self.artifact_exists(job.book_path.as_deref()).await
                    || !self.artifact_exists(job.cards_path.as_deref()).await
                {
                    return Ok(Err("artifacts missing at completion".to_string()));
                }
            }
            Stage::Queued | Stage::Failed => {}
        }
        Ok(Ok(()))
    }

    async fn artifact_exists(&self, reference: Option<&str>) -> bool {
        match reference {
            Some(reference) => self.artifacts.exists(reference).await,
            None => false,
        }
    }

    /// Advance until the job is done, failed or cancelled
    pub async fn run_to_completion(&self, job_id: &str) -> Result<JobRecord, AppError> {
        loop {
            let outcome = self.advance(job_id).await?;
            if !outcome.can_continue() {
                break;
            }
        }
        self.load_job(job_id).await
    }

    /// Stage, percentage and last detail of a job
    pub async fn current_state(&self, job_id: &str) -> Result<JobState, AppError> {
        let job = self.load_job(job_id).await?;
        Ok(JobState::from(&job))
    }

    /// Progress events of a job until it is done or failed
    pub fn subscribe(&self, job_id: &str) -> impl Stream<Item = JobEventRecord> + Send + 'static {
        self.hub.subscribe(job_id)
    }

    /// Request cancellation. The running stage stops at its next
    /// suspension point; the job keeps its stage and can be resumed.
    pub async fn cancel(&self, job_id: &str) -> Result<bool, AppError> {
        let job = self.load_job(job_id).await?;
        if job.stage.is_terminal() {
            return Ok(false);
        }
        self.cancellation(job_id).cancel();
        info!("Cancellation requested for job {} at {}", job_id, job.stage);
        Ok(true)
    }

    /// Clear a cancellation and run the job to completion
    pub async fn resume(&self, job_id: &str) -> Result<JobRecord, AppError> {
        {
            let mut cancellations = self.cancellations.lock();
            if cancellations.get(job_id).is_some_and(|t| t.is_cancelled()) {
                cancellations.remove(job_id);
            }
        }
        self.run_to_completion(job_id).await
    }

    /// Resume every job that is neither done nor failed, concurrently
    pub async fn resume_incomplete(&self) -> Result<Vec<(String, Result<JobRecord, AppError>)>, AppError> {
        let jobs = self.repo.list_resumable_jobs().await?;
        if !jobs.is_empty() {
            info!("Resuming {} incomplete jobs", jobs.len());
        }

        let runs = jobs.iter().map(|job| async move {
            let result = self.resume(&job.id).await;
            (job.id.clone(), result)
        });
        Ok(join_all(runs).await)
    }

    /// Run a job to completion on the tokio runtime
    pub fn spawn(self: &Arc<Self>, job_id: &str) -> JoinHandle<Result<JobRecord, AppError>> {
        let orchestrator = Arc::clone(self);
        let job_id = job_id.to_string();
        tokio::spawn(async move { orchestrator.run_to_completion(&job_id).await })
    }
}
