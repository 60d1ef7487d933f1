/*!
 * Resumable document pipeline.
 *
 * - `stage`: the stage sequence and progress bands
 * - `progress`: persisted progress events and live subscriptions
 * - `collaborators`: extraction, chaptering, assembly and artifact storage
 * - `runners`: one runner per working stage
 * - `orchestrator`: drives jobs from `queued` to `done` or `failed`
 */

pub use self::orchestrator::{AdvanceOutcome, JobState, Orchestrator};
pub use self::progress::{ProgressHub, StageProgress};
pub use self::runners::{StageContext, StageOutput, StageRunner};
pub use self::stage::Stage;

pub mod collaborators;
pub mod orchestrator;
pub mod progress;
pub mod runners;
pub mod stage;
