/*!
 * Paragraph translation machinery shared by the pipeline stages.
 *
 * - `fingerprint`: content keys for deduplication
 * - `cache`: the cross-job dedup cache
 * - `batch`: batch planning and the concurrent batch executor
 * - `retry`: backoff policy and the injectable sleeper
 */

pub use self::batch::{plan_batches, BatchLimits, BatchOutcome, BatchTranslator, WorkItem};
pub use self::cache::{ConflictPolicy, DedupCache, MemoryCache, PutOutcome, SqliteCache};
pub use self::fingerprint::fingerprint;
pub use self::retry::{RetryPolicy, Sleeper, TokioSleeper};

pub mod batch;
pub mod cache;
pub mod fingerprint;
pub mod retry;
