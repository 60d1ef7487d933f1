/*!
 * # bookling
 *
 * Turns a document into a translated book and a per-chapter vocabulary
 * deck through a resumable, multi-stage pipeline.
 *
 * ## Features
 *
 * - Resumable jobs: every stage transition is persisted, and a restarted
 *   process continues each job at the stage it stopped in
 * - Paragraph translation in bounded batches with retry and backoff
 * - Cross-job deduplication: a paragraph already translated into a
 *   language is never sent to the translation backend again
 * - Deterministic flashcard selection from lexicon rarity and chapter
 *   frequencies
 * - Live progress subscriptions backed by a persisted event log
 *
 * ## Architecture
 *
 * - `app_config`: Configuration management
 * - `pipeline`: Orchestrator, stage runners, progress events
 * - `translation`: Batching, dedup cache, fingerprints, retry
 * - `flashcards`: Tokenizer, lexicons, ranking engine
 * - `providers`: Translation backends (stub, OpenAI, mock)
 * - `database`: SQLite persistence
 * - `file_utils`: File system operations
 * - `language_utils`: ISO language code utilities
 * - `errors`: Error types
 */

// Global lints configuration
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod database;
pub mod errors;
pub mod file_utils;
pub mod flashcards;
pub mod language_utils;
pub mod pipeline;
pub mod providers;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::Config;
pub use errors::{AppError, CacheError, ProviderError, StageError};
pub use language_utils::{get_language_name, language_codes_match, normalize_to_part2t};
pub use pipeline::{AdvanceOutcome, JobState, Orchestrator, Stage};
