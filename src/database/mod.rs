/*!
 * Database module for persistent storage of jobs and their artifacts.
 *
 * This module provides SQLite-based persistence for:
 * - Jobs, their stage, percentage and progress event log
 * - The chapter/paragraph worklist with applied translations
 * - The translation cache shared by all jobs
 * - Selected flashcards per chapter
 */

pub mod schema;
pub mod connection;
pub mod repository;
pub mod models;

pub use connection::DatabaseConnection;
pub use repository::{CacheInsert, Repository};
