/*!
 * Database entity models and DTOs.
 *
 * These structures map directly to database tables and provide
 * type-safe access to persisted data.
 */

use serde::{Deserialize, Serialize};

use crate::pipeline::stage::Stage;

/// Job record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    /// Unique job identifier (UUID)
    pub id: String,
    /// Path to the source document
    pub source_path: String,
    /// Source language code
    pub source_language: String,
    /// Target language code
    pub target_language: String,
    /// Stage that still has to run, or a terminal stage
    pub stage: Stage,
    /// Overall completion percentage, never decreasing
    pub percentage: f64,
    /// Last human-readable progress detail
    pub detail: Option<String>,
    /// Error message when the job failed
    pub error: Option<String>,
    /// Stage that was running when the job failed
    pub failed_stage: Option<Stage>,
    /// Runs of the current stage so far
    pub attempts: u32,
    /// Extraction artifact (JSON list of text blocks)
    pub extracted_path: Option<String>,
    /// Translated book artifact
    pub book_path: Option<String>,
    /// Flashcard deck artifact
    pub cards_path: Option<String>,
    /// Creation timestamp (ISO 8601)
    pub created_at: String,
    /// Last update timestamp (ISO 8601)
    pub updated_at: String,
}

impl JobRecord {
    /// Create a new queued job record
    pub fn new(id: String, source_path: String, source_language: String, target_language: String) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id,
            source_path,
            source_language,
            target_language,
            stage: Stage::Queued,
            percentage: 0.0,
            detail: None,
            error: None,
            failed_stage: None,
            attempts: 0,
            extracted_path: None,
            book_path: None,
            cards_path: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Check if the job can still make progress
    pub fn is_resumable(&self) -> bool {
        !self.stage.is_terminal()
    }
}

/// Artifact reference recorded on a stage transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactRef {
    /// Extracted text blocks
    Extracted(String),
    /// Assembled translated book
    Book(String),
    /// Flashcard deck export
    Deck(String),
}

impl ArtifactRef {
    /// Column on the jobs table that stores this reference
    pub fn column(&self) -> &'static str {
        match self {
            ArtifactRef::Extracted(_) => "extracted_path",
            ArtifactRef::Book(_) => "book_path",
            ArtifactRef::Deck(_) => "cards_path",
        }
    }

    /// Stored path
    pub fn path(&self) -> &str {
        match self {
            ArtifactRef::Extracted(p) | ArtifactRef::Book(p) | ArtifactRef::Deck(p) => p,
        }
    }
}

/// Persisted progress event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEventRecord {
    /// Job the event belongs to
    pub job_id: String,
    /// Per-job sequence number, starting at 1
    pub seq: i64,
    /// Stage at the time of the event
    pub stage: Stage,
    /// Overall percentage at the time of the event
    pub percentage: f64,
    /// Optional detail message
    pub detail: Option<String>,
    /// Creation timestamp
    pub created_at: String,
}

/// Chapter row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChapterRecord {
    /// Zero-based chapter position
    pub chapter_index: i64,
    /// Heading, when the document had one
    pub title: Option<String>,
}

/// Paragraph row, one unit of translation work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParagraphRecord {
    /// Database ID
    pub id: i64,
    /// Chapter the paragraph belongs to
    pub chapter_index: i64,
    /// Position inside the chapter
    pub position: i64,
    /// Original text
    pub source_text: String,
    /// Content fingerprint of the original text
    pub fingerprint: String,
    /// Translation, once applied
    pub translated_text: Option<String>,
}

/// Chapter with its paragraphs, as produced by chaptering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChapterDraft {
    /// Heading, when the document had one
    pub title: Option<String>,
    /// Paragraph texts in reading order
    pub paragraphs: Vec<String>,
}

/// Flashcard row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlashcardRecord {
    /// Chapter the card was selected from
    pub chapter_index: i64,
    /// 1-based rank inside the chapter
    pub rank: i64,
    /// Dictionary form in the target language
    pub lemma: String,
    /// Part-of-speech tag
    pub pos: String,
    /// Ranking score
    pub score: f64,
    /// Gloss in the source language
    pub definition: String,
    /// Example sentence from the chapter
    pub example: String,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Number of entries in the cache
    pub total_entries: i64,
    /// Total cache hits
    pub total_hits: i64,
}
