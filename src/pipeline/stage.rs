/*!
 * Job stages and their progress bands.
 *
 * A job moves strictly forward through `Stage::SEQUENCE`. The stage stored
 * on a job is the stage that still has to run; `Done` and `Failed` are
 * terminal. Each working stage owns a contiguous band of the overall
 * percentage, and the bands tile 0..=100 in sequence order.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle stage of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Accepted, nothing has run yet
    Queued,
    /// Raw text blocks are being pulled from the source document
    Extracting,
    /// Blocks are being grouped into chapters and paragraphs
    Chaptering,
    /// Paragraphs are being translated in batches
    Translating,
    /// The translated book is being written
    Assembling,
    /// Vocabulary decks are being built per chapter
    Flashcards,
    /// Artifacts are being verified and the manifest written
    Finalizing,
    /// All artifacts are available
    Done,
    /// A fatal error stopped the job
    Failed,
}

impl Stage {
    /// Forward order of non-failure stages
    pub const SEQUENCE: [Stage; 8] = [
        Stage::Queued,
        Stage::Extracting,
        Stage::Chaptering,
        Stage::Translating,
        Stage::Assembling,
        Stage::Flashcards,
        Stage::Finalizing,
        Stage::Done,
    ];

    /// Stages that run a stage runner
    pub const WORKING: [Stage; 6] = [
        Stage::Extracting,
        Stage::Chaptering,
        Stage::Translating,
        Stage::Assembling,
        Stage::Flashcards,
        Stage::Finalizing,
    ];

    /// The stage that follows this one, if any
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Queued => Some(Stage::Extracting),
            Stage::Extracting => Some(Stage::Chaptering),
            Stage::Chaptering => Some(Stage::Translating),
            Stage::Translating => Some(Stage::Assembling),
            Stage::Assembling => Some(Stage::Flashcards),
            Stage::Flashcards => Some(Stage::Finalizing),
            Stage::Finalizing => Some(Stage::Done),
            Stage::Done | Stage::Failed => None,
        }
    }

    /// Percentage band `(start, end)` owned by this stage
    pub fn band(self) -> (f64, f64) {
        match self {
            Stage::Queued => (0.0, 0.0),
            Stage::Extracting => (0.0, 10.0),
            Stage::Chaptering => (10.0, 15.0),
            Stage::Translating => (15.0, 75.0),
            Stage::Assembling => (75.0, 85.0),
            Stage::Flashcards => (85.0, 97.0),
            Stage::Finalizing => (97.0, 100.0),
            Stage::Done => (100.0, 100.0),
            Stage::Failed => (0.0, 100.0),
        }
    }

    /// Map a fraction of this stage's work onto the overall percentage
    pub fn percentage_at(self, fraction: f64) -> f64 {
        let (start, end) = self.band();
        start + (end - start) * fraction.clamp(0.0, 1.0)
    }

    /// Whether no further transition can happen
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// Whether a stage runner exists for this stage
    pub fn is_working(self) -> bool {
        Self::WORKING.contains(&self)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Queued => "queued",
            Stage::Extracting => "extracting",
            Stage::Chaptering => "chaptering",
            Stage::Translating => "translating",
            Stage::Assembling => "assembling",
            Stage::Flashcards => "flashcards",
            Stage::Finalizing => "finalizing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(Stage::Queued),
            "extracting" => Ok(Stage::Extracting),
            "chaptering" => Ok(Stage::Chaptering),
            "translating" => Ok(Stage::Translating),
            "assembling" => Ok(Stage::Assembling),
            "flashcards" => Ok(Stage::Flashcards),
            "finalizing" => Ok(Stage::Finalizing),
            "done" => Ok(Stage::Done),
            "failed" => Ok(Stage::Failed),
            _ => Err(anyhow::anyhow!("Invalid stage: {}", s)),
        }
    }
}
