/*!
 * Built-in collaborators for the stages that are not part of the core
 * pipeline: text extraction, chapter detection, book assembly and artifact
 * storage. Each sits behind a trait so a richer implementation can be
 * swapped in without touching the runners.
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::database::models::{ChapterDraft, ChapterRecord, ParagraphRecord};
use crate::errors::StageError;

static MARKDOWN_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#{1,6}\s+\S").expect("Invalid markdown heading regex"));

static CHAPTER_HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(chapter|cap[ií]tulo|chapitre|kapitel|capitolo)\s+([0-9]+|[ivxlcdm]+)\b")
        .expect("Invalid chapter heading regex")
});

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

/// Longest line still treated as a chapter heading
const MAX_HEADING_CHARS: usize = 80;

/// Whether a line opens a new chapter
pub fn is_heading(line: &str) -> bool {
    let line = line.trim();
    if line.chars().count() > MAX_HEADING_CHARS {
        return false;
    }
    MARKDOWN_HEADING_RE.is_match(line) || CHAPTER_HEADING_RE.is_match(line)
}

fn heading_title(line: &str) -> String {
    line.trim().trim_start_matches('#').trim().to_string()
}

fn normalize_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

// ============================================================================
// Extraction
// ============================================================================

/// Turns a source document into ordered text blocks
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract text blocks in reading order
    async fn extract(&self, path: &Path) -> Result<Vec<String>, StageError>;
}

/// Extractor for UTF-8 text and Markdown files
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    max_bytes: u64,
}

impl PlainTextExtractor {
    /// Create an extractor that rejects files above `max_bytes`
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    /// Split text into blocks at blank lines. Heading lines always form a
    /// block of their own.
    pub fn split_blocks(text: &str) -> Vec<String> {
        fn flush(current: &mut Vec<&str>, blocks: &mut Vec<String>) {
            if !current.is_empty() {
                let block = normalize_whitespace(&current.join(" "));
                if !block.is_empty() {
                    blocks.push(block);
                }
                current.clear();
            }
        }

        let mut blocks = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for line in text.lines() {
            if line.trim().is_empty() {
                flush(&mut current, &mut blocks);
            } else if is_heading(line) {
                flush(&mut current, &mut blocks);
                blocks.push(line.trim().to_string());
            } else {
                current.push(line);
            }
        }
        flush(&mut current, &mut blocks);

        blocks
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, path: &Path) -> Result<Vec<String>, StageError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| StageError::fatal(format!("cannot open {}: {}", path.display(), e)))?;
        if !metadata.is_file() {
            return Err(StageError::fatal(format!("{} is not a file", path.display())));
        }
        if metadata.len() > self.max_bytes {
            return Err(StageError::fatal(format!(
                "{} is {} bytes, limit is {}",
                path.display(),
                metadata.len(),
                self.max_bytes
            )));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StageError::retryable(format!("failed to read {}: {}", path.display(), e)))?;
        if bytes.contains(&0) {
            return Err(StageError::fatal(format!("{} looks like a binary file", path.display())));
        }
        let text = String::from_utf8(bytes)
            .map_err(|_| StageError::fatal(format!("{} is not valid UTF-8 text", path.display())))?;
        let text = text.trim_start_matches('\u{feff}');

        let blocks = Self::split_blocks(text);
        if blocks.is_empty() {
            return Err(StageError::fatal(format!("{} contains no text", path.display())));
        }

        debug!("Extracted {} blocks from {}", blocks.len(), path.display());
        Ok(blocks)
    }
}

// ============================================================================
// Chaptering
// ============================================================================

/// Groups text blocks into chapters
pub trait Chapterizer: Send + Sync {
    /// Chapters in reading order; chapters without paragraphs are dropped
    fn chapterize(&self, blocks: &[String]) -> Vec<ChapterDraft>;
}

/// Starts a chapter at every heading block
#[derive(Debug, Clone, Default)]
pub struct HeadingChapterizer;

impl Chapterizer for HeadingChapterizer {
    fn chapterize(&self, blocks: &[String]) -> Vec<ChapterDraft> {
        let mut chapters = Vec::new();
        let mut current = ChapterDraft {
            title: None,
            paragraphs: Vec::new(),
        };

        for block in blocks {
            if is_heading(block) {
                let next = ChapterDraft {
                    title: Some(heading_title(block)),
                    paragraphs: Vec::new(),
                };
                let finished = std::mem::replace(&mut current, next);
                if !finished.paragraphs.is_empty() {
                    chapters.push(finished);
                }
            } else {
                current.paragraphs.push(block.clone());
            }
        }
        if !current.paragraphs.is_empty() {
            chapters.push(current);
        }

        chapters
    }
}

// ============================================================================
// Artifact storage
// ============================================================================

/// Storage for per-job output files
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` as `name` for the job, returning the artifact reference
    async fn write(&self, job_id: &str, name: &str, bytes: &[u8]) -> Result<String>;

    /// Read an artifact by reference
    async fn read(&self, reference: &str) -> Result<Vec<u8>>;

    /// Whether an artifact exists
    async fn exists(&self, reference: &str) -> bool;
}

/// Artifacts under `<root>/<job_id>/<name>` on the local file system
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    /// Store rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn write(&self, job_id: &str, name: &str, bytes: &[u8]) -> Result<String> {
        let dir = self.root.join(job_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create artifact directory: {}", dir.display()))?;

        // Write then rename so a crash never leaves a partial artifact
        let path = dir.join(name);
        let tmp = dir.join(format!(".{}.tmp", name));
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write artifact: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move artifact into place: {}", path.display()))?;

        Ok(path.to_string_lossy().to_string())
    }

    async fn read(&self, reference: &str) -> Result<Vec<u8>> {
        tokio::fs::read(reference)
            .await
            .with_context(|| format!("Failed to read artifact: {}", reference))
    }

    async fn exists(&self, reference: &str) -> bool {
        tokio::fs::metadata(reference).await.is_ok_and(|m| m.is_file())
    }
}

// ============================================================================
// Assembly
// ============================================================================

/// Turns translated chapters into the book artifact
#[async_trait]
pub trait Assembler: Send + Sync {
    /// Build the book and return its artifact reference
    async fn assemble(
        &self,
        job_id: &str,
        chapters: &[ChapterRecord],
        paragraphs: &[ParagraphRecord],
        store: &dyn ArtifactStore,
    ) -> Result<String, StageError>;
}

/// Writes the translated book as `book.md`
#[derive(Debug, Clone, Default)]
pub struct MarkdownAssembler;

impl MarkdownAssembler {
    /// Render chapters as Markdown. Every paragraph must be translated.
    pub fn render(chapters: &[ChapterRecord], paragraphs: &[ParagraphRecord]) -> Result<String, StageError> {
        let mut out = String::new();

        for chapter in chapters {
            let title = chapter
                .title
                .clone()
                .unwrap_or_else(|| (chapter.chapter_index + 1).to_string());
            out.push_str(&format!("# {}\n\n", title));

            for paragraph in paragraphs.iter().filter(|p| p.chapter_index == chapter.chapter_index) {
                let text = paragraph.translated_text.as_deref().ok_or_else(|| {
                    StageError::fatal(format!(
                        "paragraph {} of chapter {} is not translated",
                        paragraph.position, paragraph.chapter_index
                    ))
                })?;
                out.push_str(text);
                out.push_str("\n\n");
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl Assembler for MarkdownAssembler {
    async fn assemble(
        &self,
        job_id: &str,
        chapters: &[ChapterRecord],
        paragraphs: &[ParagraphRecord],
        store: &dyn ArtifactStore,
    ) -> Result<String, StageError> {
        let book = Self::render(chapters, paragraphs)?;
        let reference = store.write(job_id, "book.md", book.as_bytes()).await?;
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isHeading_shouldMatchMarkdownAndChapterLines() {
        assert!(is_heading("# Prólogo"));
        assert!(is_heading("Chapter 12"));
        assert!(is_heading("CAPÍTULO IV: La tormenta"));
        assert!(is_heading("Chapitre 3"));
        assert!(!is_heading("#hashtag"));
        assert!(!is_heading("Chapters of my life were long and full of detail"));
    }

    #[test]
    fn test_splitBlocks_shouldJoinLinesAndIsolateHeadings() {
        let text = "Chapter 1\nThe  first\nline.\n\n\nSecond   block.\n# Part Two\nThird.";
        let blocks = PlainTextExtractor::split_blocks(text);
        assert_eq!(blocks, vec!["Chapter 1", "The first line.", "Second block.", "# Part Two", "Third."]);
    }

    #[test]
    fn test_chapterize_shouldKeepPrefaceAsChapterZeroAndDropEmptyChapters() {
        let blocks: Vec<String> = ["Preface text.", "# One", "# Two", "Body of two."]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let chapters = HeadingChapterizer.chapterize(&blocks);

        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, None);
        assert_eq!(chapters[0].paragraphs, vec!["Preface text."]);
        assert_eq!(chapters[1].title.as_deref(), Some("Two"));
    }

    #[tokio::test]
    async fn test_extract_shouldRejectBinaryEmptyAndOversizedInput() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("b.txt");
        let empty = dir.path().join("e.txt");
        let large = dir.path().join("l.txt");
        std::fs::write(&binary, [b'a', 0, b'b']).unwrap();
        std::fs::write(&empty, "  \n\n ").unwrap();
        std::fs::write(&large, "x".repeat(64)).unwrap();

        let extractor = PlainTextExtractor::new(32);
        for path in [&binary, &empty, &large] {
            let err = extractor.extract(path).await.unwrap_err();
            assert!(matches!(err, StageError::Fatal(_)), "{}: {:?}", path.display(), err);
        }
        let missing = extractor.extract(&dir.path().join("none.txt")).await.unwrap_err();
        assert!(matches!(missing, StageError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_extract_withInvalidUtf8_shouldFailFatally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.txt");
        std::fs::write(&path, [b'c', b'a', b'f', 0xe9]).unwrap();
        let err = PlainTextExtractor::new(1024).extract(&path).await.unwrap_err();
        assert!(matches!(err, StageError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_localArtifactStore_shouldWriteReadAndCheck() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        let reference = store.write("job-1", "book.md", b"hola").await.unwrap();
        assert!(reference.ends_with("book.md"));
        assert!(store.exists(&reference).await);
        assert_eq!(store.read(&reference).await.unwrap(), b"hola");
        assert!(!store.exists(&dir.path().join("job-1/other.md").to_string_lossy()).await);
    }

    #[test]
    fn test_render_withUntranslatedParagraph_shouldFail() {
        let chapters = vec![ChapterRecord { chapter_index: 0, title: Some("Uno".into()) }];
        let mut paragraph = ParagraphRecord {
            id: 1,
            chapter_index: 0,
            position: 0,
            source_text: "Hello".into(),
            fingerprint: "fp".into(),
            translated_text: None,
        };
        assert!(MarkdownAssembler::render(&chapters, std::slice::from_ref(&paragraph)).is_err());

        paragraph.translated_text = Some("Hola".into());
        let book = MarkdownAssembler::render(&chapters, &[paragraph]).unwrap();
        assert_eq!(book, "# Uno\n\nHola\n\n");
    }
}
