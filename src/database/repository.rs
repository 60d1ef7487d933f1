/*!
 * Repository layer for database operations.
 *
 * High-level API over the job, event, document, cache and flashcard
 * tables. Every method that changes more than one row runs in a single
 * transaction so a crash never leaves a half-applied step behind.
 */

use anyhow::Result;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::connection::DatabaseConnection;
use super::models::{
    ArtifactRef, CacheStats, ChapterDraft, ChapterRecord, FlashcardRecord, JobEventRecord,
    JobRecord, ParagraphRecord,
};
use crate::pipeline::stage::Stage;
use crate::translation::fingerprint::fingerprint;

const JOB_COLUMNS: &str = "id, source_path, source_language, target_language, stage, percentage, \
     detail, error, failed_stage, attempts, extracted_path, book_path, cards_path, created_at, updated_at";

/// Result of an insert-if-absent on the translation cache
#[derive(Debug, Clone, PartialEq)]
pub enum CacheInsert {
    /// No entry existed; the text was stored
    Inserted,
    /// An entry already existed; it is returned unchanged
    Existing(String),
}

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    /// Database connection
    db: DatabaseConnection,
}

impl Repository {
    /// Create a new repository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a repository with the default database location
    pub fn new_default() -> Result<Self> {
        let db = DatabaseConnection::new_default()?;
        Ok(Self::new(db))
    }

    /// Create a repository with an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let db = DatabaseConnection::new_in_memory()?;
        Ok(Self::new(db))
    }

    /// Underlying connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    /// Insert a new job together with its initial progress event
    pub async fn create_job(&self, job: &JobRecord) -> Result<JobEventRecord> {
        let job = job.clone();

        self.db
            .transaction_async(move |tx| {
                tx.execute(
                    r#"
                    INSERT INTO jobs (
                        id, source_path, source_language, target_language, stage, percentage,
                        detail, error, failed_stage, attempts, extracted_path, book_path, cards_path,
                        created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                    "#,
                    params![
                        job.id,
                        job.source_path,
                        job.source_language,
                        job.target_language,
                        job.stage.to_string(),
                        job.percentage,
                        job.detail,
                        job.error,
                        job.failed_stage.map(|s| s.to_string()),
                        job.attempts,
                        job.extracted_path,
                        job.book_path,
                        job.cards_path,
                        job.created_at,
                        job.updated_at,
                    ],
                )?;
                Self::insert_event_sync(tx, &job.id, job.stage, job.percentage, Some("job accepted"))
            })
            .await
    }

    /// Get a job by ID
    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let job_id = job_id.to_string();

        self.db
            .execute_async(move |conn| Self::get_job_sync(conn, &job_id))
            .await
    }

    fn get_job_sync(conn: &Connection, job_id: &str) -> Result<Option<JobRecord>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        let result = conn.query_row(&sql, [job_id], Self::job_from_row).optional()?;
        Ok(result)
    }

    fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
        Ok(JobRecord {
            id: row.get(0)?,
            source_path: row.get(1)?,
            source_language: row.get(2)?,
            target_language: row.get(3)?,
            stage: row.get::<_, String>(4)?.parse().unwrap_or(Stage::Failed),
            percentage: row.get(5)?,
            detail: row.get(6)?,
            error: row.get(7)?,
            failed_stage: row
                .get::<_, Option<String>>(8)?
                .and_then(|s| s.parse().ok()),
            attempts: row.get(9)?,
            extracted_path: row.get(10)?,
            book_path: row.get(11)?,
            cards_path: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    /// List jobs, optionally restricted to one stage, oldest first
    pub async fn list_jobs(&self, stage: Option<Stage>) -> Result<Vec<JobRecord>> {
        self.db
            .execute_async(move |conn| {
                let records = match stage {
                    Some(stage) => {
                        let sql = format!(
                            "SELECT {} FROM jobs WHERE stage = ?1 ORDER BY created_at, id",
                            JOB_COLUMNS
                        );
                        let mut stmt = conn.prepare(&sql)?;
                        let rows = stmt.query_map([stage.to_string()], Self::job_from_row)?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()?
                    }
                    None => {
                        let sql = format!("SELECT {} FROM jobs ORDER BY created_at, id", JOB_COLUMNS);
                        let mut stmt = conn.prepare(&sql)?;
                        let rows = stmt.query_map([], Self::job_from_row)?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()?
                    }
                };
                Ok(records)
            })
            .await
    }

    /// Jobs that are neither done nor failed
    pub async fn list_resumable_jobs(&self) -> Result<Vec<JobRecord>> {
        let jobs = self.list_jobs(None).await?;
        Ok(jobs.into_iter().filter(|j| j.is_resumable()).collect())
    }

    /// Atomically move a job from `from` to `to`.
    ///
    /// The update only applies while the job is still at `from`, so two
    /// racing transitions cannot both succeed. Percentage is raised to the
    /// start of the new stage's band, the attempt counter is reset and the
    /// artifact reference, if any, is recorded. Returns the progress event
    /// written with the transition, or `None` when the job was not at `from`.
    pub async fn transition_stage(
        &self,
        job_id: &str,
        from: Stage,
        to: Stage,
        artifact: Option<ArtifactRef>,
        detail: Option<String>,
    ) -> Result<Option<JobEventRecord>> {
        let job_id = job_id.to_string();
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .transaction_async(move |tx| {
                let updated = tx.execute(
                    r#"
                    UPDATE jobs
                    SET stage = ?1, percentage = MAX(percentage, ?2), attempts = 0,
                        detail = ?3, updated_at = ?4
                    WHERE id = ?5 AND stage = ?6
                    "#,
                    params![to.to_string(), to.band().0, detail, now, job_id, from.to_string()],
                )?;
                if updated == 0 {
                    return Ok(None);
                }

                if let Some(artifact) = &artifact {
                    let sql = format!("UPDATE jobs SET {} = ?1 WHERE id = ?2", artifact.column());
                    tx.execute(&sql, params![artifact.path(), job_id])?;
                }

                let percentage: f64 =
                    tx.query_row("SELECT percentage FROM jobs WHERE id = ?1", [&job_id], |row| row.get(0))?;
                let event = Self::insert_event_sync(tx, &job_id, to, percentage, detail.as_deref())?;
                debug!("Job {} moved {} -> {}", job_id, from, to);
                Ok(Some(event))
            })
            .await
    }

    /// Mark a job failed while it is still at `from`
    pub async fn fail_job(&self, job_id: &str, from: Stage, error: &str) -> Result<Option<JobEventRecord>> {
        let job_id = job_id.to_string();
        let error = error.to_string();
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .transaction_async(move |tx| {
                let updated = tx.execute(
                    r#"
                    UPDATE jobs
                    SET stage = 'failed', failed_stage = ?1, error = ?2, detail = ?2, updated_at = ?3
                    WHERE id = ?4 AND stage = ?5
                    "#,
                    params![from.to_string(), error, now, job_id, from.to_string()],
                )?;
                if updated == 0 {
                    return Ok(None);
                }

                let percentage: f64 =
                    tx.query_row("SELECT percentage FROM jobs WHERE id = ?1", [&job_id], |row| row.get(0))?;
                let event = Self::insert_event_sync(tx, &job_id, Stage::Failed, percentage, Some(&error))?;
                Ok(Some(event))
            })
            .await
    }

    /// Count one more run of the job's current stage, returning the new total
    pub async fn record_attempt(&self, job_id: &str) -> Result<u32> {
        let job_id = job_id.to_string();

        self.db
            .transaction_async(move |tx| {
                tx.execute("UPDATE jobs SET attempts = attempts + 1 WHERE id = ?1", [&job_id])?;
                let attempts: u32 =
                    tx.query_row("SELECT attempts FROM jobs WHERE id = ?1", [&job_id], |row| row.get(0))?;
                Ok(attempts)
            })
            .await
    }

    /// Take back an attempt whose run was cancelled before it finished
    pub async fn release_attempt(&self, job_id: &str) -> Result<()> {
        let job_id = job_id.to_string();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE jobs SET attempts = MAX(attempts - 1, 0) WHERE id = ?1",
                    [job_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Delete a job and everything that belongs to it
    pub async fn delete_job(&self, job_id: &str) -> Result<bool> {
        let job_id = job_id.to_string();

        self.db
            .execute_async(move |conn| {
                let deleted = conn.execute("DELETE FROM jobs WHERE id = ?1", [job_id])?;
                Ok(deleted > 0)
            })
            .await
    }

    // =========================================================================
    // Progress Event Operations
    // =========================================================================

    /// Record in-stage progress.
    ///
    /// The stored percentage only ever rises; the event carries the stored
    /// value, so a late, lower report is recorded at the current maximum.
    pub async fn append_progress(
        &self,
        job_id: &str,
        percentage: f64,
        detail: Option<String>,
    ) -> Result<JobEventRecord> {
        let job_id = job_id.to_string();
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .transaction_async(move |tx| {
                tx.execute(
                    r#"
                    UPDATE jobs
                    SET percentage = MAX(percentage, MIN(?1, 100.0)), detail = COALESCE(?2, detail), updated_at = ?3
                    WHERE id = ?4
                    "#,
                    params![percentage, detail, now, job_id],
                )?;
                let (stage, stored): (String, f64) = tx.query_row(
                    "SELECT stage, percentage FROM jobs WHERE id = ?1",
                    [&job_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                let stage = stage.parse().unwrap_or(Stage::Failed);
                Self::insert_event_sync(tx, &job_id, stage, stored, detail.as_deref())
            })
            .await
    }

    fn insert_event_sync(
        conn: &Connection,
        job_id: &str,
        stage: Stage,
        percentage: f64,
        detail: Option<&str>,
    ) -> Result<JobEventRecord> {
        let seq: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM job_events WHERE job_id = ?1",
            [job_id],
            |row| row.get(0),
        )?;
        let created_at = chrono::Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO job_events (job_id, seq, stage, percentage, detail, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![job_id, seq, stage.to_string(), percentage, detail, created_at],
        )?;

        Ok(JobEventRecord {
            job_id: job_id.to_string(),
            seq,
            stage,
            percentage,
            detail: detail.map(str::to_string),
            created_at,
        })
    }

    /// Events of a job with a sequence number above `after_seq`, in order
    pub async fn get_events(&self, job_id: &str, after_seq: i64) -> Result<Vec<JobEventRecord>> {
        let job_id = job_id.to_string();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT job_id, seq, stage, percentage, detail, created_at
                    FROM job_events
                    WHERE job_id = ?1 AND seq > ?2
                    ORDER BY seq
                    "#,
                )?;
                let events = stmt
                    .query_map(params![job_id, after_seq], |row| {
                        Ok(JobEventRecord {
                            job_id: row.get(0)?,
                            seq: row.get(1)?,
                            stage: row.get::<_, String>(2)?.parse().unwrap_or(Stage::Failed),
                            percentage: row.get(3)?,
                            detail: row.get(4)?,
                            created_at: row.get(5)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(events)
            })
            .await
    }

    // =========================================================================
    // Document Operations
    // =========================================================================

    /// Replace the chapters and paragraphs of a job.
    ///
    /// Re-running chaptering yields the same rows, so the replacement is
    /// idempotent. Returns `(chapters, paragraphs)` written.
    pub async fn replace_document(&self, job_id: &str, chapters: Vec<ChapterDraft>) -> Result<(usize, usize)> {
        let job_id = job_id.to_string();

        self.db
            .transaction_async(move |tx| {
                tx.execute("DELETE FROM paragraphs WHERE job_id = ?1", [&job_id])?;
                tx.execute("DELETE FROM chapters WHERE job_id = ?1", [&job_id])?;

                let mut paragraph_count = 0;
                {
                    let mut chapter_stmt = tx.prepare(
                        "INSERT INTO chapters (job_id, chapter_index, title) VALUES (?1, ?2, ?3)",
                    )?;
                    let mut paragraph_stmt = tx.prepare(
                        r#"
                        INSERT INTO paragraphs (job_id, chapter_index, position, source_text, fingerprint)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        "#,
                    )?;

                    for (chapter_index, chapter) in chapters.iter().enumerate() {
                        chapter_stmt.execute(params![job_id, chapter_index as i64, chapter.title])?;
                        for (position, text) in chapter.paragraphs.iter().enumerate() {
                            paragraph_stmt.execute(params![
                                job_id,
                                chapter_index as i64,
                                position as i64,
                                text,
                                fingerprint(text),
                            ])?;
                            paragraph_count += 1;
                        }
                    }
                }

                Ok((chapters.len(), paragraph_count))
            })
            .await
    }

    /// Chapters of a job in order
    pub async fn get_chapters(&self, job_id: &str) -> Result<Vec<ChapterRecord>> {
        let job_id = job_id.to_string();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT chapter_index, title FROM chapters WHERE job_id = ?1 ORDER BY chapter_index",
                )?;
                let chapters = stmt
                    .query_map([job_id], |row| {
                        Ok(ChapterRecord {
                            chapter_index: row.get(0)?,
                            title: row.get(1)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(chapters)
            })
            .await
    }

    /// Paragraphs of a job in reading order
    pub async fn get_paragraphs(&self, job_id: &str) -> Result<Vec<ParagraphRecord>> {
        let job_id = job_id.to_string();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, chapter_index, position, source_text, fingerprint, translated_text
                    FROM paragraphs
                    WHERE job_id = ?1
                    ORDER BY chapter_index, position
                    "#,
                )?;
                let paragraphs = stmt
                    .query_map([job_id], |row| {
                        Ok(ParagraphRecord {
                            id: row.get(0)?,
                            chapter_index: row.get(1)?,
                            position: row.get(2)?,
                            source_text: row.get(3)?,
                            fingerprint: row.get(4)?,
                            translated_text: row.get(5)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(paragraphs)
            })
            .await
    }

    /// `(total, translated)` paragraph counts of a job
    pub async fn paragraph_counts(&self, job_id: &str) -> Result<(usize, usize)> {
        let job_id = job_id.to_string();

        self.db
            .execute_async(move |conn| {
                let (total, translated): (i64, i64) = conn.query_row(
                    r#"
                    SELECT COUNT(*), COUNT(translated_text)
                    FROM paragraphs WHERE job_id = ?1
                    "#,
                    [job_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                Ok((total as usize, translated as usize))
            })
            .await
    }

    /// Store translations for paragraphs that have none yet.
    ///
    /// Already-translated paragraphs are left untouched, so applying the
    /// same batch twice is harmless. Returns the number of rows updated.
    pub async fn apply_translations(&self, job_id: &str, translations: Vec<(i64, String)>) -> Result<usize> {
        let job_id = job_id.to_string();

        self.db
            .transaction_async(move |tx| {
                let mut updated = 0;
                let mut stmt = tx.prepare(
                    r#"
                    UPDATE paragraphs SET translated_text = ?1
                    WHERE id = ?2 AND job_id = ?3 AND translated_text IS NULL
                    "#,
                )?;
                for (paragraph_id, text) in &translations {
                    updated += stmt.execute(params![text, paragraph_id, job_id])?;
                }
                Ok(updated)
            })
            .await
    }

    // =========================================================================
    // Cache Operations
    // =========================================================================

    /// Get a cached translation, counting the hit
    pub async fn get_cached_translation(&self, fingerprint: &str, target_language: &str) -> Result<Option<String>> {
        let fingerprint = fingerprint.to_string();
        let target_language = target_language.to_string();

        self.db
            .execute_async(move |conn| {
                let result: Option<String> = conn
                    .query_row(
                        r#"
                        SELECT translated_text FROM translation_cache
                        WHERE fingerprint = ?1 AND target_language = ?2
                        "#,
                        params![fingerprint, target_language],
                        |row| row.get(0),
                    )
                    .optional()?;

                if result.is_some() {
                    conn.execute(
                        r#"
                        UPDATE translation_cache SET hit_count = hit_count + 1
                        WHERE fingerprint = ?1 AND target_language = ?2
                        "#,
                        params![fingerprint, target_language],
                    )?;
                }
                Ok(result)
            })
            .await
    }

    /// Store a translation unless the key already has one.
    ///
    /// Insert and lookup happen in one transaction; the first writer's text
    /// is kept and returned to later writers.
    pub async fn insert_cache_entry(
        &self,
        fingerprint: &str,
        target_language: &str,
        translated_text: &str,
    ) -> Result<CacheInsert> {
        let fingerprint = fingerprint.to_string();
        let target_language = target_language.to_string();
        let translated_text = translated_text.to_string();
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .transaction_async(move |tx| {
                let inserted = tx.execute(
                    r#"
                    INSERT INTO translation_cache (fingerprint, target_language, translated_text, written_seq, created_at)
                    VALUES (?1, ?2, ?3, (SELECT COALESCE(MAX(written_seq), 0) + 1 FROM translation_cache), ?4)
                    ON CONFLICT(fingerprint, target_language) DO NOTHING
                    "#,
                    params![fingerprint, target_language, translated_text, now],
                )?;
                if inserted > 0 {
                    return Ok(CacheInsert::Inserted);
                }

                let existing: String = tx.query_row(
                    "SELECT translated_text FROM translation_cache WHERE fingerprint = ?1 AND target_language = ?2",
                    params![fingerprint, target_language],
                    |row| row.get(0),
                )?;
                Ok(CacheInsert::Existing(existing))
            })
            .await
    }

    /// Get cache statistics
    pub async fn get_cache_stats(&self) -> Result<CacheStats> {
        self.db
            .execute_async(|conn| {
                let total_entries: i64 = conn
                    .query_row("SELECT COUNT(*) FROM translation_cache", [], |row| row.get(0))
                    .unwrap_or(0);

                let total_hits: i64 = conn
                    .query_row(
                        "SELECT COALESCE(SUM(hit_count), 0) FROM translation_cache",
                        [],
                        |row| row.get(0),
                    )
                    .unwrap_or(0);

                Ok(CacheStats {
                    total_entries,
                    total_hits,
                })
            })
            .await
    }

    /// Clear the translation cache
    pub async fn clear_cache(&self) -> Result<i64> {
        self.db
            .execute_async(|conn| {
                let deleted = conn.execute("DELETE FROM translation_cache", [])?;
                Ok(deleted as i64)
            })
            .await
    }

    // =========================================================================
    // Flashcard Operations
    // =========================================================================

    /// Replace the flashcards of one chapter
    pub async fn replace_flashcards(
        &self,
        job_id: &str,
        chapter_index: i64,
        cards: Vec<FlashcardRecord>,
    ) -> Result<()> {
        let job_id = job_id.to_string();

        self.db
            .transaction_async(move |tx| {
                tx.execute(
                    "DELETE FROM flashcards WHERE job_id = ?1 AND chapter_index = ?2",
                    params![job_id, chapter_index],
                )?;
                let mut stmt = tx.prepare(
                    r#"
                    INSERT INTO flashcards (job_id, chapter_index, rank, lemma, pos, score, definition, example)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                )?;
                for card in &cards {
                    stmt.execute(params![
                        job_id,
                        chapter_index,
                        card.rank,
                        card.lemma,
                        card.pos,
                        card.score,
                        card.definition,
                        card.example,
                    ])?;
                }
                Ok(())
            })
            .await
    }

    /// All flashcards of a job, by chapter then rank
    pub async fn get_flashcards(&self, job_id: &str) -> Result<Vec<FlashcardRecord>> {
        let job_id = job_id.to_string();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT chapter_index, rank, lemma, pos, score, definition, example
                    FROM flashcards
                    WHERE job_id = ?1
                    ORDER BY chapter_index, rank
                    "#,
                )?;
                let cards = stmt
                    .query_map([job_id], |row| {
                        Ok(FlashcardRecord {
                            chapter_index: row.get(0)?,
                            rank: row.get(1)?,
                            lemma: row.get(2)?,
                            pos: row.get(3)?,
                            score: row.get(4)?,
                            definition: row.get(5)?,
                            example: row.get(6)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(cards)
            })
            .await
    }
}
