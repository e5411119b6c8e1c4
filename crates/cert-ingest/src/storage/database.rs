//! SQLite database for persistent pipeline state
//!
//! Holds the quota ledger, extracted-text cache, extraction job registry,
//! processed-directory seen-set, and the document registry. One store backs
//! all watched roots; the single-consumer-per-root invariant keeps access
//! serialized per document.

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Accounting key for the calendar month containing `now`, UTC.
pub fn quota_period_key(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", now.year(), now.month())
}

/// Status of a persisted extraction job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionJobStatus {
    /// Job handle obtained, polling not yet started
    Submitted,
    /// Poll loop in progress
    Polling,
    /// Terminal: results fetched
    Succeeded,
    /// Terminal: backend reported failure
    Failed,
}

/// A persisted `{document key -> job handle}` registry entry.
///
/// Written before the first poll so a crash mid-poll resumes the same
/// handle instead of submitting (and paying for) a duplicate job.
#[derive(Debug, Clone)]
pub struct ExtractionJobRecord {
    pub key: String,
    pub handle: String,
    pub status: ExtractionJobStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of processing a document, as kept in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    /// Currently being worked on
    Processing,
    /// Records extracted and persisted
    Success,
    /// Unchanged re-delivery, not reprocessed
    Skipped,
    /// Abandoned with a logged reason
    Failed,
}

/// Registry entry for a file the pipeline has seen
#[derive(Debug, Clone)]
pub struct DocumentRegistryRecord {
    /// Original filename (natural key)
    pub filename: String,
    /// SHA-256 of the file contents
    pub content_hash: String,
    pub status: DocumentStatus,
    /// Classified category, when processing got that far
    pub category: Option<String>,
    /// Failure reason, when failed
    pub error_message: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_processed_at: DateTime<Utc>,
    /// How many times this filename has been delivered
    ///
    /// On a record being written this is the delivery increment: 1 for
    /// Processing and Skipped, 0 for the completion record that follows
    /// a Processing one.
    pub process_count: u32,
}

impl DocumentRegistryRecord {
    pub fn processing(filename: String, content_hash: String) -> Self {
        let now = Utc::now();
        Self {
            filename,
            content_hash,
            status: DocumentStatus::Processing,
            category: None,
            error_message: None,
            first_seen_at: now,
            last_processed_at: now,
            process_count: 1,
        }
    }

    pub fn success(filename: String, content_hash: String, category: String) -> Self {
        let now = Utc::now();
        Self {
            filename,
            content_hash,
            status: DocumentStatus::Success,
            category: Some(category),
            error_message: None,
            first_seen_at: now,
            last_processed_at: now,
            process_count: 0,
        }
    }

    pub fn failed(filename: String, content_hash: String, error: String) -> Self {
        let now = Utc::now();
        Self {
            filename,
            content_hash,
            status: DocumentStatus::Failed,
            category: None,
            error_message: Some(error),
            first_seen_at: now,
            last_processed_at: now,
            process_count: 0,
        }
    }

    pub fn skipped(filename: String, content_hash: String) -> Self {
        let now = Utc::now();
        Self {
            filename,
            content_hash,
            status: DocumentStatus::Skipped,
            category: None,
            error_message: None,
            first_seen_at: now,
            last_processed_at: now,
            process_count: 1,
        }
    }
}

/// Cached extracted text for one document identity
#[derive(Debug, Clone)]
pub struct CachedText {
    pub lines: Vec<String>,
    pub page_count: Option<u32>,
}

/// Counts over the document registry and cache
#[derive(Debug, Clone)]
pub struct PipelineDbStats {
    pub documents: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cached_texts: usize,
}

/// SQLite-backed pipeline state store
pub struct PipelineDb {
    conn: Arc<Mutex<Connection>>,
}

impl PipelineDb {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Internal(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA cache_size=10000;
            PRAGMA temp_store=MEMORY;
        "#,
        )
        .map_err(|e| Error::Internal(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            -- Monthly page accounting for the cloud service
            CREATE TABLE IF NOT EXISTS quota_periods (
                period TEXT PRIMARY KEY,
                pages_consumed INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            -- Extracted text keyed by document identity
            CREATE TABLE IF NOT EXISTS text_cache (
                key TEXT PRIMARY KEY,
                lines_json TEXT NOT NULL,
                page_count INTEGER,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- In-flight cloud jobs, removed on terminal status
            CREATE TABLE IF NOT EXISTS extraction_jobs (
                key TEXT PRIMARY KEY,
                handle TEXT NOT NULL,
                status TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_extraction_jobs_status ON extraction_jobs(status);

            -- Calibration package directories already enumerated
            CREATE TABLE IF NOT EXISTS processed_dirs (
                path TEXT PRIMARY KEY,
                processed_at TEXT NOT NULL,
                record_count INTEGER NOT NULL DEFAULT 0
            );

            -- Every file the pipeline has seen, with its outcome
            CREATE TABLE IF NOT EXISTS document_registry (
                filename TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                status TEXT NOT NULL,
                category TEXT,
                error_message TEXT,
                first_seen_at TEXT NOT NULL,
                last_processed_at TEXT NOT NULL,
                process_count INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_document_registry_status ON document_registry(status);
            CREATE INDEX IF NOT EXISTS idx_document_registry_hash ON document_registry(content_hash);
        "#,
        )
        .map_err(|e| Error::Internal(format!("Failed to run migrations: {}", e)))?;

        tracing::debug!("Database migrations complete");
        Ok(())
    }

    // ==================== Quota Ledger ====================

    /// Pages recorded against a period so far.
    pub fn pages_consumed(&self, period: &str) -> Result<u32> {
        let conn = self.conn.lock();

        let consumed: Option<i64> = conn
            .query_row(
                "SELECT pages_consumed FROM quota_periods WHERE period = ?1",
                params![period],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Internal(format!("Failed to read quota period: {}", e)))?;

        Ok(consumed.unwrap_or(0) as u32)
    }

    /// Check whether `requested` pages fit under `cap` for the period.
    ///
    /// Fails hard when the running total plus the request would meet or
    /// exceed the cap. Never increments the counter; usage is recorded only
    /// after the job completes with its true page count.
    pub fn reserve_pages(&self, period: &str, requested: u32, cap: u32) -> Result<()> {
        let consumed = self.pages_consumed(period)?;
        if consumed + requested >= cap {
            return Err(Error::QuotaExceeded {
                period: period.to_string(),
                consumed,
                requested,
                cap,
            });
        }
        Ok(())
    }

    /// Add the backend-reported page count to the period. Returns the new
    /// running total. The counter only ever grows.
    pub fn record_page_usage(&self, period: &str, pages: u32) -> Result<u32> {
        {
            let conn = self.conn.lock();
            conn.execute(
                r#"
                INSERT INTO quota_periods (period, pages_consumed, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(period) DO UPDATE SET
                    pages_consumed = quota_periods.pages_consumed + excluded.pages_consumed,
                    updated_at = excluded.updated_at
                "#,
                params![period, pages as i64, Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Internal(format!("Failed to record page usage: {}", e)))?;
        }

        self.pages_consumed(period)
    }

    // ==================== Text Cache ====================

    /// Cached lines for a document identity, if any.
    pub fn get_cached_text(&self, key: &str) -> Result<Option<CachedText>> {
        let conn = self.conn.lock();

        let row: Option<(String, Option<i64>)> = conn
            .query_row(
                "SELECT lines_json, page_count FROM text_cache WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| Error::Internal(format!("Failed to read text cache: {}", e)))?;

        match row {
            Some((lines_json, page_count)) => {
                let lines: Vec<String> = serde_json::from_str(&lines_json)?;
                Ok(Some(CachedText {
                    lines,
                    page_count: page_count.map(|p| p as u32),
                }))
            }
            None => Ok(None),
        }
    }

    /// Cache extracted lines under a document identity.
    ///
    /// An identity appears in the cache at most once; a second write for the
    /// same key is ignored rather than overwriting the original.
    pub fn cache_text(
        &self,
        key: &str,
        lines: &[String],
        page_count: Option<u32>,
        source: &str,
    ) -> Result<()> {
        let lines_json = serde_json::to_string(lines)?;
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO text_cache (key, lines_json, page_count, source, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(key) DO NOTHING
            "#,
            params![
                key,
                lines_json,
                page_count.map(|p| p as i64),
                source,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Internal(format!("Failed to cache text: {}", e)))?;

        Ok(())
    }

    // ==================== Extraction Job Registry ====================

    /// Persist a job handle for a document key, before any polling starts.
    pub fn put_extraction_job(&self, key: &str, handle: &str) -> Result<()> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO extraction_jobs (key, handle, status, submitted_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(key) DO UPDATE SET
                handle = excluded.handle,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
            params![key, handle, job_status_to_string(ExtractionJobStatus::Submitted), now],
        )
        .map_err(|e| Error::Internal(format!("Failed to persist extraction job: {}", e)))?;

        Ok(())
    }

    /// Registry entry for a document key, if one is in flight.
    pub fn get_extraction_job(&self, key: &str) -> Result<Option<ExtractionJobRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare("SELECT key, handle, status, submitted_at, updated_at FROM extraction_jobs WHERE key = ?1")
            .map_err(|e| Error::Internal(format!("Failed to prepare query: {}", e)))?;

        let record = stmt
            .query_row(params![key], row_to_extraction_job)
            .optional()
            .map_err(|e| Error::Internal(format!("Failed to get extraction job: {}", e)))?;

        Ok(record)
    }

    /// Update the status of a persisted job.
    pub fn update_extraction_job_status(
        &self,
        key: &str,
        status: ExtractionJobStatus,
    ) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "UPDATE extraction_jobs SET status = ?2, updated_at = ?3 WHERE key = ?1",
            params![key, job_status_to_string(status), Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::Internal(format!("Failed to update extraction job: {}", e)))?;

        Ok(())
    }

    /// Remove a job entry once it reaches a terminal status.
    pub fn remove_extraction_job(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "DELETE FROM extraction_jobs WHERE key = ?1",
            params![key],
        )
        .map_err(|e| Error::Internal(format!("Failed to remove extraction job: {}", e)))?;

        Ok(())
    }

    /// All persisted jobs, oldest first. Used by the startup resume pass.
    pub fn list_extraction_jobs(&self) -> Result<Vec<ExtractionJobRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare("SELECT key, handle, status, submitted_at, updated_at FROM extraction_jobs ORDER BY submitted_at ASC")
            .map_err(|e| Error::Internal(format!("Failed to prepare query: {}", e)))?;

        let records = stmt
            .query_map([], row_to_extraction_job)
            .map_err(|e| Error::Internal(format!("Failed to list extraction jobs: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }

    // ==================== Processed Directories ====================

    /// Whether a package directory has already been enumerated.
    pub fn is_dir_processed(&self, path: &str) -> Result<bool> {
        let conn = self.conn.lock();

        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM processed_dirs WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Internal(format!("Failed to check processed dir: {}", e)))?;

        Ok(found.is_some())
    }

    /// Record a package directory as done, with how many calibrations it
    /// yielded.
    pub fn mark_dir_processed(&self, path: &str, record_count: u32) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO processed_dirs (path, processed_at, record_count)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(path) DO UPDATE SET
                processed_at = excluded.processed_at,
                record_count = excluded.record_count
            "#,
            params![path, Utc::now().to_rfc3339(), record_count as i64],
        )
        .map_err(|e| Error::Internal(format!("Failed to mark dir processed: {}", e)))?;

        Ok(())
    }

    // ==================== Document Registry ====================

    /// Insert or update a document registry record.
    ///
    /// `process_count` accumulates: the stored total grows by the
    /// written record's own count, so Processing/Skipped records count
    /// a delivery and Success/Failed records complete one.
    pub fn upsert_document(&self, record: &DocumentRegistryRecord) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO document_registry (
                filename, content_hash, status, category, error_message,
                first_seen_at, last_processed_at, process_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(filename) DO UPDATE SET
                content_hash = excluded.content_hash,
                status = excluded.status,
                category = excluded.category,
                error_message = excluded.error_message,
                last_processed_at = excluded.last_processed_at,
                process_count = document_registry.process_count + excluded.process_count
            "#,
            params![
                record.filename,
                record.content_hash,
                document_status_to_string(record.status),
                record.category,
                record.error_message,
                record.first_seen_at.to_rfc3339(),
                record.last_processed_at.to_rfc3339(),
                record.process_count as i64,
            ],
        )
        .map_err(|e| Error::Internal(format!("Failed to upsert document record: {}", e)))?;

        Ok(())
    }

    /// Registry record for a filename, if the pipeline has seen it.
    pub fn get_document(&self, filename: &str) -> Result<Option<DocumentRegistryRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(
                "SELECT filename, content_hash, status, category, error_message, \
                 first_seen_at, last_processed_at, process_count \
                 FROM document_registry WHERE filename = ?1",
            )
            .map_err(|e| Error::Internal(format!("Failed to prepare query: {}", e)))?;

        let record = stmt
            .query_row(params![filename], row_to_document_record)
            .optional()
            .map_err(|e| Error::Internal(format!("Failed to get document record: {}", e)))?;

        Ok(record)
    }

    /// Registry and cache counts.
    pub fn get_stats(&self) -> Result<PipelineDbStats> {
        let conn = self.conn.lock();

        let documents: i64 = conn
            .query_row("SELECT COUNT(*) FROM document_registry", [], |row| row.get(0))
            .unwrap_or(0);

        let succeeded: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM document_registry WHERE status = 'success'",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        let failed: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM document_registry WHERE status = 'failed'",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        let skipped: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM document_registry WHERE status = 'skipped'",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        let cached_texts: i64 = conn
            .query_row("SELECT COUNT(*) FROM text_cache", [], |row| row.get(0))
            .unwrap_or(0);

        Ok(PipelineDbStats {
            documents: documents as usize,
            succeeded: succeeded as usize,
            failed: failed as usize,
            skipped: skipped as usize,
            cached_texts: cached_texts as usize,
        })
    }
}

// ==================== Conversion helpers ====================

fn job_status_to_string(status: ExtractionJobStatus) -> &'static str {
    match status {
        ExtractionJobStatus::Submitted => "submitted",
        ExtractionJobStatus::Polling => "polling",
        ExtractionJobStatus::Succeeded => "succeeded",
        ExtractionJobStatus::Failed => "failed",
    }
}

fn string_to_job_status(s: &str) -> ExtractionJobStatus {
    match s {
        "submitted" => ExtractionJobStatus::Submitted,
        "polling" => ExtractionJobStatus::Polling,
        "succeeded" => ExtractionJobStatus::Succeeded,
        "failed" => ExtractionJobStatus::Failed,
        _ => ExtractionJobStatus::Submitted,
    }
}

fn document_status_to_string(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Processing => "processing",
        DocumentStatus::Success => "success",
        DocumentStatus::Skipped => "skipped",
        DocumentStatus::Failed => "failed",
    }
}

fn string_to_document_status(s: &str) -> DocumentStatus {
    match s {
        "processing" => DocumentStatus::Processing,
        "success" => DocumentStatus::Success,
        "skipped" => DocumentStatus::Skipped,
        "failed" => DocumentStatus::Failed,
        _ => DocumentStatus::Failed,
    }
}

fn parse_timestamp(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_extraction_job(row: &rusqlite::Row) -> rusqlite::Result<ExtractionJobRecord> {
    let status: String = row.get(2)?;
    let submitted_at: String = row.get(3)?;
    let updated_at: String = row.get(4)?;

    Ok(ExtractionJobRecord {
        key: row.get(0)?,
        handle: row.get(1)?,
        status: string_to_job_status(&status),
        submitted_at: parse_timestamp(submitted_at),
        updated_at: parse_timestamp(updated_at),
    })
}

fn row_to_document_record(row: &rusqlite::Row) -> rusqlite::Result<DocumentRegistryRecord> {
    let status: String = row.get(2)?;
    let first_seen_at: String = row.get(5)?;
    let last_processed_at: String = row.get(6)?;
    let process_count: i64 = row.get(7)?;

    Ok(DocumentRegistryRecord {
        filename: row.get(0)?,
        content_hash: row.get(1)?,
        status: string_to_document_status(&status),
        category: row.get(3)?,
        error_message: row.get(4)?,
        first_seen_at: parse_timestamp(first_seen_at),
        last_processed_at: parse_timestamp(last_processed_at),
        process_count: process_count as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_quota_period_key() {
        let at = Utc.with_ymd_and_hms(2025, 3, 31, 23, 59, 0).unwrap();
        assert_eq!(quota_period_key(at), "2025-03");
        let at = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
        assert_eq!(quota_period_key(at), "2025-04");
    }

    #[test]
    fn test_quota_reserve_denied_at_cap() {
        let db = PipelineDb::in_memory().unwrap();
        let period = "2025-06";

        assert_eq!(db.record_page_usage(period, 95).unwrap(), 95);

        // 95 + 10 >= 100: denied, and the counter must not move.
        let err = db.reserve_pages(period, 10, 100).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { consumed: 95, .. }));
        assert_eq!(db.pages_consumed(period).unwrap(), 95);

        // 95 + 4 = 99 < 100: allowed.
        db.reserve_pages(period, 4, 100).unwrap();

        // 95 + 5 = 100 meets the cap exactly: denied.
        assert!(db.reserve_pages(period, 5, 100).is_err());
    }

    #[test]
    fn test_quota_periods_are_independent() {
        let db = PipelineDb::in_memory().unwrap();
        db.record_page_usage("2025-05", 40).unwrap();
        db.record_page_usage("2025-06", 7).unwrap();

        assert_eq!(db.pages_consumed("2025-05").unwrap(), 40);
        assert_eq!(db.pages_consumed("2025-06").unwrap(), 7);
        assert_eq!(db.pages_consumed("2025-07").unwrap(), 0);
    }

    #[test]
    fn test_text_cache_write_once() {
        let db = PipelineDb::in_memory().unwrap();
        let key = "incoming/C25-0110.pdf";
        let lines = vec!["line one".to_string(), "line two".to_string()];

        assert!(db.get_cached_text(key).unwrap().is_none());
        db.cache_text(key, &lines, Some(12), "cloud").unwrap();

        let cached = db.get_cached_text(key).unwrap().unwrap();
        assert_eq!(cached.lines, lines);
        assert_eq!(cached.page_count, Some(12));

        // A second write for the same identity is ignored.
        db.cache_text(key, &["other".to_string()], None, "cloud").unwrap();
        let cached = db.get_cached_text(key).unwrap().unwrap();
        assert_eq!(cached.lines, lines);
    }

    #[test]
    fn test_extraction_job_lifecycle() {
        let db = PipelineDb::in_memory().unwrap();
        let key = "incoming/C25-0110.pdf";

        db.put_extraction_job(key, "job-abc123").unwrap();
        let job = db.get_extraction_job(key).unwrap().unwrap();
        assert_eq!(job.handle, "job-abc123");
        assert_eq!(job.status, ExtractionJobStatus::Submitted);

        db.update_extraction_job_status(key, ExtractionJobStatus::Polling)
            .unwrap();
        let job = db.get_extraction_job(key).unwrap().unwrap();
        assert_eq!(job.status, ExtractionJobStatus::Polling);

        assert_eq!(db.list_extraction_jobs().unwrap().len(), 1);

        db.remove_extraction_job(key).unwrap();
        assert!(db.get_extraction_job(key).unwrap().is_none());
        assert!(db.list_extraction_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_processed_dirs() {
        let db = PipelineDb::in_memory().unwrap();
        let path = "/srv/calibrations/2025-06-12";

        assert!(!db.is_dir_processed(path).unwrap());
        db.mark_dir_processed(path, 9).unwrap();
        assert!(db.is_dir_processed(path).unwrap());
    }

    #[test]
    fn test_document_registry_counts_deliveries_not_writes() {
        let db = PipelineDb::in_memory().unwrap();

        // First delivery: a Processing record followed by its Success
        // completion stays at one delivery.
        db.upsert_document(&DocumentRegistryRecord::processing(
            "C25-0110.pdf".to_string(),
            "abc123".to_string(),
        ))
        .unwrap();
        db.upsert_document(&DocumentRegistryRecord::success(
            "C25-0110.pdf".to_string(),
            "abc123".to_string(),
            "manifold".to_string(),
        ))
        .unwrap();

        let stored = db.get_document("C25-0110.pdf").unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Success);
        assert_eq!(stored.category.as_deref(), Some("manifold"));
        assert_eq!(stored.process_count, 1);
        let first_seen = stored.first_seen_at;

        // Unchanged re-delivery counts, keeps first_seen_at.
        db.upsert_document(&DocumentRegistryRecord::skipped(
            "C25-0110.pdf".to_string(),
            "abc123".to_string(),
        ))
        .unwrap();

        let stored = db.get_document("C25-0110.pdf").unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Skipped);
        assert_eq!(stored.process_count, 2);
        assert_eq!(stored.first_seen_at, first_seen);
    }

    #[test]
    fn test_stats() {
        let db = PipelineDb::in_memory().unwrap();

        db.upsert_document(&DocumentRegistryRecord::success(
            "a.pdf".to_string(),
            "h1".to_string(),
            "valve".to_string(),
        ))
        .unwrap();
        db.upsert_document(&DocumentRegistryRecord::failed(
            "b.pdf".to_string(),
            "h2".to_string(),
            "no category".to_string(),
        ))
        .unwrap();
        db.cache_text("incoming/a.pdf", &["x".to_string()], Some(1), "cloud")
            .unwrap();

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cached_texts, 1);
    }
}
