//! Document identity, watch events, and queue items

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Certification batch IDs: one or two letters/digits, a two-digit year,
/// a dash, and a four-digit sequence number (e.g. `C25-0110`). Extracted
/// lines arrive lowercased, so matching ignores case and IDs are stored
/// uppercase.
static BATCH_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b[A-Z0-9]{1,2}\d{2}-\d{4}\b").unwrap());

/// Certification batch identifier parsed from a filename or text line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BatchId(String);

impl BatchId {
    /// Extract the first batch ID occurring in a filename.
    ///
    /// Returns `None` when the filename carries no recognizable ID; such
    /// documents still flow through extraction but cannot be classified.
    pub fn parse_from_filename(filename: &str) -> Option<Self> {
        BATCH_ID_RE
            .find(filename)
            .map(|m| Self(m.as_str().to_uppercase()))
    }

    /// All batch IDs mentioned in a text line, in order of appearance.
    pub fn find_all(line: &str) -> Vec<Self> {
        BATCH_ID_RE
            .find_iter(line)
            .map(|m| Self(m.as_str().to_uppercase()))
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A filesystem creation event observed under a watched root
#[derive(Debug, Clone)]
pub struct WatchedEvent {
    /// Absolute path of the created file or directory
    pub path: PathBuf,
    /// The watched root the event belongs to
    pub root: PathBuf,
    /// When the event was observed
    pub observed_at: DateTime<Utc>,
}

impl WatchedEvent {
    pub fn new(path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            root: root.into(),
            observed_at: Utc::now(),
        }
    }

    /// Final path component as UTF-8, lossy.
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Unit of work consumed by a root's single worker
#[derive(Debug, Clone)]
pub enum QueueItem {
    /// A certification document file to extract and classify
    Document {
        event: WatchedEvent,
        /// Batch ID derived from the filename, when one is present
        batch: Option<BatchId>,
    },
    /// A calibration package directory, enumerated after a debounce wait
    Package { event: WatchedEvent },
}

impl QueueItem {
    /// Build a document item, deriving the batch ID from the filename.
    pub fn document(event: WatchedEvent) -> Self {
        let batch = BatchId::parse_from_filename(&event.filename());
        Self::Document { event, batch }
    }

    pub fn package(event: WatchedEvent) -> Self {
        Self::Package { event }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Document { event, .. } => &event.path,
            Self::Package { event } => &event.path,
        }
    }

    pub fn filename(&self) -> String {
        match self {
            Self::Document { event, .. } => event.filename(),
            Self::Package { event } => event.filename(),
        }
    }
}

/// Where a document's text lines came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSource {
    /// Served from the text cache without touching any backend
    Cache,
    /// Cloud extraction service
    Cloud,
    /// Local OCR engine
    LocalOcr,
}

impl fmt::Display for ExtractionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => f.write_str("cache"),
            Self::Cloud => f.write_str("cloud"),
            Self::LocalOcr => f.write_str("local-ocr"),
        }
    }
}

/// A document's extracted text, ordered as it appears on the pages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDocument {
    /// Stable document identity (`{logical-folder}/{original-filename}`)
    pub key: String,
    /// Lowercase text lines in page/block order
    pub lines: Vec<String>,
    /// True page count reported by the backend, when known
    pub page_count: Option<u32>,
    /// Which path produced the lines
    #[serde(skip)]
    pub source: ExtractionSource,
}

impl Default for ExtractionSource {
    fn default() -> Self {
        Self::Cache
    }
}

/// Deterministic object-storage key for a document.
pub fn document_key(folder: &str, filename: &str) -> String {
    format!("{}/{}", folder.trim_matches('/'), filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_id_from_filename() {
        let id = BatchId::parse_from_filename("C25-0110 certificaat.pdf").unwrap();
        assert_eq!(id.as_str(), "C25-0110");

        let id = BatchId::parse_from_filename("shipment AB12-3456 scan.pdf").unwrap();
        assert_eq!(id.as_str(), "AB12-3456");

        assert!(BatchId::parse_from_filename("random-scan.pdf").is_none());
    }

    #[test]
    fn test_batch_ids_in_line_normalize_case() {
        // Extracted lines are lowercased; IDs come back uppercase.
        let ids = BatchId::find_all("supersedes c24-0001, see also c25-0002");
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].as_str(), "C24-0001");
        assert_eq!(ids[1].as_str(), "C25-0002");
        assert_eq!(
            ids[1],
            BatchId::parse_from_filename("C25-0002.pdf").unwrap()
        );
    }

    #[test]
    fn test_document_key() {
        assert_eq!(
            document_key("incoming/", "C25-0110.pdf"),
            "incoming/C25-0110.pdf"
        );
        assert_eq!(document_key("incoming", "a.pdf"), "incoming/a.pdf");
    }

    #[test]
    fn test_queue_item_derives_batch() {
        let event = WatchedEvent::new("/drop/C25-0110.pdf", "/drop");
        match QueueItem::document(event) {
            QueueItem::Document { batch, .. } => {
                assert_eq!(batch.unwrap().as_str(), "C25-0110")
            }
            _ => panic!("expected document item"),
        }
    }
}
