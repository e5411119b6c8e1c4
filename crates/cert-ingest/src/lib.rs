//! cert-ingest: ingestion and classification pipeline for scanned
//! certification documents
//!
//! Watches delivery directories for certification scans of manufactured
//! hardware, extracts their text through a cloud extraction service or a
//! local OCR engine, classifies each document into a part category, and
//! persists structured traceability records keyed by certification batch.

pub mod classify;
pub mod config;
pub mod error;
pub mod extraction;
pub mod ingestion;
pub mod ocr;
pub mod processing;
pub mod providers;
pub mod storage;
pub mod types;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use types::{
    BatchId, CategoryKind, CategoryRecord, ExtractedDocument, QueueItem, TransducerCalibration,
    WatchedEvent,
};
