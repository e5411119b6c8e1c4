//! Persistent state and traceability storage

mod database;
mod traceability;

pub use database::{
    quota_period_key, CachedText, DocumentRegistryRecord, DocumentStatus, ExtractionJobRecord,
    ExtractionJobStatus, PipelineDb, PipelineDbStats,
};
pub use traceability::TraceabilityStore;
