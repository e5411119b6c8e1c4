//! Core types shared across the pipeline

mod document;
mod record;

pub use document::{
    document_key, BatchId, ExtractedDocument, ExtractionSource, QueueItem, WatchedEvent,
};
pub use record::{
    CategoryKind, CategoryRecord, MeasurementStatus, RestrictorMeasurement,
    TransducerCalibration,
};
