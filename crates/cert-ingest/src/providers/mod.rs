//! Provider abstractions for the extraction service and object storage
//!
//! Trait-based seams so the pipeline can run against the real REST services
//! or in-memory fakes in tests.

pub mod cloud;
pub mod document_store;
pub mod extraction;

pub use document_store::DocumentStoreProvider;
pub use extraction::{
    BlockGeometry, BlockPage, BlockType, ExtractionProvider, JobState, ResultBlock,
};
