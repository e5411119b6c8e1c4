//! Extraction service provider trait
//!
//! The cloud service runs asynchronous recognition jobs against objects
//! already uploaded to storage: submit returns a handle, the handle is
//! polled to a terminal state, and results are fetched as paginated blocks.

use async_trait::async_trait;

use crate::error::Result;

/// Terminal or in-flight state of an extraction job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Still queued or running
    InProgress,
    /// Results are ready to fetch
    Succeeded,
    /// The backend gave up on the document
    Failed { message: String },
}

/// Kind of a recognition result block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Page,
    Line,
    Word,
    TableCell,
}

/// Normalized position of a block on its page, fractions of page size
#[derive(Debug, Clone, Copy)]
pub struct BlockGeometry {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// One recognition result block
#[derive(Debug, Clone)]
pub struct ResultBlock {
    pub block_type: BlockType,
    /// Recognized text; pages carry none
    pub text: Option<String>,
    /// 1-indexed page the block sits on
    pub page: u32,
    pub geometry: Option<BlockGeometry>,
}

/// One fetched page of result blocks
#[derive(Debug, Clone)]
pub struct BlockPage {
    pub blocks: Vec<ResultBlock>,
    /// Token for the next fetch, absent on the last page
    pub next_token: Option<String>,
    /// True page count of the analyzed document, from result metadata
    pub document_pages: u32,
}

/// Trait for the asynchronous extraction service
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    /// Start a job for a stored object. Returns the job handle.
    async fn submit(&self, bucket: &str, key: &str) -> Result<String>;

    /// Current state of a job.
    async fn poll(&self, handle: &str) -> Result<JobState>;

    /// Fetch one page of result blocks for a succeeded job.
    async fn fetch_blocks(&self, handle: &str, page_token: Option<&str>) -> Result<BlockPage>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
