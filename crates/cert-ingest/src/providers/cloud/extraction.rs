//! HTTP client for the asynchronous extraction service
//!
//! Speaks a bearer-token REST API: jobs are created against objects in
//! storage, polled by handle, and results come back as paginated blocks
//! tagged with a type (page/line/word/table-cell) and geometry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::providers::extraction::{
    BlockGeometry, BlockPage, BlockType, ExtractionProvider, JobState, ResultBlock,
};

/// REST client for the extraction service
pub struct HttpExtractionClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpExtractionClient {
    /// Create a new client against a service endpoint
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn jobs_url(&self) -> String {
        format!("{}/v1/jobs", self.endpoint)
    }

    fn job_url(&self, handle: &str) -> String {
        format!("{}/v1/jobs/{}", self.endpoint, handle)
    }

    fn blocks_url(&self, handle: &str) -> String {
        format!("{}/v1/jobs/{}/blocks", self.endpoint, handle)
    }

    fn require_token(&self) -> Result<&str> {
        if self.token.is_empty() {
            return Err(Error::Config(
                "extraction service credentials not configured".to_string(),
            ));
        }
        Ok(&self.token)
    }
}

#[async_trait]
impl ExtractionProvider for HttpExtractionClient {
    async fn submit(&self, bucket: &str, key: &str) -> Result<String> {
        let token = self.require_token()?;

        let request = SubmitRequest {
            input: JobInput {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
        };

        let response = self
            .client
            .post(self.jobs_url())
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "Job submission failed ({}): {}",
                status, body
            )));
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("Failed to parse submit response: {}", e)))?;

        Ok(submitted.job_id)
    }

    async fn poll(&self, handle: &str) -> Result<JobState> {
        let token = self.require_token()?;

        let response = self
            .client
            .get(self.job_url(handle))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "Job status query failed ({}): {}",
                status, body
            )));
        }

        let job: JobStatusResponse = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("Failed to parse status response: {}", e)))?;

        Ok(match job.status.as_str() {
            "SUCCEEDED" => JobState::Succeeded,
            "FAILED" => JobState::Failed {
                message: job.status_message.unwrap_or_else(|| "unspecified".to_string()),
            },
            // QUEUED, IN_PROGRESS and anything newer keep us polling.
            _ => JobState::InProgress,
        })
    }

    async fn fetch_blocks(&self, handle: &str, page_token: Option<&str>) -> Result<BlockPage> {
        let token = self.require_token()?;

        let mut request = self.client.get(self.blocks_url(handle)).bearer_auth(token);
        if let Some(page_token) = page_token {
            request = request.query(&[("pageToken", page_token)]);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "Result fetch failed ({}): {}",
                status, body
            )));
        }

        let page: BlocksResponse = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("Failed to parse blocks response: {}", e)))?;

        let blocks = page
            .blocks
            .into_iter()
            .filter_map(wire_block_to_result)
            .collect();

        Ok(BlockPage {
            blocks,
            next_token: page.next_token,
            document_pages: page.document_metadata.map(|m| m.pages).unwrap_or(0),
        })
    }

    fn name(&self) -> &str {
        "cloud-extraction"
    }
}

fn wire_block_to_result(block: WireBlock) -> Option<ResultBlock> {
    let block_type = match block.block_type.as_str() {
        "PAGE" => BlockType::Page,
        "LINE" => BlockType::Line,
        "WORD" => BlockType::Word,
        "TABLE_CELL" => BlockType::TableCell,
        // Block types this pipeline does not consume are dropped.
        _ => return None,
    };

    Some(ResultBlock {
        block_type,
        text: block.text,
        page: block.page_number,
        geometry: block.geometry.map(|g| BlockGeometry {
            left: g.left,
            top: g.top,
            width: g.width,
            height: g.height,
        }),
    })
}

// ============================================================================
// API Request/Response types
// ============================================================================

#[derive(Serialize)]
struct SubmitRequest {
    input: JobInput,
}

#[derive(Serialize)]
struct JobInput {
    bucket: String,
    key: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(rename = "jobId")]
    job_id: String,
}

#[derive(Deserialize)]
struct JobStatusResponse {
    status: String,
    #[serde(rename = "statusMessage")]
    status_message: Option<String>,
}

#[derive(Deserialize)]
struct BlocksResponse {
    blocks: Vec<WireBlock>,
    #[serde(rename = "nextToken")]
    next_token: Option<String>,
    #[serde(rename = "documentMetadata")]
    document_metadata: Option<WireDocumentMetadata>,
}

#[derive(Deserialize)]
struct WireDocumentMetadata {
    pages: u32,
}

#[derive(Deserialize)]
struct WireBlock {
    #[serde(rename = "blockType")]
    block_type: String,
    text: Option<String>,
    #[serde(rename = "pageNumber")]
    page_number: u32,
    geometry: Option<WireGeometry>,
}

#[derive(Deserialize)]
struct WireGeometry {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
}
