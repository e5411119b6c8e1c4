//! Cloud extraction client: upload, submit, poll, collect
//!
//! Per document the client walks one state machine: not submitted,
//! uploaded, job submitted, polling, then succeeded or failed. The job
//! handle is written to the registry before the first poll so a crash
//! mid-poll resumes the same billed job after restart. A key already in
//! the text cache returns immediately with no network traffic at all.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::sleep;

use crate::config::{CloudConfig, QuotaConfig};
use crate::error::{Error, Result};
use crate::ingestion::pdf;
use crate::providers::{BlockType, DocumentStoreProvider, ExtractionProvider, JobState};
use crate::storage::{quota_period_key, ExtractionJobStatus, PipelineDb};
use crate::types::{document_key, ExtractedDocument, ExtractionSource};

pub struct CloudExtraction {
    provider: Arc<dyn ExtractionProvider>,
    store: Arc<dyn DocumentStoreProvider>,
    db: Arc<PipelineDb>,
    config: CloudConfig,
    quota: QuotaConfig,
}

impl CloudExtraction {
    pub fn new(
        provider: Arc<dyn ExtractionProvider>,
        store: Arc<dyn DocumentStoreProvider>,
        db: Arc<PipelineDb>,
        config: CloudConfig,
        quota: QuotaConfig,
    ) -> Self {
        Self {
            provider,
            store,
            db,
            config,
            quota,
        }
    }

    /// Run a document through the cloud service and return its lines.
    ///
    /// `page_limit` caps the upload; the quota reservation uses the
    /// capped estimate while the ledger is charged with the true page
    /// count the backend reports on completion.
    pub async fn extract(
        &self,
        filename: &str,
        data: &[u8],
        page_limit: u32,
    ) -> Result<ExtractedDocument> {
        let key = document_key(&self.config.folder, filename);

        if let Some(cached) = self.db.get_cached_text(&key)? {
            tracing::info!("[{}] Cloud cache hit ({} lines)", filename, cached.lines.len());
            return Ok(ExtractedDocument {
                key,
                lines: cached.lines,
                page_count: cached.page_count,
                source: ExtractionSource::Cache,
            });
        }

        let handle = match self.db.get_extraction_job(&key)? {
            Some(job) => {
                tracing::info!(
                    "[{}] Resuming extraction job {} from registry",
                    filename,
                    job.handle
                );
                job.handle
            }
            None => self.upload_and_submit(filename, data, page_limit, &key).await?,
        };

        self.db
            .update_extraction_job_status(&key, ExtractionJobStatus::Polling)?;
        self.poll_until_done(filename, &key, &handle).await?;

        let (lines, true_pages) = self.collect_lines(&handle).await?;

        let period = quota_period_key(Utc::now());
        let total = self.db.record_page_usage(&period, true_pages)?;
        tracing::info!(
            "[{}] Extraction complete: {} lines, {} pages ({}/{} pages used in {})",
            filename,
            lines.len(),
            true_pages,
            total,
            self.quota.monthly_page_cap,
            period
        );

        self.db.cache_text(&key, &lines, Some(true_pages), "cloud")?;
        self.db.remove_extraction_job(&key)?;

        Ok(ExtractedDocument {
            key,
            lines,
            page_count: Some(true_pages),
            source: ExtractionSource::Cloud,
        })
    }

    async fn upload_and_submit(
        &self,
        filename: &str,
        data: &[u8],
        page_limit: u32,
        key: &str,
    ) -> Result<String> {
        let total_pages = pdf::page_count(data, filename)?;
        let estimate = total_pages.min(page_limit);
        let period = quota_period_key(Utc::now());
        self.db
            .reserve_pages(&period, estimate, self.quota.monthly_page_cap)?;

        let upload = pdf::truncate_pages(data, filename, page_limit)?;
        let uri = self
            .store
            .put_object(&self.config.bucket, key, &upload)
            .await?;
        tracing::info!("[{}] Uploaded {} bytes to {}", filename, upload.len(), uri);

        let handle = self.provider.submit(&self.config.bucket, key).await?;
        // Handle goes to disk before the first poll; a crash from here on
        // re-attaches instead of paying for a second job.
        self.db.put_extraction_job(key, &handle)?;
        tracing::info!(
            "[{}] Submitted job {} to {}",
            filename,
            handle,
            self.provider.name()
        );
        Ok(handle)
    }

    /// Poll on a fixed interval until the job reaches a terminal state.
    ///
    /// Transient poll errors back off and count toward a consecutive
    /// failure cap; the cap and the overall deadline each abort this
    /// document only. The registry entry survives both so the job can be
    /// resumed, while a reported failure removes it for good.
    async fn poll_until_done(&self, filename: &str, key: &str, handle: &str) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(self.config.job_deadline_secs);
        let mut consecutive_failures = 0u32;

        loop {
            sleep(Duration::from_secs(self.config.poll_interval_secs)).await;

            match self.provider.poll(handle).await {
                Ok(JobState::Succeeded) => {
                    self.db
                        .update_extraction_job_status(key, ExtractionJobStatus::Succeeded)?;
                    return Ok(());
                }
                Ok(JobState::Failed { message }) => {
                    self.db.remove_extraction_job(key)?;
                    return Err(Error::JobFailed {
                        key: key.to_string(),
                        message,
                    });
                }
                Ok(JobState::InProgress) => {
                    consecutive_failures = 0;
                    tracing::debug!("[{}] Job {} still in progress", filename, handle);
                }
                Err(e) if e.is_contract() => return Err(e),
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        "[{}] Poll failure {}/{}: {}",
                        filename,
                        consecutive_failures,
                        self.config.max_poll_failures,
                        e
                    );
                    if consecutive_failures >= self.config.max_poll_failures {
                        return Err(Error::PollExhausted {
                            key: key.to_string(),
                            attempts: consecutive_failures,
                        });
                    }
                    sleep(Duration::from_secs(self.config.backoff_secs)).await;
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::JobTimeout {
                    key: key.to_string(),
                });
            }
        }
    }

    /// Fetch all result pages and flatten line blocks, in order, lowercased.
    async fn collect_lines(&self, handle: &str) -> Result<(Vec<String>, u32)> {
        let mut lines: Vec<String> = Vec::new();
        let mut token: Option<String> = None;
        let mut document_pages = 0u32;

        loop {
            let page = self.provider.fetch_blocks(handle, token.as_deref()).await?;
            document_pages = document_pages.max(page.document_pages);
            for block in page.blocks {
                if block.block_type == BlockType::Line {
                    if let Some(text) = block.text {
                        let line = text.trim().to_lowercase();
                        if !line.is_empty() {
                            lines.push(line);
                        }
                    }
                }
            }
            token = match page.next_token {
                Some(t) => Some(t),
                None => break,
            };
        }

        Ok((lines, document_pages))
    }
}
