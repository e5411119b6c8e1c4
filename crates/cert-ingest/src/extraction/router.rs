//! Per-document choice between the local OCR engine and the cloud service
//!
//! The text cache is checked first so a re-encountered document touches
//! neither backend. Otherwise the source profile decides: families with
//! a known page layout take the local engine, everything else goes to
//! the cloud with the profile's page limit.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::extraction::CloudExtraction;
use crate::ocr::LocalOcrEngine;
use crate::storage::PipelineDb;
use crate::types::{document_key, ExtractedDocument, ExtractionSource};

/// Which backend a document will take, decided from its filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Local { profile: String },
    Cloud { page_limit: u32 },
}

pub struct ExtractionRouter {
    cloud: CloudExtraction,
    engine: LocalOcrEngine,
    db: Arc<PipelineDb>,
    config: PipelineConfig,
}

impl ExtractionRouter {
    pub fn new(
        cloud: CloudExtraction,
        engine: LocalOcrEngine,
        db: Arc<PipelineDb>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            cloud,
            engine,
            db,
            config,
        }
    }

    /// Backend a filename routes to, before any cache consideration.
    pub fn plan(&self, filename: &str) -> Backend {
        if let Some(profile) = self.config.profile_for(filename) {
            if profile.uses_local_ocr() {
                return Backend::Local {
                    profile: profile.name.clone(),
                };
            }
        }
        Backend::Cloud {
            page_limit: self.config.page_limit_for(filename),
        }
    }

    /// Produce the ordered line sequence for one document.
    pub async fn extract(&self, filename: &str, data: &[u8]) -> Result<ExtractedDocument> {
        let key = document_key(&self.config.cloud.folder, filename);

        if let Some(cached) = self.db.get_cached_text(&key)? {
            tracing::info!("[{}] Text cache hit ({} lines)", filename, cached.lines.len());
            return Ok(ExtractedDocument {
                key,
                lines: cached.lines,
                page_count: cached.page_count,
                source: ExtractionSource::Cache,
            });
        }

        if let Some(profile) = self
            .config
            .profile_for(filename)
            .filter(|p| p.uses_local_ocr())
        {
            tracing::info!(
                "[{}] Routing to local OCR (profile '{}')",
                filename,
                profile.name
            );
            return self.engine.extract(&key, filename, data, profile);
        }

        let page_limit = self.config.page_limit_for(filename);
        tracing::info!(
            "[{}] Routing to cloud extraction (page limit {})",
            filename,
            page_limit
        );
        self.cloud.extract(filename, data, page_limit).await
    }
}
