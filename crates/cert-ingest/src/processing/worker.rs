//! Per-root queue worker
//!
//! Exactly one worker drains one root's queue, finishing each item
//! before the next is dequeued. The worker is the error boundary:
//! contract errors stop it, anything else fails the current document
//! only and the loop moves on.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::classify::{FieldExtractor, PartClassifier};
use crate::error::{Error, Result};
use crate::extraction::ExtractionRouter;
use crate::ingestion::parse_package_dir;
use crate::processing::DocumentQueue;
use crate::storage::{DocumentRegistryRecord, DocumentStatus, PipelineDb, TraceabilityStore};
use crate::types::{BatchId, CategoryKind, QueueItem};

/// Pause before reading a freshly delivered file so the producer can
/// finish writing it.
const FILE_SETTLE_MS: u64 = 500;

pub struct RootWorker {
    db: Arc<PipelineDb>,
    traceability: Arc<TraceabilityStore>,
    router: Arc<ExtractionRouter>,
    classifier: Arc<PartClassifier>,
    fields: Arc<FieldExtractor>,
    queue: DocumentQueue,
    package_debounce: Duration,
}

impl RootWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<PipelineDb>,
        traceability: Arc<TraceabilityStore>,
        router: Arc<ExtractionRouter>,
        classifier: Arc<PartClassifier>,
        fields: Arc<FieldExtractor>,
        queue: DocumentQueue,
        package_debounce: Duration,
    ) -> Self {
        Self {
            db,
            traceability,
            router,
            classifier,
            fields,
            queue,
            package_debounce,
        }
    }

    /// Drain the queue until the sender side closes or a contract error
    /// surfaces.
    pub async fn run(self, mut receiver: mpsc::UnboundedReceiver<QueueItem>) {
        tracing::info!("Worker started");

        while let Some(item) = receiver.recv().await {
            let filename = item.filename();

            let result = match &item {
                QueueItem::Document { event, batch } => {
                    self.process_document(&filename, &event.path, batch.as_ref())
                        .await
                }
                QueueItem::Package { event } => self.process_package(&event.path).await,
            };
            self.queue.mark_done(item.path());

            match result {
                Ok(()) => {}
                Err(e) if e.is_contract() => {
                    tracing::error!("[{}] {}; stopping worker", filename, e);
                    break;
                }
                Err(e) => {
                    tracing::error!("[{}] {}", filename, e);
                }
            }
        }

        tracing::info!("Worker stopped");
    }

    async fn process_document(
        &self,
        filename: &str,
        path: &Path,
        batch: Option<&BatchId>,
    ) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(FILE_SETTLE_MS)).await;

        let data = tokio::fs::read(path).await?;
        let content_hash = hex::encode(Sha256::digest(&data));
        tracing::info!("[{}] Starting processing ({} bytes)", filename, data.len());

        if let Some(previous) = self.db.get_document(filename)? {
            if previous.content_hash == content_hash
                && previous.status == DocumentStatus::Success
            {
                tracing::info!("[{}] Unchanged since last success, skipping", filename);
                let mut skipped =
                    DocumentRegistryRecord::skipped(filename.to_string(), content_hash);
                skipped.category = previous.category;
                self.db.upsert_document(&skipped)?;
                return Ok(());
            }
            if previous.content_hash != content_hash {
                tracing::info!("[{}] Content changed since last delivery, reprocessing", filename);
            }
        }

        self.db.upsert_document(&DocumentRegistryRecord::processing(
            filename.to_string(),
            content_hash.clone(),
        ))?;

        match self.extract_and_persist(filename, &data, batch).await {
            Ok(category) => {
                self.db.upsert_document(&DocumentRegistryRecord::success(
                    filename.to_string(),
                    content_hash,
                    category.as_str().to_string(),
                ))?;
                tracing::info!("[{}] COMPLETE: recorded as {}", filename, category);
                Ok(())
            }
            Err(e) => {
                let failed = DocumentRegistryRecord::failed(
                    filename.to_string(),
                    content_hash,
                    e.to_string(),
                );
                if let Err(db_err) = self.db.upsert_document(&failed) {
                    tracing::error!("[{}] Failed to record failure: {}", filename, db_err);
                }
                Err(e)
            }
        }
    }

    async fn extract_and_persist(
        &self,
        filename: &str,
        data: &[u8],
        batch: Option<&BatchId>,
    ) -> Result<CategoryKind> {
        let batch = batch.ok_or_else(|| {
            Error::file_parse(filename, "no certification batch ID in filename")
        })?;

        let document = self.router.extract(filename, data).await?;
        tracing::info!(
            "[{}] Extracted {} lines via {}",
            filename,
            document.lines.len(),
            document.source
        );

        let category = self.classifier.classify(&document.lines, batch, filename)?;
        tracing::info!("[{}] Classified as {}", filename, category);

        let record = self
            .fields
            .extract(category, &document.lines, batch, filename)?;
        self.traceability.upsert_records(&[record])?;
        Ok(category)
    }

    async fn process_package(&self, dir: &Path) -> Result<()> {
        // Several sidecar files land together; wait for the delivery to
        // finish before enumerating.
        tokio::time::sleep(self.package_debounce).await;

        let dir_key = dir.to_string_lossy().into_owned();
        if self.db.is_dir_processed(&dir_key)? {
            tracing::debug!("Package {} already processed, skipping", dir.display());
            return Ok(());
        }

        let calibrations = parse_package_dir(dir)?;
        if calibrations.is_empty() {
            tracing::warn!("Package {} contained no calibration sidecars", dir.display());
        } else {
            self.traceability.upsert_calibrations(&calibrations)?;
        }
        self.db.mark_dir_processed(&dir_key, calibrations.len() as u32)?;
        tracing::info!(
            "Package {}: {} calibrations recorded",
            dir.display(),
            calibrations.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::config::PipelineConfig;
    use crate::extraction::CloudExtraction;
    use crate::ocr::LocalOcrEngine;
    use crate::providers::cloud::{HttpExtractionClient, HttpObjectStore};
    use crate::types::{document_key, WatchedEvent};

    /// Worker over in-memory stores and dead-endpoint HTTP providers;
    /// every document is served from the pre-seeded text cache.
    fn test_worker(
        db: Arc<PipelineDb>,
        traceability: Arc<TraceabilityStore>,
        queue: DocumentQueue,
    ) -> RootWorker {
        let config = PipelineConfig::default();
        let provider = Arc::new(HttpExtractionClient::new("http://localhost:1", "").unwrap());
        let store = Arc::new(HttpObjectStore::new("http://localhost:1", "").unwrap());
        let cloud = CloudExtraction::new(
            provider,
            store,
            db.clone(),
            config.cloud.clone(),
            config.quota.clone(),
        );
        let engine = LocalOcrEngine::new(config.ocr.clone(), db.clone());
        let router = Arc::new(ExtractionRouter::new(
            cloud,
            engine,
            db.clone(),
            config.clone(),
        ));
        let classifier = Arc::new(PartClassifier::new(&config.categories).unwrap());
        let fields = Arc::new(FieldExtractor::new(config.tolerance.clone()));
        RootWorker::new(
            db,
            traceability,
            router,
            classifier,
            fields,
            queue,
            Duration::ZERO,
        )
    }

    fn seed_document(db: &PipelineDb, root: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = root.join(name);
        std::fs::write(&path, name.as_bytes()).unwrap();
        let lines: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
        db.cache_text(&document_key("incoming", name), &lines, Some(1), "cloud")
            .unwrap();
        path
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !condition() {
            if std::time::Instant::now() >= deadline {
                panic!("condition not reached within 10s");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_documents_processed_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let db = Arc::new(PipelineDb::in_memory().unwrap());
        let traceability = Arc::new(TraceabilityStore::in_memory().unwrap());
        let (queue, receiver) = DocumentQueue::new();

        let specs: [(&str, &[&str]); 3] = [
            (
                "C25-0001.pdf",
                &["valve assembly", "drawing no. 100-a", "quantity supplied: 1"],
            ),
            (
                "C25-0002.pdf",
                &["manifold block", "tekening nr. 200-b", "quantity supplied: 2"],
            ),
            (
                "C25-0001 rev2.pdf",
                &["valve assembly", "drawing no. 100-a", "quantity supplied: 3"],
            ),
        ];
        let mut paths = Vec::new();
        for (name, lines) in &specs {
            paths.push(seed_document(&db, &root, name, lines));
        }

        let worker = test_worker(db.clone(), traceability.clone(), queue.clone());
        tokio::spawn(worker.run(receiver));

        for path in &paths {
            assert!(queue.push(QueueItem::document(WatchedEvent::new(path, &root))));
        }

        wait_for(|| {
            specs.iter().all(|(name, _)| {
                matches!(
                    db.get_document(name).unwrap(),
                    Some(r) if r.status == DocumentStatus::Success
                )
            })
        })
        .await;

        // Both revisions of C25-0001 share the (certification, part)
        // key; last write winning proves rev2 ran after the original.
        assert_eq!(
            traceability.get_bulk("C25-0001", "valve").unwrap(),
            Some((3, "100-A".to_string()))
        );
        assert_eq!(
            traceability.get_bulk("C25-0002", "manifold").unwrap(),
            Some((2, "200-B".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unchanged_redelivery_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let db = Arc::new(PipelineDb::in_memory().unwrap());
        let traceability = Arc::new(TraceabilityStore::in_memory().unwrap());
        let (queue, receiver) = DocumentQueue::new();

        let path = seed_document(
            &db,
            &root,
            "C25-0003.pdf",
            &["valve assembly", "drawing no. 300-c", "quantity supplied: 7"],
        );

        let worker = test_worker(db.clone(), traceability.clone(), queue.clone());
        tokio::spawn(worker.run(receiver));

        queue.push(QueueItem::document(WatchedEvent::new(&path, &root)));
        wait_for(|| {
            matches!(
                db.get_document("C25-0003.pdf").unwrap(),
                Some(r) if r.status == DocumentStatus::Success
            )
        })
        .await;
        wait_for(|| queue.pending_count() == 0).await;

        queue.push(QueueItem::document(WatchedEvent::new(&path, &root)));
        wait_for(|| {
            matches!(
                db.get_document("C25-0003.pdf").unwrap(),
                Some(r) if r.status == DocumentStatus::Skipped
            )
        })
        .await;

        let stored = db.get_document("C25-0003.pdf").unwrap().unwrap();
        assert_eq!(stored.process_count, 2);
        // The skip keeps the category from the successful run.
        assert_eq!(stored.category.as_deref(), Some("valve"));
        assert_eq!(
            traceability.get_bulk("C25-0003", "valve").unwrap(),
            Some((7, "300-C".to_string()))
        );
    }

    #[tokio::test]
    async fn test_package_ingestion_marks_dir_processed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let package = root.join("2025-08-12");
        std::fs::create_dir(&package).unwrap();
        std::fs::write(
            package.join("pt-2001.json"),
            r#"{"serial": "PT-2001", "coefficients": [1.0, 2.5]}"#,
        )
        .unwrap();

        let db = Arc::new(PipelineDb::in_memory().unwrap());
        let traceability = Arc::new(TraceabilityStore::in_memory().unwrap());
        let (queue, receiver) = DocumentQueue::new();
        let worker = test_worker(db.clone(), traceability.clone(), queue.clone());
        tokio::spawn(worker.run(receiver));

        queue.push(QueueItem::package(WatchedEvent::new(&package, &root)));
        wait_for(|| db.is_dir_processed(&package.to_string_lossy()).unwrap()).await;

        assert_eq!(
            traceability.get_calibration("PT-2001").unwrap(),
            Some(vec![1.0, 2.5])
        );
    }
}
