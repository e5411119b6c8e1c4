//! Certification document listener
//!
//! Run with: cargo run -p cert-ingest --bin cert-ingest-listener -- --config pipeline.toml

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cert_ingest::classify::{FieldExtractor, PartClassifier};
use cert_ingest::config::{PipelineConfig, RootKind, WatchedRoot};
use cert_ingest::extraction::{CloudExtraction, ExtractionRouter};
use cert_ingest::ingestion::spawn_watcher;
use cert_ingest::ocr::LocalOcrEngine;
use cert_ingest::processing::{DocumentQueue, RootWorker};
use cert_ingest::providers::cloud::{HttpExtractionClient, HttpObjectStore};
use cert_ingest::storage::{DocumentStatus, PipelineDb, TraceabilityStore};
use cert_ingest::types::{QueueItem, WatchedEvent};

#[derive(Parser)]
#[command(
    name = "cert-ingest-listener",
    version,
    about = "Watches delivery directories and ingests certification documents"
)]
struct Args {
    /// Path to a TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cert_ingest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║                 Certification Ingest                      ║
║       Document Classification and Traceability            ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    let config = PipelineConfig::load(args.config.as_deref())?;
    config.validate()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Watched roots: {}", config.watch.roots.len());
    tracing::info!("  - Cloud endpoint: {}", config.cloud.endpoint);
    tracing::info!("  - Monthly page cap: {}", config.quota.monthly_page_cap);
    tracing::info!("  - Categories: {}", config.categories.len());
    tracing::info!("  - Source profiles: {}", config.profiles.len());

    if config.profiles.iter().any(|p| p.uses_local_ocr())
        && (!LocalOcrEngine::has_pdftoppm() || !LocalOcrEngine::has_tesseract())
    {
        tracing::warn!("Local OCR profiles are configured but the tools are missing");
        tracing::warn!("  1. Install poppler: apt install poppler-utils");
        tracing::warn!("  2. Install tesseract: apt install tesseract-ocr");
    }

    let token = std::env::var(&config.cloud.api_key_env).unwrap_or_default();
    if token.is_empty() {
        tracing::warn!(
            "{} is not set; cloud extraction will be refused",
            config.cloud.api_key_env
        );
    }

    for path in [&config.storage.db_path, &config.storage.traceability_db_path] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Arc::new(PipelineDb::new(&config.storage.db_path)?);
    let traceability = Arc::new(TraceabilityStore::new(&config.storage.traceability_db_path)?);

    let stats = db.get_stats()?;
    tracing::info!(
        "Registry: {} document(s) seen, {} succeeded, {} failed, {} cached extraction(s)",
        stats.documents,
        stats.succeeded,
        stats.failed,
        stats.cached_texts
    );

    let in_flight = db.list_extraction_jobs()?;
    if !in_flight.is_empty() {
        tracing::info!(
            "{} extraction job(s) persisted from a previous run; they resume on next encounter",
            in_flight.len()
        );
        for job in &in_flight {
            tracing::info!("  - {} ({:?})", job.key, job.status);
        }
    }

    let provider = Arc::new(HttpExtractionClient::new(
        &config.cloud.endpoint,
        token.clone(),
    )?);
    let store = Arc::new(HttpObjectStore::new(&config.cloud.endpoint, token)?);
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
    let classifier = Arc::new(PartClassifier::new(&config.categories)?);
    let fields = Arc::new(FieldExtractor::new(config.tolerance.clone()));

    // Watchers must stay alive for the watches to keep firing.
    let mut watchers = Vec::new();
    for root in &config.watch.roots {
        let (queue, receiver) = DocumentQueue::new();

        if config.watch.sweep_on_start && root.kind == RootKind::Documents {
            sweep_root(&db, root, &config.watch.extension, &queue)?;
        }

        watchers.push(spawn_watcher(root, &config.watch.extension, queue.clone())?);

        let worker = RootWorker::new(
            db.clone(),
            traceability.clone(),
            router.clone(),
            classifier.clone(),
            fields.clone(),
            queue,
            Duration::from_secs(config.watch.package_debounce_secs),
        );
        tokio::spawn(worker.run(receiver));
    }

    println!("\nListener running. Press Ctrl+C to stop\n");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    drop(watchers);

    Ok(())
}

/// Enqueue documents that arrived while the listener was down.
fn sweep_root(
    db: &PipelineDb,
    root: &WatchedRoot,
    extension: &str,
    queue: &DocumentQueue,
) -> anyhow::Result<()> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(&root.path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(extension))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    let mut queued = 0usize;
    for path in files {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let processed = matches!(
            db.get_document(&filename)?,
            Some(r) if r.status == DocumentStatus::Success
        );
        if processed {
            continue;
        }
        if queue.push(QueueItem::document(WatchedEvent::new(path, &root.path))) {
            queued += 1;
        }
    }
    if queued > 0 {
        tracing::info!(
            "Startup sweep queued {} file(s) under {}",
            queued,
            root.path.display()
        );
    }
    Ok(())
}
