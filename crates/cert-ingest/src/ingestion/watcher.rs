//! Filesystem watchers feeding the per-root queues
//!
//! One recursive watch per configured root. The event callback filters and
//! forwards without blocking: document roots react to created files with
//! the expected extension, package roots map any event to its dated
//! package directory. Ordering and debouncing happen in the worker, not
//! here.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::{RootKind, WatchedRoot};
use crate::error::{Error, Result};
use crate::processing::DocumentQueue;
use crate::types::{QueueItem, WatchedEvent};

/// Watch one root, forwarding creation events into its queue.
///
/// The returned watcher must stay alive for the watch to remain active.
pub fn spawn_watcher(
    root: &WatchedRoot,
    extension: &str,
    queue: DocumentQueue,
) -> Result<RecommendedWatcher> {
    let root_path = root.path.clone();
    let kind = root.kind;
    let extension = extension.to_string();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => handle_event(&event, &root_path, kind, &extension, &queue),
            Err(e) => tracing::error!("Watch error on {}: {}", root_path.display(), e),
        }
    })
    .map_err(|e| Error::Internal(format!("Failed to create watcher: {}", e)))?;

    watcher
        .watch(&root.path, RecursiveMode::Recursive)
        .map_err(|e| {
            Error::Internal(format!("Failed to watch {}: {}", root.path.display(), e))
        })?;

    tracing::info!("Watching {} ({:?})", root.path.display(), kind);
    Ok(watcher)
}

fn handle_event(
    event: &Event,
    root: &Path,
    kind: RootKind,
    extension: &str,
    queue: &DocumentQueue,
) {
    if !matches!(event.kind, EventKind::Create(_)) {
        return;
    }

    for path in &event.paths {
        match kind {
            RootKind::Documents => {
                if is_candidate_file(path, extension) {
                    let item = QueueItem::document(WatchedEvent::new(path.clone(), root));
                    if queue.push(item) {
                        tracing::debug!("Enqueued {}", path.display());
                    }
                }
            }
            RootKind::Packages => {
                // Any event under a new dated directory resolves to that
                // directory; the queue drops repeats while one is pending.
                if let Some(dir) = package_dir_for(path, root) {
                    if dir.is_dir() {
                        let item = QueueItem::package(WatchedEvent::new(dir.clone(), root));
                        if queue.push(item) {
                            tracing::debug!("Enqueued package {}", dir.display());
                        }
                    }
                }
            }
        }
    }
}

/// Whether a created path is a document the pipeline handles.
fn is_candidate_file(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// The package directory an event path belongs to: the first component
/// under the watched root. The root itself maps to nothing.
fn package_dir_for(path: &Path, root: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(root).ok()?;
    let first = relative.components().next()?;
    Some(root.join(first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_is_candidate_file() {
        assert!(is_candidate_file(Path::new("/in/C25-0110.pdf"), "pdf"));
        assert!(is_candidate_file(Path::new("/in/C25-0110.PDF"), "pdf"));
        assert!(!is_candidate_file(Path::new("/in/C25-0110.tmp"), "pdf"));
        assert!(!is_candidate_file(Path::new("/in/noextension"), "pdf"));
    }

    #[test]
    fn test_package_dir_for() {
        let root = Path::new("/srv/calibrations");
        assert_eq!(
            package_dir_for(Path::new("/srv/calibrations/2025-06-12/pt.json"), root),
            Some(PathBuf::from("/srv/calibrations/2025-06-12"))
        );
        assert_eq!(
            package_dir_for(Path::new("/srv/calibrations/2025-06-12"), root),
            Some(PathBuf::from("/srv/calibrations/2025-06-12"))
        );
        assert_eq!(package_dir_for(root, root), None);
        assert_eq!(package_dir_for(Path::new("/elsewhere/x"), root), None);
    }

    #[tokio::test]
    async fn test_watcher_enqueues_created_document() {
        let dir = tempfile::tempdir().unwrap();
        let root = WatchedRoot {
            path: dir.path().to_path_buf(),
            kind: RootKind::Documents,
        };
        let (queue, mut receiver) = DocumentQueue::new();
        let _watcher = spawn_watcher(&root, "pdf", queue).unwrap();

        std::fs::write(dir.path().join("C25-0110.pdf"), b"%PDF-1.5").unwrap();

        let item = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("watcher should deliver within the timeout")
            .expect("queue should stay open");

        match item {
            QueueItem::Document { batch, event } => {
                assert_eq!(batch.unwrap().as_str(), "C25-0110");
                assert_eq!(event.filename(), "C25-0110.pdf");
            }
            _ => panic!("expected a document item"),
        }
    }
}
