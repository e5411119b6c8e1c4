//! Per-root FIFO queue between the watcher callback and the worker
//!
//! The channel is unbounded so the notify callback never blocks, and a
//! pending set drops repeat events for a path that is already queued or
//! being processed. Package directories in particular fire one event per
//! file created inside them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::types::QueueItem;

/// Sending half of a root's queue. Clone freely; all clones share the
/// pending set.
#[derive(Clone)]
pub struct DocumentQueue {
    sender: mpsc::UnboundedSender<QueueItem>,
    pending: Arc<DashMap<PathBuf, ()>>,
}

impl DocumentQueue {
    /// Create a queue, returning the receiving half for the worker.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<QueueItem>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Self {
            sender,
            pending: Arc::new(DashMap::new()),
        };
        (queue, receiver)
    }

    /// Enqueue an item unless its path is already pending.
    ///
    /// Callable from synchronous contexts such as the watch callback.
    /// Returns whether the item was enqueued.
    pub fn push(&self, item: QueueItem) -> bool {
        let path = item.path().to_path_buf();
        if self.pending.insert(path.clone(), ()).is_some() {
            return false;
        }
        if self.sender.send(item).is_err() {
            tracing::error!("Queue closed, dropping {}", path.display());
            self.pending.remove(&path);
            return false;
        }
        true
    }

    /// Release a path after the worker finished with it, so later events
    /// for the same path enqueue again.
    pub fn mark_done(&self, path: &Path) {
        self.pending.remove(path);
    }

    /// Number of paths queued or in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WatchedEvent;

    fn doc_item(path: &str) -> QueueItem {
        QueueItem::document(WatchedEvent::new(PathBuf::from(path), Path::new("/in")))
    }

    #[tokio::test]
    async fn test_push_preserves_arrival_order() {
        let (queue, mut receiver) = DocumentQueue::new();
        assert!(queue.push(doc_item("/in/a.pdf")));
        assert!(queue.push(doc_item("/in/b.pdf")));
        assert!(queue.push(doc_item("/in/c.pdf")));

        let names: Vec<String> = vec![
            receiver.recv().await.unwrap().filename(),
            receiver.recv().await.unwrap().filename(),
            receiver.recv().await.unwrap().filename(),
        ];
        assert_eq!(names, vec!["a.pdf", "b.pdf", "c.pdf"]);
    }

    #[tokio::test]
    async fn test_push_drops_duplicates_until_done() {
        let (queue, mut receiver) = DocumentQueue::new();
        assert!(queue.push(doc_item("/in/a.pdf")));
        assert!(!queue.push(doc_item("/in/a.pdf")));
        assert_eq!(queue.pending_count(), 1);

        let item = receiver.recv().await.unwrap();
        queue.mark_done(item.path());

        assert!(queue.push(doc_item("/in/a.pdf")));
        assert_eq!(queue.pending_count(), 1);
    }
}
