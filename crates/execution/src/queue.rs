//! Job intake.

use std::collections::HashSet;
use std::sync::Arc;
use async_trait::async_trait;
use jobworker_core::JobId;
use tokio::sync::{mpsc, Mutex};

/// Source of job ids shared by every slot of a worker.
///
/// Each popped id goes to exactly one caller. Slots acknowledge an id once
/// its run has finished.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Wait for the next job id; `None` once the queue is closed and drained.
    async fn pop(&self) -> Option<JobId>;

    /// Confirm a popped job has been fully processed.
    async fn ack(&self, id: &JobId);
}

/// In-process queue backed by an unbounded channel.
pub struct MemoryQueue {
    rx: Mutex<mpsc::UnboundedReceiver<JobId>>,
    unacked: Mutex<HashSet<JobId>>,
}

/// Producer side of a [`MemoryQueue`].
///
/// Clones share the same sender; [`QueueHandle::close`] on any clone closes
/// the queue for all of them.
#[derive(Clone)]
pub struct QueueHandle {
    tx: Arc<std::sync::Mutex<Option<mpsc::UnboundedSender<JobId>>>>,
}

impl MemoryQueue {
    /// Create a queue and its producer handle.
    pub fn channel() -> (MemoryQueue, QueueHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = MemoryQueue {
            rx: Mutex::new(rx),
            unacked: Mutex::new(HashSet::new()),
        };
        let handle = QueueHandle {
            tx: Arc::new(std::sync::Mutex::new(Some(tx))),
        };
        (queue, handle)
    }

    /// Ids that were popped but not yet acknowledged.
    pub async fn pending_acks(&self) -> usize {
        self.unacked.lock().await.len()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn pop(&self) -> Option<JobId> {
        let id = self.rx.lock().await.recv().await?;
        self.unacked.lock().await.insert(id.clone());
        Some(id)
    }

    async fn ack(&self, id: &JobId) {
        self.unacked.lock().await.remove(id);
    }
}

impl QueueHandle {
    /// Enqueue a job id. Returns false if the queue is closed.
    pub fn push(&self, id: impl Into<JobId>) -> bool {
        let Ok(guard) = self.tx.lock() else {
            return false;
        };
        match guard.as_ref() {
            Some(tx) => tx.send(id.into()).is_ok(),
            None => false,
        }
    }

    /// Stop accepting ids. Already queued ids are still delivered.
    pub fn close(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
    }

    /// Whether the queue still accepts ids.
    pub fn is_open(&self) -> bool {
        self.tx.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}
