use crate::error::RagError;
use crate::models::DocumentId;
use crate::processing::DocumentProcessor;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    pub workers: usize,
    pub capacity: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn outstanding(&self) -> u64 {
        self.submitted.saturating_sub(self.succeeded + self.failed)
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            submitted: self.submitted.load(Ordering::Acquire),
            succeeded: self.succeeded.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
        }
    }
}

pub struct ProcessingQueue {
    sender: Mutex<Option<mpsc::Sender<DocumentId>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl ProcessingQueue {
    pub fn start(processor: Arc<DocumentProcessor>, options: QueueOptions) -> Result<Self, RagError> {
        if options.workers == 0 {
            return Err(RagError::InvalidConfig("queue needs at least one worker".to_string()));
        }
        if options.capacity == 0 {
            return Err(RagError::InvalidConfig("queue capacity must be positive".to_string()));
        }

        let (sender, receiver) = mpsc::channel(options.capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let workers = (0..options.workers)
            .map(|worker| {
                tokio::spawn(work(
                    worker,
                    Arc::clone(&processor),
                    Arc::clone(&receiver),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        info!(workers = options.workers, capacity = options.capacity, "processing queue started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            counters,
        })
    }

    pub fn submit(&self, id: DocumentId) -> Result<(), RagError> {
        let sender = self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(sender) = sender.as_ref() else {
            return Err(RagError::QueueClosed);
        };

        match sender.try_send(id) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::AcqRel);
                debug!(document_id = %id, "processing queued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(RagError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(RagError::QueueClosed),
        }
    }

    /// Enqueues a run, waiting for a free slot when the queue is full.
    pub async fn enqueue(&self, id: DocumentId) -> Result<(), RagError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(RagError::QueueClosed)?;

        sender.send(id).await.map_err(|_| RagError::QueueClosed)?;
        self.counters.submitted.fetch_add(1, Ordering::AcqRel);
        debug!(document_id = %id, "processing queued");
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }

    /// Stops accepting work and waits until every queued run has finished.
    pub async fn shutdown(&self) -> QueueStats {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take(),
        );

        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in workers {
            if let Err(join_error) = handle.await {
                warn!(error = %join_error, "processing worker ended abnormally");
            }
        }

        let stats = self.stats();
        info!(
            submitted = stats.submitted,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "processing queue drained"
        );
        stats
    }
}

async fn work(
    worker: usize,
    processor: Arc<DocumentProcessor>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<DocumentId>>>,
    counters: Arc<Counters>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(id) = next else {
            break;
        };

        match processor.trigger_processing(id).await {
            Ok(_) => {
                counters.succeeded.fetch_add(1, Ordering::AcqRel);
            }
            Err(_) => {
                // The processor has already recorded and logged the reason.
                counters.failed.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
    debug!(worker, "processing worker stopped");
}
