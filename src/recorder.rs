//! Asynchronous visit attribution.
//!
//! Routing hands each final outcome to [`VisitRecorder::record`], which never
//! blocks: records go into a bounded lock-free queue and a background worker
//! forwards them to a [`VisitSink`]. When the queue is full the oldest
//! record is dropped and counted. Sink failures are logged and never reach
//! the routing decision.

use std::path::{Path, PathBuf};
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use crossbeam_queue::ArrayQueue;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::RecordError;
use crate::model::VisitRecord;

/// Destination of visit records (attribution collaborator).
///
/// Delivery is at-most-once; implementations may block on I/O.
#[async_trait]
pub trait VisitSink: Send + Sync {
    async fn record_visit(&self, record: &VisitRecord) -> Result<(), RecordError>;
}

/// Emits one structured log event per visit.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl VisitSink for TracingSink {
    async fn record_visit(&self, record: &VisitRecord) -> Result<(), RecordError> {
        tracing::info!(
            target: "visits",
            randomizer_id = %record.randomizer_id,
            bot_id = record.bot_id.as_ref().map(|b| b.as_str()).unwrap_or("-"),
            outcome = %record.outcome,
            hour = record.hour,
            timestamp = %record.timestamp,
            "visit"
        );
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<VisitRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<VisitRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VisitSink for MemorySink {
    async fn record_visit(&self, record: &VisitRecord) -> Result<(), RecordError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

/// Appends one JSON object per visit to a file.
pub struct JsonLinesSink {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
}

impl JsonLinesSink {
    /// Opens `path` for appending, creating it and its parent directory.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            path: path.to_path_buf(),
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl VisitSink for JsonLinesSink {
    async fn record_visit(&self, record: &VisitRecord) -> Result<(), RecordError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Recorder counters.
///
/// Once the worker has stopped, `enqueued == recorded + failed + dropped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecorderStats {
    pub enqueued: u64,
    pub recorded: u64,
    pub failed: u64,
    pub dropped: u64,
    pub queued: usize,
}

struct Shared {
    queue: ArrayQueue<VisitRecord>,
    notify: Notify,
    closed: AtomicBool,
    /// Set once the worker has exited.
    stopped: AtomicBool,
    enqueued: AtomicU64,
    recorded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn discard_leftovers(&self) {
        let mut discarded = 0u64;
        while self.queue.pop().is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            self.dropped.fetch_add(discarded, Ordering::Relaxed);
            tracing::debug!(discarded, "visit records arrived after recorder stopped");
        }
    }
}

/// Fire-and-forget handle to the recording worker.
#[derive(Clone)]
pub struct VisitRecorder {
    shared: Arc<Shared>,
}

impl VisitRecorder {
    /// Starts the worker draining into `sink`. `capacity` bounds the queue.
    pub fn spawn(sink: Arc<dyn VisitSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let shared = Arc::new(Shared {
            queue: ArrayQueue::new(capacity.max(1)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            enqueued: AtomicU64::new(0),
            recorded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let worker = Arc::clone(&shared);
        let handle = tokio::spawn(async move {
            run_worker(worker, sink).await;
        });

        (Self { shared }, handle)
    }

    /// Queues a record without blocking. Drops the oldest queued record when
    /// the queue is full.
    pub fn record(&self, record: VisitRecord) {
        self.shared.enqueued.fetch_add(1, Ordering::Relaxed);
        if self.shared.closed.load(Ordering::Acquire) {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if let Some(evicted) = self.shared.queue.force_push(record) {
            let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(
                randomizer_id = %evicted.randomizer_id,
                dropped,
                "visit queue full, oldest record dropped"
            );
        }
        self.shared.notify.notify_one();

        // Pairs with the fence in `run_worker`: either the worker's final
        // sweep sees this record or this call sees the worker stopped.
        fence(Ordering::SeqCst);
        if self.shared.stopped.load(Ordering::Relaxed) {
            self.shared.discard_leftovers();
        }
    }

    /// Stops accepting records. The worker drains what is queued and exits.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }

    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            enqueued: self.shared.enqueued.load(Ordering::Relaxed),
            recorded: self.shared.recorded.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            queued: self.shared.queue.len(),
        }
    }
}

async fn run_worker(shared: Arc<Shared>, sink: Arc<dyn VisitSink>) {
    loop {
        while let Some(record) = shared.queue.pop() {
            match sink.record_visit(&record).await {
                Ok(()) => {
                    shared.recorded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    shared.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        error = %e,
                        randomizer_id = %record.randomizer_id,
                        outcome = %record.outcome,
                        "failed to record visit"
                    );
                }
            }
        }

        if shared.closed.load(Ordering::Acquire) && shared.queue.is_empty() {
            break;
        }
        shared.notify.notified().await;
    }

    shared.stopped.store(true, Ordering::Relaxed);
    fence(Ordering::SeqCst);
    shared.discard_leftovers();
    tracing::debug!("visit recorder stopped");
}
