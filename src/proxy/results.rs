//! Result aggregation and checkpointing
//!
//! One aggregator instance is built per run and shared across workers. It
//! owns the ordered result collection, triggers in-progress checkpoints at
//! the configured autosave cadence, and guarantees a final checkpoint on
//! completion or interruption.

use crate::proxy::models::CheckResult;
use crate::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Progress through one run: completed probes out of the total
pub struct ProgressCounter {
    completed: AtomicUsize,
    total: usize,
}

impl ProgressCounter {
    pub fn new(total: usize) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total,
        }
    }

    /// Count one more completed probe; returns (index, total) for display
    pub fn advance(&self) -> (usize, usize) {
        let index = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        (index, self.total)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Whether a checkpoint is an autosave snapshot or the closing write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointStage {
    InProgress,
    Final,
}

/// Persistence interface the aggregator hands snapshots to
pub trait ResultSink: Send + Sync {
    fn write(&self, results: &[CheckResult], stage: CheckpointStage) -> Result<()>;
}

/// Shared, mutex-guarded result collection with periodic checkpointing
pub struct ResultAggregator {
    results: Mutex<Vec<CheckResult>>,
    /// Snapshot every N recorded results; 0 disables autosave
    autosave_interval: usize,
    sink: Option<Arc<dyn ResultSink>>,
    pending: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl ResultAggregator {
    pub fn new(autosave_interval: usize, sink: Option<Arc<dyn ResultSink>>) -> Self {
        Self {
            results: Mutex::new(Vec::new()),
            autosave_interval,
            sink,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Append a completed result. When the running count hits an exact
    /// multiple of the autosave interval, a snapshot is written on a
    /// background thread so probing is never blocked on disk.
    pub fn record(&self, result: CheckResult) {
        let snapshot = {
            let mut results = self.results.lock().expect("result collection lock poisoned");
            results.push(result);
            let count = results.len();
            if self.autosave_interval > 0 && count % self.autosave_interval == 0 {
                Some(results.clone())
            } else {
                None
            }
        };

        if let Some(snapshot) = snapshot {
            self.checkpoint_in_background(snapshot);
        }
    }

    fn checkpoint_in_background(&self, snapshot: Vec<CheckResult>) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        debug!("Autosaving {} results", snapshot.len());
        let handle = std::thread::spawn(move || {
            if let Err(e) = sink.write(&snapshot, CheckpointStage::InProgress) {
                warn!("Autosave failed: {}", e);
            }
        });
        self.pending
            .lock()
            .expect("checkpoint handle lock poisoned")
            .push(handle);
    }

    /// Write the closing checkpoint. Outstanding autosave threads are
    /// joined first so the final file never races an in-progress one.
    pub fn final_checkpoint(&self) -> Result<()> {
        let handles: Vec<_> = self
            .pending
            .lock()
            .expect("checkpoint handle lock poisoned")
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.join();
        }

        let Some(sink) = &self.sink else {
            return Ok(());
        };
        let snapshot = self.snapshot();
        sink.write(&snapshot, CheckpointStage::Final)
    }

    /// Clone of the collection in completion order
    pub fn snapshot(&self) -> Vec<CheckResult> {
        self.results
            .lock()
            .expect("result collection lock poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.results
            .lock()
            .expect("result collection lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
