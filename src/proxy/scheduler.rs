//! Concurrency orchestration for proxy checks
//!
//! Two interchangeable scheduling models behind one narrow trait: run the
//! probes with a concurrency cap and record every result. The proxy list is
//! processed in fixed-size chunks to bound peak memory and in-flight
//! connections; a chunk completes before the next one is submitted.
//!
//! Cancellation is cooperative: a shared flag stops new probes from being
//! admitted while in-flight probes run to completion.

use crate::proxy::checker::ProxyProbe;
use crate::proxy::models::ProxyRecord;
use crate::proxy::results::ResultAggregator;
use async_trait::async_trait;
use clap::ValueEnum;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Scheduling model selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// Cooperative tasks multiplexed on the async runtime
    #[default]
    Task,
    /// A pool of OS worker threads draining a queue
    Thread,
}

impl SchedulerKind {
    pub fn build(self, concurrency: usize, chunk_size: usize) -> Box<dyn Scheduler> {
        match self {
            SchedulerKind::Task => Box::new(TaskScheduler::new(concurrency, chunk_size)),
            SchedulerKind::Thread => Box::new(ThreadScheduler::new(concurrency, chunk_size)),
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::Task => write!(f, "task"),
            SchedulerKind::Thread => write!(f, "thread"),
        }
    }
}

/// Shared cancellation flag; triggering stops probe admission
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run the probes with a concurrency cap, recording every result.
///
/// Under normal completion every record yields exactly one result in the
/// aggregator, never zero and never duplicated. After the shutdown flag
/// triggers, only probes already admitted still finish.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn run(
        &self,
        records: Vec<ProxyRecord>,
        probe: Arc<dyn ProxyProbe>,
        results: Arc<ResultAggregator>,
        shutdown: ShutdownFlag,
    );
}

/// Cooperative-task model: all probes of a chunk are started and jointly
/// awaited, admission-gated by a counting semaphore
pub struct TaskScheduler {
    concurrency: usize,
    chunk_size: usize,
}

impl TaskScheduler {
    pub fn new(concurrency: usize, chunk_size: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl Scheduler for TaskScheduler {
    async fn run(
        &self,
        records: Vec<ProxyRecord>,
        probe: Arc<dyn ProxyProbe>,
        results: Arc<ResultAggregator>,
        shutdown: ShutdownFlag,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        for chunk in records.chunks(self.chunk_size) {
            if shutdown.is_triggered() {
                debug!("Shutdown requested, not submitting further chunks");
                break;
            }

            let mut completions = stream::iter(chunk.iter().cloned())
                .map(|record| {
                    let semaphore = Arc::clone(&semaphore);
                    let probe = Arc::clone(&probe);
                    let shutdown = shutdown.clone();
                    async move {
                        // Semaphore acquire only fails if the semaphore is
                        // closed, which won't happen while we hold the Arc
                        let _permit = semaphore
                            .acquire()
                            .await
                            .expect("Semaphore closed unexpectedly");
                        if shutdown.is_triggered() {
                            return None;
                        }
                        Some(probe.probe(&record).await)
                    }
                })
                .buffer_unordered(self.concurrency);

            while let Some(completion) = completions.next().await {
                if let Some(result) = completion {
                    results.record(result);
                }
            }
        }
    }
}

/// Parallel-thread model: per chunk, worker threads drain a shared queue;
/// each worker drives probe futures on its own single-threaded runtime
pub struct ThreadScheduler {
    concurrency: usize,
    chunk_size: usize,
}

impl ThreadScheduler {
    pub fn new(concurrency: usize, chunk_size: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl Scheduler for ThreadScheduler {
    async fn run(
        &self,
        records: Vec<ProxyRecord>,
        probe: Arc<dyn ProxyProbe>,
        results: Arc<ResultAggregator>,
        shutdown: ShutdownFlag,
    ) {
        let concurrency = self.concurrency;
        let chunk_size = self.chunk_size;

        // The pool blocks while it drains, so it lives on a blocking thread
        // and leaves the runtime free for the signal listener
        let outcome = tokio::task::spawn_blocking(move || {
            for chunk in records.chunks(chunk_size) {
                if shutdown.is_triggered() {
                    debug!("Shutdown requested, not submitting further chunks");
                    break;
                }

                let queue: Mutex<VecDeque<ProxyRecord>> =
                    Mutex::new(chunk.iter().cloned().collect());
                let workers = concurrency.min(chunk.len());

                std::thread::scope(|scope| {
                    for _ in 0..workers {
                        scope.spawn(|| {
                            let runtime = tokio::runtime::Builder::new_current_thread()
                                .enable_all()
                                .build()
                                .expect("Failed to build probe worker runtime");

                            loop {
                                if shutdown.is_triggered() {
                                    break;
                                }
                                let next =
                                    queue.lock().expect("chunk queue lock poisoned").pop_front();
                                let Some(record) = next else {
                                    break;
                                };
                                let result = runtime.block_on(probe.probe(&record));
                                results.record(result);
                            }
                        });
                    }
                });
            }
        })
        .await;

        if outcome.is_err() {
            warn!("Thread scheduler worker pool panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::{Anonymity, CheckResult, CheckStatus, ProxyScheme};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Probe double: synthesizes a result after a short pause and can
    /// trigger shutdown at a chosen invocation count
    struct StubProbe {
        calls: AtomicUsize,
        shutdown_after: Option<(usize, ShutdownFlag)>,
    }

    impl StubProbe {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                shutdown_after: None,
            }
        }

        fn shutting_down_after(count: usize, flag: ShutdownFlag) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                shutdown_after: Some((count, flag)),
            }
        }
    }

    #[async_trait]
    impl ProxyProbe for StubProbe {
        async fn probe(&self, record: &ProxyRecord) -> CheckResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((limit, flag)) = &self.shutdown_after {
                if call == *limit {
                    flag.trigger();
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
            CheckResult::working(
                record,
                10.0,
                Some(1000.0),
                "US".to_string(),
                "Dallas".to_string(),
                Anonymity::HighAnonymous,
            )
        }
    }

    fn records(count: usize) -> Vec<ProxyRecord> {
        (0..count)
            .map(|i| {
                ProxyRecord::new(
                    ProxyScheme::Http,
                    format!("10.0.{}.{}", i / 256, i % 256),
                    8080,
                )
            })
            .collect()
    }

    async fn run_scheduler(
        kind: SchedulerKind,
        records: Vec<ProxyRecord>,
        probe: Arc<StubProbe>,
        shutdown: ShutdownFlag,
    ) -> Arc<ResultAggregator> {
        let aggregator = Arc::new(ResultAggregator::new(0, None));
        let scheduler = kind.build(4, 10);
        scheduler
            .run(records, probe, Arc::clone(&aggregator), shutdown)
            .await;
        aggregator
    }

    #[tokio::test]
    async fn test_task_scheduler_one_result_per_record() {
        let inputs = records(25);
        let expected: Vec<String> = inputs.iter().map(ProxyRecord::url).collect();
        let probe = Arc::new(StubProbe::new());

        let aggregator =
            run_scheduler(SchedulerKind::Task, inputs, Arc::clone(&probe), ShutdownFlag::new())
                .await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 25);
        let mut produced: Vec<String> =
            aggregator.snapshot().iter().map(|r| r.proxy.clone()).collect();
        let mut expected = expected;
        produced.sort();
        expected.sort();
        assert_eq!(produced, expected);
    }

    #[tokio::test]
    async fn test_thread_scheduler_one_result_per_record() {
        let inputs = records(25);
        let expected: Vec<String> = inputs.iter().map(ProxyRecord::url).collect();
        let probe = Arc::new(StubProbe::new());

        let aggregator = run_scheduler(
            SchedulerKind::Thread,
            inputs,
            Arc::clone(&probe),
            ShutdownFlag::new(),
        )
        .await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 25);
        let mut produced: Vec<String> =
            aggregator.snapshot().iter().map(|r| r.proxy.clone()).collect();
        let mut expected = expected;
        produced.sort();
        expected.sort();
        assert_eq!(produced, expected);
    }

    #[tokio::test]
    async fn test_duplicate_inputs_produce_duplicate_results() {
        let record = ProxyRecord::new(ProxyScheme::Http, "10.0.0.1".to_string(), 8080);
        let inputs = vec![record.clone(), record];
        let probe = Arc::new(StubProbe::new());

        let aggregator =
            run_scheduler(SchedulerKind::Task, inputs, probe, ShutdownFlag::new()).await;
        assert_eq!(aggregator.len(), 2);
    }

    #[tokio::test]
    async fn test_pre_triggered_shutdown_admits_nothing() {
        for kind in [SchedulerKind::Task, SchedulerKind::Thread] {
            let shutdown = ShutdownFlag::new();
            shutdown.trigger();
            let probe = Arc::new(StubProbe::new());

            let aggregator =
                run_scheduler(kind, records(20), Arc::clone(&probe), shutdown).await;
            assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
            assert!(aggregator.is_empty());
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_after_current_chunk() {
        // Chunk size is 10; the flag triggers during the tenth probe, so the
        // first chunk still completes and no further chunk is admitted
        for kind in [SchedulerKind::Task, SchedulerKind::Thread] {
            let shutdown = ShutdownFlag::new();
            let probe = Arc::new(StubProbe::shutting_down_after(10, shutdown.clone()));

            let aggregator =
                run_scheduler(kind, records(40), Arc::clone(&probe), shutdown).await;
            assert_eq!(probe.calls.load(Ordering::SeqCst), 10);
            assert_eq!(aggregator.len(), 10);
        }
    }

    #[tokio::test]
    async fn test_results_are_working_stub_results() {
        let probe = Arc::new(StubProbe::new());
        let aggregator =
            run_scheduler(SchedulerKind::Task, records(3), probe, ShutdownFlag::new()).await;
        assert!(aggregator
            .snapshot()
            .iter()
            .all(|r| r.status == CheckStatus::Fast));
    }

    #[test]
    fn test_scheduler_kind_display() {
        assert_eq!(SchedulerKind::Task.to_string(), "task");
        assert_eq!(SchedulerKind::Thread.to_string(), "thread");
    }
}
