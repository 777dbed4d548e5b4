//! Outbox Worker
//!
//! Background task that drains the outbox. After a batch that found work it
//! polls again immediately; after an empty batch or an error it waits one
//! poll interval. Shutdown lets the in-flight batch finish.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{BatchReport, OutboxError, OutboxRepository, Publisher};

/// One unit of outbox work
#[async_trait]
pub trait BatchSource: Send + Sync {
    async fn poll_once(&self) -> Result<BatchReport, OutboxError>;
}

/// Drains the database outbox through a publisher
pub struct OutboxProcessor<P> {
    repository: OutboxRepository,
    publisher: P,
    batch_size: i64,
}

impl<P: Publisher> OutboxProcessor<P> {
    pub fn new(repository: OutboxRepository, publisher: P, batch_size: i64) -> Self {
        Self {
            repository,
            publisher,
            batch_size,
        }
    }
}

#[async_trait]
impl<P: Publisher> BatchSource for OutboxProcessor<P> {
    async fn poll_once(&self) -> Result<BatchReport, OutboxError> {
        self.repository
            .process_batch(self.batch_size, &self.publisher)
            .await
    }
}

/// Configuration for the outbox worker
#[derive(Debug, Clone)]
pub struct OutboxWorkerConfig {
    /// Wait after an empty batch or an error (default: 200ms)
    pub poll_interval: Duration,
    /// Name used in log lines
    pub name: String,
}

impl Default for OutboxWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            name: "outbox-worker".to_string(),
        }
    }
}

/// Counters accumulated over the worker's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub polls: u64,
    pub published: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub errors: u64,
}

impl WorkerStats {
    fn record(&mut self, report: &BatchReport) {
        self.published += report.published as u64;
        self.retried += report.retried as u64;
        self.dead_lettered += report.dead_lettered as u64;
    }
}

/// When to poll next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextPoll {
    Immediately,
    After(Duration),
}

pub fn next_poll(result: &Result<BatchReport, OutboxError>, poll_interval: Duration) -> NextPoll {
    match result {
        Ok(report) if report.claimed > 0 => NextPoll::Immediately,
        _ => NextPoll::After(poll_interval),
    }
}

/// Spawns the worker task
pub struct OutboxWorker;

impl OutboxWorker {
    pub fn spawn<S>(source: S, config: OutboxWorkerConfig) -> OutboxWorkerHandle
    where
        S: BatchSource + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(run(source, config, shutdown_rx));
        OutboxWorkerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

/// Handle to a running worker
pub struct OutboxWorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<WorkerStats>,
}

impl OutboxWorkerHandle {
    /// Signal shutdown and wait for the current batch to finish
    pub async fn shutdown(self) -> WorkerStats {
        let _ = self.shutdown.send(true);
        match self.join.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "Outbox worker task failed");
                WorkerStats::default()
            }
        }
    }
}

async fn run<S: BatchSource>(
    source: S,
    config: OutboxWorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> WorkerStats {
    tracing::info!(
        worker = %config.name,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Outbox worker started"
    );

    let mut stats = WorkerStats::default();

    loop {
        if *shutdown.borrow() {
            break;
        }

        stats.polls += 1;
        let result = source.poll_once().await;
        match &result {
            Ok(report) => stats.record(report),
            Err(e) => {
                stats.errors += 1;
                tracing::error!(worker = %config.name, error = %e, "Outbox poll failed");
            }
        }

        match next_poll(&result, config.poll_interval) {
            NextPoll::Immediately => tokio::task::yield_now().await,
            NextPoll::After(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    tracing::info!(
        worker = %config.name,
        polls = stats.polls,
        published = stats.published,
        retried = stats.retried,
        dead_lettered = stats.dead_lettered,
        errors = stats.errors,
        "Outbox worker stopped"
    );

    stats
}
