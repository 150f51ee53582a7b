//! Pipeline Coordinator
//!
//! Owns both queues, the worker pool and the sink, and walks the shutdown
//! sequence `Filling -> Draining -> WorkersDone -> SinkDone`. Each phase is a
//! value consumed by the transition into the next one, so the sink's
//! `Shutdown` cannot be sent before every worker has been joined.

use crate::config::ScanConfig;
use crate::endpoint::EndpointSource;
use crate::geo::GeoResolver;
use crate::probe::LivenessProber;
use crate::sink::{ResultSink, SinkMessage};
use crate::stats::{ScanStats, StatsSnapshot};
use crate::worker::{Job, WorkerContext, WorkerPool};
use crate::{ScanError, ScanResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// Not started
    Idle,
    /// Streaming endpoints into the job queue
    Filling,
    /// One `Shutdown` job per worker being enqueued
    Draining,
    /// Every worker joined; sink signalled
    WorkersDone,
    /// Sink joined, output closed
    SinkDone,
}

/// Why filling stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillOutcome {
    /// Input exhausted
    Exhausted,
    /// Cancellation requested
    Cancelled,
    /// No worker left to take jobs
    WorkersGone,
}

/// Summary of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    /// Unique per run
    pub scan_id: Uuid,
    /// Scan start
    pub started_at: DateTime<Utc>,
    /// Sink closed
    pub finished_at: DateTime<Utc>,
    /// Why dispatch stopped
    pub fill_outcome: FillOutcome,
    /// Lines in the output file
    pub lines_written: u64,
    /// Final counters
    pub stats: StatsSnapshot,
}

impl ScanReport {
    /// Dispatch stopped on cancellation
    pub fn cancelled(&self) -> bool {
        self.fill_outcome == FillOutcome::Cancelled
    }

    /// Wall-clock duration of the run
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Scan pipeline
pub struct ScanPipeline {
    config: ScanConfig,
    prober: Arc<dyn LivenessProber>,
    resolver: Arc<dyn GeoResolver>,
    stats: Arc<ScanStats>,
    cancel: CancellationToken,
    state: Arc<RwLock<PipelineState>>,
}

impl ScanPipeline {
    /// Create pipeline
    pub fn new(
        config: ScanConfig,
        prober: Arc<dyn LivenessProber>,
        resolver: Arc<dyn GeoResolver>,
    ) -> Self {
        Self {
            config,
            prober,
            resolver,
            stats: Arc::new(ScanStats::new()),
            cancel: CancellationToken::new(),
            state: Arc::new(RwLock::new(PipelineState::Idle)),
        }
    }

    /// Stop dispatching new endpoints when `token` is cancelled. In-flight
    /// probes still finish and the shutdown sequence still runs.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        *self.state.read()
    }

    /// Live counters
    pub fn stats(&self) -> Arc<ScanStats> {
        self.stats.clone()
    }

    fn enter(&self, state: PipelineState) {
        tracing::debug!(?state, "Pipeline state");
        *self.state.write() = state;
    }

    /// Run the scan over `source`.
    ///
    /// The output file is created before any worker starts. Returns once
    /// the sink has closed the file.
    pub async fn run<R>(&self, mut source: EndpointSource<R>) -> ScanResult<ScanReport>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        self.config.validate()?;

        let scan_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(
            %scan_id,
            workers = self.config.worker_count,
            timeout_ms = self.config.probe_timeout_ms,
            output = %self.config.output_path,
            "Starting scan"
        );

        let sink = ResultSink::create(
            &self.config.output_path,
            self.config.coordinate_precision,
            self.stats.clone(),
        )
        .await?;

        let (job_tx, job_rx) = async_channel::bounded(self.config.job_queue_capacity);
        let (result_tx, result_rx) = mpsc::channel(self.config.result_queue_capacity);

        let sink = tokio::spawn(sink.run(result_rx));
        let workers = WorkerPool::spawn(
            self.config.worker_count,
            job_rx,
            result_tx.clone(),
            WorkerContext {
                prober: self.prober.clone(),
                resolver: self.resolver.clone(),
                stats: self.stats.clone(),
            },
        );

        let filling = Filling {
            jobs: job_tx,
            workers,
            results: result_tx,
            sink,
        };

        self.enter(PipelineState::Filling);
        let fill = filling.fill(&mut source, &self.cancel, &self.stats).await;

        self.enter(PipelineState::Draining);
        let draining = filling.drain().await;

        let workers_done = draining.join_workers().await;
        self.enter(PipelineState::WorkersDone);
        let failed_workers = workers_done.failed;

        let lines_written = workers_done.close_sink().await;
        self.enter(PipelineState::SinkDone);

        let fill_outcome = fill?;
        let lines_written = lines_written?;
        if failed_workers > 0 {
            return Err(ScanError::Worker { failed: failed_workers });
        }

        let report = ScanReport {
            scan_id,
            started_at,
            finished_at: Utc::now(),
            fill_outcome,
            lines_written,
            stats: self.stats.snapshot(),
        };

        tracing::info!(
            %scan_id,
            outcome = ?report.fill_outcome,
            dispatched = report.stats.jobs_dispatched,
            alive = report.stats.endpoints_alive,
            down = report.stats.endpoints_down,
            skipped = report.stats.resolution_skipped,
            written = report.lines_written,
            elapsed_ms = report.elapsed().num_milliseconds(),
            "Scan complete"
        );

        Ok(report)
    }
}

struct Filling {
    jobs: async_channel::Sender<Job>,
    workers: WorkerPool,
    results: mpsc::Sender<SinkMessage>,
    sink: JoinHandle<ScanResult<u64>>,
}

impl Filling {
    async fn fill<R>(
        &self,
        source: &mut EndpointSource<R>,
        cancel: &CancellationToken,
        stats: &ScanStats,
    ) -> ScanResult<FillOutcome>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = source.next_endpoint() => Some(next?),
            };
            let Some(next) = next else {
                return Ok(cancelled(source));
            };
            let Some(endpoint) = next else {
                return Ok(FillOutcome::Exhausted);
            };

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                sent = self.jobs.send(Job::Work(endpoint)) => Some(sent.is_ok()),
            };
            match sent {
                Some(true) => ScanStats::incr(&stats.jobs_dispatched),
                Some(false) => {
                    tracing::error!("All workers exited, stopping dispatch");
                    return Ok(FillOutcome::WorkersGone);
                }
                None => return Ok(cancelled(source)),
            }
        }
    }

    /// One `Shutdown` per worker, then close the queue
    async fn drain(self) -> Draining {
        for _ in 0..self.workers.len() {
            if self.jobs.send(Job::Shutdown).await.is_err() {
                break;
            }
        }
        self.jobs.close();

        Draining {
            workers: self.workers,
            results: self.results,
            sink: self.sink,
        }
    }
}

fn cancelled<R>(source: &EndpointSource<R>) -> FillOutcome {
    tracing::warn!(lines_read = source.lines_read(), "Scan cancelled, draining workers");
    FillOutcome::Cancelled
}

struct Draining {
    workers: WorkerPool,
    results: mpsc::Sender<SinkMessage>,
    sink: JoinHandle<ScanResult<u64>>,
}

impl Draining {
    async fn join_workers(self) -> WorkersDone {
        let failed = self.workers.join().await;
        WorkersDone {
            failed,
            results: self.results,
            sink: self.sink,
        }
    }
}

struct WorkersDone {
    failed: usize,
    results: mpsc::Sender<SinkMessage>,
    sink: JoinHandle<ScanResult<u64>>,
}

impl WorkersDone {
    /// Exactly one `Shutdown` to the sink, then wait for it
    async fn close_sink(self) -> ScanResult<u64> {
        // Fails only if the sink already stopped; its own error is reported below
        let _ = self.results.send(SinkMessage::Shutdown).await;
        drop(self.results);

        match self.sink.await {
            Ok(result) => result,
            Err(e) => Err(ScanError::Sink(e.to_string())),
        }
    }
}
