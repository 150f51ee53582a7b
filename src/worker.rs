//! Probe Worker Pool
//!
//! Fixed pool of identical tasks pulling from one shared job queue. The
//! queue is an `async_channel`, whose receiver is `Clone`, so every worker
//! waits on the queue directly instead of contending on a locked receiver.

use crate::endpoint::Endpoint;
use crate::geo::{GeoResolver, Resolution};
use crate::probe::LivenessProber;
use crate::sink::SinkMessage;
use crate::stats::ScanStats;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Message on the job queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Probe and locate one endpoint
    Work(Endpoint),
    /// Stop pulling; exactly one is sent per worker
    Shutdown,
}

/// Collaborators every worker shares
#[derive(Clone)]
pub struct WorkerContext {
    /// Liveness check
    pub prober: Arc<dyn LivenessProber>,
    /// Shared GeoIP handle
    pub resolver: Arc<dyn GeoResolver>,
    /// Run counters
    pub stats: Arc<ScanStats>,
}

struct Worker {
    id: usize,
    jobs: async_channel::Receiver<Job>,
    results: mpsc::Sender<SinkMessage>,
    ctx: WorkerContext,
}

impl Worker {
    async fn run(self) {
        loop {
            let endpoint = match self.jobs.recv().await {
                Ok(Job::Work(endpoint)) => endpoint,
                Ok(Job::Shutdown) => break,
                Err(_) => {
                    tracing::debug!(worker = self.id, "Job queue closed");
                    break;
                }
            };

            if !self.process(endpoint).await {
                tracing::warn!(worker = self.id, "Result queue closed, worker stopping");
                break;
            }
        }
        tracing::trace!(worker = self.id, "Worker stopped");
    }

    /// Returns `false` once results can no longer be delivered
    async fn process(&self, endpoint: Endpoint) -> bool {
        if !self.ctx.prober.probe(&endpoint).await {
            ScanStats::incr(&self.ctx.stats.endpoints_down);
            tracing::debug!(worker = self.id, %endpoint, "Endpoint down");
            return true;
        }
        ScanStats::incr(&self.ctx.stats.endpoints_alive);

        let resolution = match endpoint.ip() {
            Some(ip) => self.ctx.resolver.resolve(ip),
            None => Resolution::Skipped(format!("{} is not an IP address", endpoint.address)),
        };

        match resolution {
            Resolution::Located(coordinate) => {
                ScanStats::incr(&self.ctx.stats.resolved);
                tracing::debug!(worker = self.id, %endpoint, %coordinate, "Endpoint located");
                self.results.send(SinkMessage::Record(coordinate)).await.is_ok()
            }
            Resolution::Skipped(reason) => {
                ScanStats::incr(&self.ctx.stats.resolution_skipped);
                tracing::warn!(worker = self.id, %endpoint, %reason, "Geolocation skipped");
                true
            }
        }
    }
}

/// Running worker tasks
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers. Takes the queue receiver by value so the
    /// caller keeps no handle: once every worker is gone, sends fail
    /// instead of blocking.
    pub fn spawn(
        count: usize,
        jobs: async_channel::Receiver<Job>,
        results: mpsc::Sender<SinkMessage>,
        ctx: WorkerContext,
    ) -> Self {
        let handles = (0..count)
            .map(|id| {
                let worker = Worker {
                    id,
                    jobs: jobs.clone(),
                    results: results.clone(),
                    ctx: ctx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        tracing::info!(workers = count, "Worker pool started");
        Self { handles }
    }

    /// Number of workers spawned
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// `true` when no worker was spawned
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker, returning how many terminated abnormally
    pub async fn join(self) -> usize {
        let mut failed = 0;
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker terminated abnormally");
                failed += 1;
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use async_trait::async_trait;
    use std::net::IpAddr;

    struct UpIfPort22;

    #[async_trait]
    impl LivenessProber for UpIfPort22 {
        async fn probe(&self, endpoint: &Endpoint) -> bool {
            endpoint.port == "22"
        }
    }

    struct Fixed;

    impl GeoResolver for Fixed {
        fn resolve(&self, ip: IpAddr) -> Resolution {
            if ip.is_loopback() {
                Resolution::Skipped("loopback".into())
            } else {
                Resolution::Located(Coordinate::new(1.5, -2.5))
            }
        }
    }

    fn ctx() -> WorkerContext {
        WorkerContext {
            prober: Arc::new(UpIfPort22),
            resolver: Arc::new(Fixed),
            stats: Arc::new(ScanStats::new()),
        }
    }

    #[tokio::test]
    async fn test_workers_process_until_shutdown() {
        let ctx = ctx();
        let stats = ctx.stats.clone();
        let (job_tx, job_rx) = async_channel::bounded(4);
        let (result_tx, mut result_rx) = mpsc::channel(16);

        let pool = WorkerPool::spawn(2, job_rx, result_tx, ctx);
        assert_eq!(pool.len(), 2);

        for line in ["10.0.0.1:22", "10.0.0.2:80", "127.0.0.1:22", "host.example:22"] {
            job_tx.send(Job::Work(Endpoint::parse(line))).await.unwrap();
        }
        job_tx.send(Job::Shutdown).await.unwrap();
        job_tx.send(Job::Shutdown).await.unwrap();

        assert_eq!(pool.join().await, 0);

        let mut records = Vec::new();
        while let Ok(msg) = result_rx.try_recv() {
            records.push(msg);
        }
        assert_eq!(records, vec![SinkMessage::Record(Coordinate::new(1.5, -2.5))]);

        let snap = stats.snapshot();
        assert_eq!(snap.endpoints_alive, 3);
        assert_eq!(snap.endpoints_down, 1);
        assert_eq!(snap.resolved, 1);
        assert_eq!(snap.resolution_skipped, 2);
    }

    #[tokio::test]
    async fn test_workers_stop_when_queue_closed() {
        let (job_tx, job_rx) = async_channel::bounded::<Job>(1);
        let (result_tx, _result_rx) = mpsc::channel(1);

        let pool = WorkerPool::spawn(3, job_rx, result_tx, ctx());
        drop(job_tx);

        assert_eq!(pool.join().await, 0);
    }

    #[tokio::test]
    async fn test_send_fails_once_all_workers_gone() {
        let (job_tx, job_rx) = async_channel::bounded(1);
        let (result_tx, _result_rx) = mpsc::channel(1);

        let pool = WorkerPool::spawn(1, job_rx, result_tx, ctx());
        job_tx.send(Job::Shutdown).await.unwrap();
        pool.join().await;

        assert!(job_tx.send(Job::Work(Endpoint::parse("10.0.0.1:22"))).await.is_err());
    }
}
