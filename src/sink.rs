//! Result Sink
//!
//! Single writer of the coordinates file. Being the only consumer of the
//! result queue it needs no lock; lines land in queue arrival order.

use crate::geo::Coordinate;
use crate::stats::ScanStats;
use crate::{ScanError, ScanResult};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

/// Message on the result queue
#[derive(Debug, Clone, PartialEq)]
pub enum SinkMessage {
    /// One located endpoint
    Record(Coordinate),
    /// No further results will arrive
    Shutdown,
}

/// Owns the output file for the lifetime of a scan
pub struct ResultSink {
    writer: BufWriter<File>,
    path: String,
    precision: Option<usize>,
    stats: Arc<ScanStats>,
}

impl ResultSink {
    /// Create or truncate the output file
    pub async fn create(
        path: &str,
        precision: Option<usize>,
        stats: Arc<ScanStats>,
    ) -> ScanResult<Self> {
        let file = File::create(path)
            .await
            .map_err(|source| ScanError::OutputUnavailable {
                path: path.to_string(),
                source,
            })?;

        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_string(),
            precision,
            stats,
        })
    }

    /// Drain the queue until `Shutdown`, returning the number of lines
    /// written. Every line is flushed as it is written; the file is synced
    /// and closed before returning.
    pub async fn run(mut self, mut results: mpsc::Receiver<SinkMessage>) -> ScanResult<u64> {
        let mut written = 0u64;

        loop {
            match results.recv().await {
                Some(SinkMessage::Record(coordinate)) => {
                    self.write_line(&coordinate).await?;
                    written += 1;
                }
                Some(SinkMessage::Shutdown) => break,
                None => {
                    tracing::warn!(path = %self.path, "Result queue closed without shutdown");
                    break;
                }
            }
        }

        self.writer.flush().await?;
        self.writer.get_ref().sync_all().await?;
        tracing::info!(path = %self.path, lines = written, "Results file closed");

        Ok(written)
    }

    async fn write_line(&mut self, coordinate: &Coordinate) -> ScanResult<()> {
        let mut line = coordinate.format(self.precision);
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        ScanStats::incr(&self.stats.results_written);
        Ok(())
    }
}
