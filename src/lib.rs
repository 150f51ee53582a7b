//! OpenSASE Scanner - Endpoint Liveness & GeoIP Sweep
//!
//! Batch scanner that checks which endpoints of a list accept TCP
//! connections and records the geographic coordinate of each live one.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          OPENSASE SCANNER                               │
//! │                                                                         │
//! │  ┌──────────────┐   job queue (10)    ┌──────────────────────────────┐  │
//! │  │ ENDPOINT     │ ──────────────────▶ │        WORKER POOL (W)       │  │
//! │  │ SOURCE       │   Work | Shutdown   │  TCP probe ─▶ GeoIP resolve  │  │
//! │  └──────┬───────┘                     └──────────────┬───────────────┘  │
//! │         │                                            │                  │
//! │  ┌──────▼──────────────────────┐   result queue (100)│Record | Shutdown │
//! │  │     PIPELINE COORDINATOR    │                     │                  │
//! │  │ Filling ─▶ Draining ─▶      │      ┌──────────────▼───────────────┐  │
//! │  │ WorkersDone ─▶ SinkDone     │      │   RESULT SINK (single writer)│  │
//! │  └─────────────────────────────┘      │   (lat, lon) per line        │  │
//! │                                       └──────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod endpoint;
pub mod geo;
pub mod pipeline;
pub mod probe;
pub mod sink;
pub mod stats;
pub mod worker;

use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use config::ScanConfig;
pub use endpoint::{Endpoint, EndpointSource};
pub use geo::{Coordinate, GeoResolver, MaxMindResolver, Resolution};
pub use pipeline::{FillOutcome, PipelineState, ScanPipeline, ScanReport};
pub use probe::{LivenessProber, TcpProber};
pub use sink::ResultSink;
pub use stats::{ScanStats, StatsSnapshot};

/// Scanner error types
#[derive(Debug, Error)]
pub enum ScanError {
    /// Endpoint list could not be opened
    #[error("input unavailable: {path}: {source}")]
    InputUnavailable {
        /// Input path as configured
        path: String,
        /// Underlying open error
        #[source]
        source: std::io::Error,
    },

    /// GeoIP database could not be opened
    #[error("geo database unavailable: {path}: {reason}")]
    GeoDatabase {
        /// Database path as configured
        path: String,
        /// Reader error
        reason: String,
    },

    /// Output file could not be created
    #[error("output unavailable: {path}: {source}")]
    OutputUnavailable {
        /// Output path as configured
        path: String,
        /// Underlying create error
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(String),

    /// IO error while reading input or writing results
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// One or more workers terminated abnormally
    #[error("{failed} worker(s) terminated abnormally")]
    Worker {
        /// Number of workers that panicked or were aborted
        failed: usize,
    },

    /// Result sink terminated abnormally
    #[error("sink error: {0}")]
    Sink(String),
}

/// Result type for the scanner
pub type ScanResult<T> = Result<T, ScanError>;

/// Run a full scan with the TCP prober and the MaxMind resolver.
///
/// Startup resources are acquired in a fixed order: endpoint list, GeoIP
/// database, then the output file. A missing input or database therefore
/// never creates or truncates the output.
pub async fn scan(config: ScanConfig, cancel: CancellationToken) -> ScanResult<ScanReport> {
    config.validate()?;

    let source = EndpointSource::open(&config.input_path).await?;
    let resolver = MaxMindResolver::open(&config.geo_db_path)?;
    let prober = TcpProber::new(config.probe_timeout());

    let pipeline = ScanPipeline::new(config, Arc::new(prober), Arc::new(resolver))
        .with_cancellation(cancel);
    pipeline.run(source).await
}
