//! OpenSASE Scanner - Main Entry Point
//!
//! # Usage
//!
//! ```bash
//! opensase-scanner --input ips --output coordinates --geo-db GeoLite2-City.mmdb
//! opensase-scanner --config /etc/opensase/scanner.json --workers 50
//! ```

use anyhow::Context;
use clap::Parser;
use opensase_scanner::ScanConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "opensase-scanner")]
#[command(author = "OpenSASE")]
#[command(version)]
#[command(about = "Probe endpoints over TCP and record the location of live ones", long_about = None)]
struct Cli {
    /// JSON config file; flags below override it
    #[arg(long, short, env = "SCANNER_CONFIG")]
    config: Option<String>,

    /// Endpoint list, one address[:port] per line
    #[arg(long, short, env = "SCANNER_INPUT")]
    input: Option<String>,

    /// Coordinates output file (truncated)
    #[arg(long, short, env = "SCANNER_OUTPUT")]
    output: Option<String>,

    /// MaxMind City database
    #[arg(long, env = "SCANNER_GEO_DB")]
    geo_db: Option<String>,

    /// Concurrent probe workers
    #[arg(long, short, env = "SCANNER_WORKERS")]
    workers: Option<usize>,

    /// TCP connect timeout in milliseconds
    #[arg(long, env = "SCANNER_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Fixed decimals for written coordinates
    #[arg(long)]
    precision: Option<usize>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<ScanConfig> {
        let mut config = match &self.config {
            Some(path) => ScanConfig::load(path)
                .with_context(|| format!("failed to load config {}", path))?,
            None => ScanConfig::default(),
        };

        if let Some(input) = self.input {
            config.input_path = input;
        }
        if let Some(output) = self.output {
            config.output_path = output;
        }
        if let Some(geo_db) = self.geo_db {
            config.geo_db_path = geo_db;
        }
        if let Some(workers) = self.workers {
            config.worker_count = workers;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.probe_timeout_ms = timeout_ms;
        }
        if self.precision.is_some() {
            config.coordinate_precision = self.precision;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("OpenSASE Scanner v{}", env!("CARGO_PKG_VERSION"));

    let config = Cli::parse().into_config()?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing in-flight probes");
                cancel.cancel();
            }
        }
    });

    let report = opensase_scanner::scan(config, cancel)
        .await
        .context("scan failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
