//! Scanner Configuration

use crate::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of concurrent probe workers
    pub worker_count: usize,
    /// TCP connect timeout per endpoint (milliseconds)
    pub probe_timeout_ms: u64,
    /// Endpoint list, one `address[:port]` per line
    pub input_path: String,
    /// Coordinates output file, truncated on every run
    pub output_path: String,
    /// MaxMind City database
    pub geo_db_path: String,
    /// Job queue capacity
    pub job_queue_capacity: usize,
    /// Result queue capacity
    pub result_queue_capacity: usize,
    /// Fixed number of decimals in the output. `None` writes the shortest
    /// representation that parses back to the same `f64`.
    pub coordinate_precision: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            worker_count: 100,
            probe_timeout_ms: 3000,
            input_path: "ips".into(),
            output_path: "coordinates".into(),
            geo_db_path: "GeoLite2-City.mmdb".into(),
            job_queue_capacity: 10,
            result_queue_capacity: 100,
            coordinate_precision: None,
        }
    }
}

impl ScanConfig {
    /// Load from a JSON file. Missing keys fall back to defaults.
    pub fn load(path: &str) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save to file
    pub fn save(&self, path: &str) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Reject sizes that would stall the pipeline
    pub fn validate(&self) -> ScanResult<()> {
        if self.worker_count == 0 {
            return Err(ScanError::Config("worker_count must be at least 1".into()));
        }
        if self.job_queue_capacity == 0 || self.result_queue_capacity == 0 {
            return Err(ScanError::Config("queue capacities must be at least 1".into()));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ScanError::Config("probe_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Probe timeout as a `Duration`
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
