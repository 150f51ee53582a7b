//! Endpoint parsing and streaming input

use crate::{ScanError, ScanResult};
use std::fmt;
use std::net::IpAddr;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Split};

/// Port used when a line carries none
pub const DEFAULT_PORT: &str = "80";

/// Network endpoint to probe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host address as written in the input
    pub address: String,
    /// Port as written in the input
    pub port: String,
}

impl Endpoint {
    /// Parse one `address[:port]` line.
    ///
    /// Splits on `:`; the first segment is the address and the second, if
    /// present, the port. Anything after a second `:` is ignored. No
    /// validation is done here: a bad address simply fails to connect.
    pub fn parse(line: &str) -> Self {
        let mut parts = line.trim().split(':');
        let address = parts.next().unwrap_or_default();
        let port = parts.next().unwrap_or(DEFAULT_PORT);

        Self {
            address: address.to_string(),
            port: port.to_string(),
        }
    }

    /// `host:port` target handed to the connector
    pub fn socket_target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Address as an IP, `None` for hostnames
    pub fn ip(&self) -> Option<IpAddr> {
        self.address.parse().ok()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Streams endpoints from a line-oriented reader, skipping blank lines
/// and lines that are not valid UTF-8.
pub struct EndpointSource<R> {
    lines: Split<R>,
    line_no: u64,
}

impl EndpointSource<BufReader<File>> {
    /// Open an endpoint list on disk
    pub async fn open(path: &str) -> ScanResult<Self> {
        let file = File::open(path)
            .await
            .map_err(|source| ScanError::InputUnavailable {
                path: path.to_string(),
                source,
            })?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: AsyncBufRead + Unpin> EndpointSource<R> {
    /// Wrap any buffered reader
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.split(b'\n'),
            line_no: 0,
        }
    }

    /// Next endpoint, or `None` once the input is exhausted.
    ///
    /// Cancel safe: dropping the future loses no line.
    pub async fn next_endpoint(&mut self) -> ScanResult<Option<Endpoint>> {
        while let Some(raw) = self.lines.next_segment().await? {
            self.line_no += 1;
            let line = match String::from_utf8(raw) {
                Ok(line) => line,
                Err(_) => {
                    tracing::warn!(line = self.line_no, "Skipping line that is not valid UTF-8");
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(Endpoint::parse(&line)));
        }
        Ok(None)
    }
}

impl<R> EndpointSource<R> {
    /// Number of lines consumed so far, blank ones included
    pub fn lines_read(&self) -> u64 {
        self.line_no
    }
}
