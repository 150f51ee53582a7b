//! TCP Liveness Probing

use crate::endpoint::Endpoint;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

/// Default connect timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Decides whether an endpoint is reachable
#[async_trait]
pub trait LivenessProber: Send + Sync {
    /// `true` iff the endpoint answered within the probe's deadline.
    /// A single attempt is authoritative; there are no retries.
    async fn probe(&self, endpoint: &Endpoint) -> bool;
}

/// Single TCP handshake with a deadline
#[derive(Debug, Clone)]
pub struct TcpProber {
    timeout: Duration,
}

impl TcpProber {
    /// Prober giving up on each handshake after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Handshake timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for TcpProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl LivenessProber for TcpProber {
    async fn probe(&self, endpoint: &Endpoint) -> bool {
        // Connection is dropped before returning on every path
        match tokio::time::timeout(self.timeout, TcpStream::connect(endpoint.socket_target())).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                tracing::debug!(%endpoint, error = %e, "TCP connect failed");
                false
            }
            Err(_) => {
                tracing::debug!(%endpoint, timeout_ms = self.timeout.as_millis() as u64, "TCP connect timeout");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let prober = TcpProber::new(Duration::from_secs(1));
        let endpoint = Endpoint::parse(&format!("127.0.0.1:{}", port));
        assert!(prober.probe(&endpoint).await);
    }

    #[tokio::test]
    async fn test_probe_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = TcpProber::new(Duration::from_secs(1));
        let endpoint = Endpoint::parse(&format!("127.0.0.1:{}", port));
        assert!(!prober.probe(&endpoint).await);
    }

    #[tokio::test]
    async fn test_probe_invalid_port() {
        let prober = TcpProber::new(Duration::from_millis(200));
        assert!(!prober.probe(&Endpoint::parse("127.0.0.1:notaport")).await);
        assert!(!prober.probe(&Endpoint::parse("127.0.0.1:")).await);
    }

    #[tokio::test]
    async fn test_probe_respects_timeout() {
        // TEST-NET-1 is never routed; either times out or fails fast
        let prober = TcpProber::new(Duration::from_millis(100));
        let start = std::time::Instant::now();
        assert!(!prober.probe(&Endpoint::parse("192.0.2.1:9")).await);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_default_timeout() {
        assert_eq!(TcpProber::default().timeout(), Duration::from_secs(3));
    }
}
