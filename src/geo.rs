//! GeoIP Resolution
//!
//! Maps a reachable endpoint's IP address to a coordinate. The MaxMind
//! reader is opened once at startup and shared read-only by every worker.

use crate::{ScanError, ScanResult};
use maxminddb::{geoip2, MaxMindDBError, Reader};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// Geographic coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Degrees north
    pub latitude: f64,
    /// Degrees east
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Render as `(lat, lon)`. With `precision` set every value carries that
    /// many decimals, otherwise the shortest exact representation is used.
    pub fn format(&self, precision: Option<usize>) -> String {
        match precision {
            Some(p) => format!("({:.p$}, {:.p$})", self.latitude, self.longitude, p = p),
            None => format!("({}, {})", self.latitude, self.longitude),
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(None))
    }
}

/// Malformed `(lat, lon)` line
#[derive(Debug, Error)]
#[error("invalid coordinate line: {0:?}")]
pub struct ParseCoordinateError(String);

impl FromStr for Coordinate {
    type Err = ParseCoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseCoordinateError(s.to_string());
        let inner = s
            .trim()
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(err)?;
        let (lat, lon) = inner.split_once(',').ok_or_else(err)?;
        Ok(Self {
            latitude: lat.trim().parse().map_err(|_| err())?,
            longitude: lon.trim().parse().map_err(|_| err())?,
        })
    }
}

/// Outcome of resolving one address
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Coordinate found
    Located(Coordinate),
    /// No usable coordinate; the endpoint is left out of the output
    Skipped(String),
}

/// IP to coordinate lookup.
///
/// Implementations are shared by every worker and must be safe for
/// concurrent use.
pub trait GeoResolver: Send + Sync {
    /// Resolve a single address
    fn resolve(&self, ip: IpAddr) -> Resolution;
}

/// MaxMind GeoLite2/GeoIP2 City database
pub struct MaxMindResolver {
    reader: Reader<Vec<u8>>,
}

impl MaxMindResolver {
    /// Open the database file. Failure here aborts the scan.
    pub fn open(path: &str) -> ScanResult<Self> {
        let reader = Reader::open_readfile(path).map_err(|e| ScanError::GeoDatabase {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!(
            path,
            database_type = %reader.metadata.database_type,
            build_epoch = reader.metadata.build_epoch,
            "GeoIP database opened"
        );

        Ok(Self { reader })
    }
}

impl GeoResolver for MaxMindResolver {
    fn resolve(&self, ip: IpAddr) -> Resolution {
        let city: geoip2::City = match self.reader.lookup(ip) {
            Ok(city) => city,
            Err(MaxMindDBError::AddressNotFoundError(_)) => {
                return Resolution::Skipped(format!("{} not in database", ip));
            }
            Err(e) => return Resolution::Skipped(format!("lookup failed: {}", e)),
        };

        match city.location.and_then(|loc| loc.latitude.zip(loc.longitude)) {
            Some((latitude, longitude)) => Resolution::Located(Coordinate::new(latitude, longitude)),
            None => Resolution::Skipped(format!("{} has no location", ip)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_format_shortest() {
        let c = Coordinate::new(37.4, -122.1);
        assert_eq!(c.to_string(), "(37.4, -122.1)");
        assert_eq!(Coordinate::new(0.0, 10.0).to_string(), "(0, 10)");
    }

    #[test]
    fn test_format_fixed_precision() {
        let c = Coordinate::new(37.4, -122.1);
        assert_eq!(c.format(Some(3)), "(37.400, -122.100)");
        assert_eq!(c.format(Some(0)), "(37, -122)");
    }

    #[test]
    fn test_parse_written_line() {
        let c: Coordinate = "(51.5074, -0.1278)".parse().unwrap();
        assert_eq!(c, Coordinate::new(51.5074, -0.1278));

        let original = Coordinate::new(-33.868820, 151.209290);
        let back: Coordinate = original.to_string().parse().unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("37.4, -122.1".parse::<Coordinate>().is_err());
        assert!("(37.4)".parse::<Coordinate>().is_err());
        assert!("(north, west)".parse::<Coordinate>().is_err());
    }

    fn fixture() -> MaxMindResolver {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/city-fixture.mmdb");
        MaxMindResolver::open(path).unwrap()
    }

    #[test]
    fn test_resolve_located() {
        let resolver = fixture();
        assert_eq!(
            resolver.resolve("8.8.8.8".parse().unwrap()),
            Resolution::Located(Coordinate::new(37.4, -122.1))
        );
        assert_eq!(
            resolver.resolve("81.2.69.160".parse().unwrap()),
            Resolution::Located(Coordinate::new(51.5142, -0.0931))
        );
    }

    #[test]
    fn test_resolve_unknown_address_is_skipped() {
        let resolver = fixture();
        match resolver.resolve("10.0.0.1".parse().unwrap()) {
            Resolution::Skipped(reason) => assert!(reason.contains("not in database")),
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_record_without_location_is_skipped() {
        let resolver = fixture();
        match resolver.resolve("192.0.2.1".parse().unwrap()) {
            Resolution::Skipped(reason) => assert!(reason.contains("no location")),
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_handle_concurrent_lookups() {
        let resolver: Arc<dyn GeoResolver> = Arc::new(fixture());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let resolver = resolver.clone();
                tokio::spawn(async move {
                    let (ip, expected) = if i % 2 == 0 {
                        ("8.8.8.8", Some(Coordinate::new(37.4, -122.1)))
                    } else {
                        ("10.0.0.1", None)
                    };
                    for _ in 0..100 {
                        let located = match resolver.resolve(ip.parse().unwrap()) {
                            Resolution::Located(c) => Some(c),
                            Resolution::Skipped(_) => None,
                        };
                        assert_eq!(located, expected);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[test]
    fn test_open_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GeoLite2-City.mmdb");
        let result = MaxMindResolver::open(path.to_str().unwrap());
        assert!(matches!(result, Err(ScanError::GeoDatabase { .. })));
    }

    #[test]
    fn test_open_corrupt_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GeoLite2-City.mmdb");
        std::fs::write(&path, b"not a maxmind database").unwrap();
        let result = MaxMindResolver::open(path.to_str().unwrap());
        assert!(matches!(result, Err(ScanError::GeoDatabase { .. })));
    }
}
