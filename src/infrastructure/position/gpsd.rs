// gpsd client over its JSON socket protocol
use crate::application::errors::PositionError;
use crate::application::position_source::PositionSource;
use crate::domain::coordinate::Coordinate;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio_stream::wrappers::LinesStream;

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

/// Minimal view of a gpsd report; only TPV reports carry a position.
#[derive(Debug, Deserialize)]
struct Report {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Extract a coordinate from one line of gpsd output. Returns `None` for
/// non-TPV reports and for TPV reports without a 2D/3D fix.
fn parse_report(line: &str) -> Option<Coordinate> {
    let report: Report = serde_json::from_str(line).ok()?;
    if report.class != "TPV" || report.mode < 2 {
        return None;
    }
    let coordinate = Coordinate::new(report.lat?, report.lon?);
    coordinate.is_valid().then_some(coordinate)
}

#[derive(Debug, Clone)]
pub struct GpsdPosition {
    addr: String,
}

impl GpsdPosition {
    pub fn new(addr: String) -> Self {
        Self { addr }
    }

    /// Whether the daemon accepts connections
    pub async fn is_reachable(&self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect(&self.addr)).await,
            Ok(Ok(_))
        )
    }

    async fn open(addr: &str) -> Result<Lines<BufReader<TcpStream>>, PositionError> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| PositionError::Unavailable(format!("gpsd connect {}: {}", addr, e)))?;
        stream
            .write_all(WATCH_COMMAND)
            .await
            .map_err(|e| PositionError::Unavailable(format!("gpsd watch: {}", e)))?;
        Ok(BufReader::new(stream).lines())
    }
}

#[async_trait]
impl PositionSource for GpsdPosition {
    fn name(&self) -> &'static str {
        "gpsd"
    }

    async fn request_permission(&self) -> Result<(), PositionError> {
        Ok(())
    }

    async fn current_fix(&self) -> Result<Coordinate, PositionError> {
        let mut lines = Self::open(&self.addr).await?;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(coordinate) = parse_report(&line) {
                        return Ok(coordinate);
                    }
                }
                Ok(None) => {
                    return Err(PositionError::Unavailable("gpsd closed the connection".to_string()));
                }
                Err(e) => return Err(PositionError::Unavailable(format!("gpsd read: {}", e))),
            }
        }
    }

    fn watch(&self) -> BoxStream<'static, Result<Coordinate, PositionError>> {
        let addr = self.addr.clone();
        async_stream::stream! {
            let mut lines = match Self::open(&addr).await {
                Ok(lines) => LinesStream::new(lines),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => {
                        if let Some(coordinate) = parse_report(&line) {
                            yield Ok(coordinate);
                        }
                    }
                    Err(e) => {
                        yield Err(PositionError::Unavailable(format!("gpsd read: {}", e)));
                        return;
                    }
                }
            }
            tracing::warn!("gpsd closed the watch connection");
        }
        .boxed()
    }
}
