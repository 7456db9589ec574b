// Device position sources
mod fixed;
mod gpsd;

pub use fixed::{DeniedPosition, FixedPosition, UnavailablePosition};
pub use gpsd::GpsdPosition;

use crate::application::position_source::PositionSource;
use crate::infrastructure::config::PositionConfig;
use std::sync::Arc;
use std::time::Duration;

const GPSD_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Pick the position source once at startup, in order of preference:
/// no consent, a reachable gpsd daemon, a configured manual coordinate.
pub async fn select_position_source(config: &PositionConfig) -> Arc<dyn PositionSource> {
    if !config.consent {
        tracing::info!("Position consent withheld");
        return Arc::new(DeniedPosition);
    }

    let gpsd = GpsdPosition::new(config.gpsd_addr.clone());
    if gpsd.is_reachable(GPSD_CONNECT_TIMEOUT).await {
        tracing::info!("Using gpsd at {}", config.gpsd_addr);
        return Arc::new(gpsd);
    }

    match config.manual {
        Some(coordinate) if coordinate.is_valid() => {
            tracing::info!(
                "gpsd not reachable at {}; using manual position {}",
                config.gpsd_addr,
                coordinate.to_lat_lng()
            );
            Arc::new(FixedPosition::new(coordinate))
        }
        Some(coordinate) => {
            tracing::warn!("Ignoring invalid manual position {}", coordinate.to_lat_lng());
            Arc::new(UnavailablePosition)
        }
        None => {
            tracing::warn!("No position provider available");
            Arc::new(UnavailablePosition)
        }
    }
}
