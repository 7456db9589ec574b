// Tracking REST API trait
use crate::application::errors::RestCallError;
use crate::domain::coordinate::Coordinate;
use crate::domain::tracking::{BookingId, TrackingSample};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Server-side distance calculation result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDistance {
    pub distance_km: f64,
    pub duration_minutes: f64,
}

#[async_trait]
pub trait TrackingApi: Send + Sync {
    /// Update the signed-in user's current location
    async fn update_current_location(&self, coordinate: Coordinate) -> Result<(), RestCallError>;

    /// Record a location sample against a booking
    async fn record_location(
        &self,
        booking_id: &BookingId,
        coordinate: Coordinate,
    ) -> Result<(), RestCallError>;

    /// Fetch every recorded sample for a booking
    async fn tracking_history(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<TrackingSample>, RestCallError>;

    /// Ask the backend for the distance between two coordinates
    async fn calculate_distance(
        &self,
        from: Coordinate,
        to: Coordinate,
    ) -> Result<BackendDistance, RestCallError>;
}
