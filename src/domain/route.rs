// Route and distance estimate domain models
use super::coordinate::Coordinate;
use serde::{Deserialize, Serialize};

/// Which routing provider produced a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteSource {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStep {
    pub instruction: String,
    pub distance_m: f64,
    pub duration_s: f64,
}

/// A driving route between two coordinates, replaced wholesale on recompute.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResult {
    pub path: Vec<Coordinate>,
    pub distance_m: f64,
    pub duration_s: f64,
    pub steps: Vec<RouteStep>,
    pub provider: RouteSource,
}

/// Which destination an estimate was measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationSource {
    Peer,
    Meeting,
}

/// Which tier of the fallback chain produced the numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "provider")]
pub enum EstimateBasis {
    Route(RouteSource),
    Backend,
    StraightLine,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistanceEstimate {
    pub distance_m: f64,
    pub eta_s: f64,
    pub source: DestinationSource,
    pub basis: EstimateBasis,
}

impl DistanceEstimate {
    pub fn from_route(route: &RouteResult, source: DestinationSource) -> Self {
        Self {
            distance_m: route.distance_m,
            eta_s: route.duration_s,
            source,
            basis: EstimateBasis::Route(route.provider),
        }
    }

    /// Straight-line estimate at a constant assumed speed.
    pub fn straight_line(
        origin: &Coordinate,
        destination: &Coordinate,
        speed_mps: f64,
        source: DestinationSource,
    ) -> Self {
        let distance_m = origin.distance_to(destination);
        let eta_s = if speed_mps > 0.0 {
            distance_m / speed_mps
        } else {
            0.0
        };
        Self {
            distance_m,
            eta_s,
            source,
            basis: EstimateBasis::StraightLine,
        }
    }
}

/// What the route indicator should say.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "provider")]
pub enum RouteStatus {
    /// No origin/destination pair yet
    Idle,
    Computing,
    /// Latest estimate came from a routing provider
    Routed(RouteSource),
    /// Distance/ETA present but no provider succeeded
    EstimateOnly,
}

/// Total distance/duration for a route: top-level fields when present,
/// otherwise the sum over legs.
pub fn route_totals(
    top_distance: Option<f64>,
    top_duration: Option<f64>,
    legs: &[(Option<f64>, Option<f64>)],
) -> (f64, f64) {
    let distance = top_distance.unwrap_or_else(|| legs.iter().filter_map(|l| l.0).sum());
    let duration = top_duration.unwrap_or_else(|| legs.iter().filter_map(|l| l.1).sum());
    (distance, duration)
}
