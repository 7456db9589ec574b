// Render-ready tracking view
use crate::application::live_tracker::{PositionStatus, TrackerSnapshot};
use crate::domain::coordinate::Coordinate;
use crate::domain::polyline::{encode, Precision};
use crate::domain::route::{DestinationSource, EstimateBasis, RouteSource, RouteStatus};
use serde::Serialize;

/// Display names of the configured routing providers
#[derive(Debug, Clone, Copy)]
pub struct ProviderNames {
    pub primary: &'static str,
    pub secondary: &'static str,
}

impl ProviderNames {
    fn name(&self, source: RouteSource) -> &'static str {
        match source {
            RouteSource::Primary => self.primary,
            RouteSource::Secondary => self.secondary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingView {
    pub booking_id: String,
    pub other_user_label: String,
    pub self_coordinate: Option<Coordinate>,
    pub peer_coordinate: Option<Coordinate>,
    pub meeting_coordinate: Option<Coordinate>,
    /// Route path encoded at precision 5
    pub route_polyline: Option<String>,
    pub distance_text: Option<String>,
    pub eta_text: Option<String>,
    pub destination_text: Option<String>,
    pub connection_status: &'static str,
    pub route_status: Option<String>,
    pub position_notice: Option<&'static str>,
}

pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{} m", meters.round() as i64)
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

pub fn format_eta(seconds: f64) -> String {
    let minutes = (seconds / 60.0).round() as i64;
    if minutes < 1 {
        "< 1 min".to_string()
    } else if minutes < 60 {
        format!("{} min", minutes)
    } else {
        format!("{} h {} min", minutes / 60, minutes % 60)
    }
}

impl TrackingView {
    pub fn render(snapshot: &TrackerSnapshot, providers: ProviderNames) -> Self {
        let estimate = snapshot.estimate.as_ref();
        // Server-pushed distance stands in until a local estimate exists
        let server_distance = snapshot.server_distance.filter(|_| estimate.is_none());
        let route_status = match snapshot.route_status {
            RouteStatus::Idle => server_distance.map(|_| "estimate only (server)".to_string()),
            RouteStatus::Computing => Some("computing".to_string()),
            RouteStatus::Routed(source) => Some(providers.name(source).to_string()),
            RouteStatus::EstimateOnly => Some(match estimate.map(|e| e.basis) {
                Some(EstimateBasis::Backend) => "estimate only (server)".to_string(),
                _ => "estimate only".to_string(),
            }),
        };
        let position_notice = match snapshot.position {
            PositionStatus::PermissionDenied => Some("location permission denied"),
            PositionStatus::Unavailable => Some("location unavailable"),
            PositionStatus::Starting | PositionStatus::Active => None,
        };

        Self {
            booking_id: snapshot.booking_id.to_string(),
            other_user_label: snapshot.other_user_label.clone(),
            self_coordinate: snapshot.self_coordinate,
            peer_coordinate: snapshot.peer_coordinate,
            meeting_coordinate: snapshot.meeting_coordinate,
            route_polyline: snapshot
                .route
                .as_ref()
                .filter(|route| !route.path.is_empty())
                .map(|route| encode(&route.path, Precision::Five)),
            distance_text: estimate
                .map(|e| e.distance_m)
                .or(server_distance.map(|d| d.distance_km * 1000.0))
                .map(format_distance),
            eta_text: estimate
                .map(|e| e.eta_s)
                .or(server_distance.map(|d| d.duration_minutes * 60.0))
                .map(format_eta),
            destination_text: estimate.map(|e| match e.source {
                DestinationSource::Meeting => "meeting point".to_string(),
                DestinationSource::Peer => snapshot.other_user_label.clone(),
            }),
            connection_status: snapshot.transport.status_label(),
            route_status,
            position_notice,
        }
    }
}
