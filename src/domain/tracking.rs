// Tracking session domain models
use super::coordinate::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Opaque booking identifier. Backends hand these out as strings or integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BookingId(String);

impl BookingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for BookingId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(string_or_int(deserializer)?))
    }
}

/// User identifier as stored in the credential store and tracking history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(string_or_int(deserializer)?))
    }
}

fn string_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(i) => i.to_string(),
    })
}

/// One active tracking engagement for a booking.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrackingSession {
    pub booking_id: BookingId,
    #[serde(default)]
    pub self_user_id: Option<UserId>,
    #[serde(default)]
    pub other_user_label: String,
    #[serde(default)]
    pub meeting_coordinate: Option<Coordinate>,
    #[serde(default = "default_true")]
    pub enable_realtime_channel: bool,
}

fn default_true() -> bool {
    true
}

impl TrackingSession {
    pub fn new(booking_id: BookingId) -> Self {
        Self {
            booking_id,
            self_user_id: None,
            other_user_label: String::new(),
            meeting_coordinate: None,
            enable_realtime_channel: true,
        }
    }

    /// True when `user` is known and is not the local user.
    pub fn is_peer(&self, user: Option<&UserId>) -> bool {
        match (user, &self.self_user_id) {
            (None, _) => false,
            (Some(user), Some(me)) => user != me,
            (Some(_), None) => true,
        }
    }
}

/// A timestamped, user-attributed location sample from tracking history.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSample {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(flatten)]
    pub coordinate: Coordinate,
    #[serde(alias = "timestamp")]
    pub recorded_at: DateTime<Utc>,
}

/// Most recent sample attributed to someone other than the local user.
///
/// Samples without a user id, from the local user, or with an invalid
/// coordinate are ignored.
pub fn select_peer_sample<'a>(
    samples: &'a [TrackingSample],
    session: &TrackingSession,
) -> Option<&'a TrackingSample> {
    samples
        .iter()
        .filter(|s| session.is_peer(s.user_id.as_ref()))
        .filter(|s| s.coordinate.is_valid())
        .max_by_key(|s| s.recorded_at)
}

/// Transport state machine for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Idle,
    Connecting,
    Connected,
    FailedPrimary,
    ConnectingSecondary,
    FailedSecondary,
    Reconnecting,
    Disconnected,
    RestPollingOnly,
    Closed,
}

impl TransportState {
    /// Status line shown next to the map.
    pub fn status_label(self) -> &'static str {
        match self {
            TransportState::Idle => "idle",
            TransportState::Connecting
            | TransportState::FailedPrimary
            | TransportState::ConnectingSecondary => "connecting",
            TransportState::Reconnecting => "reconnecting",
            TransportState::Connected => "connected (real-time)",
            TransportState::FailedSecondary
            | TransportState::Disconnected
            | TransportState::RestPollingOnly => "REST mode",
            TransportState::Closed => "stopped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(user: Option<&str>, lat: f64, secs: i64) -> TrackingSample {
        TrackingSample {
            user_id: user.map(UserId::new),
            coordinate: Coordinate::new(lat, 3.0),
            recorded_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    fn session_for(me: &str) -> TrackingSession {
        let mut session = TrackingSession::new(BookingId::new("b-1"));
        session.self_user_id = Some(UserId::new(me));
        session
    }

    #[test]
    fn test_select_peer_sample_takes_latest_non_self() {
        let samples = vec![
            sample(Some("me"), 1.0, 500),
            sample(Some("other"), 2.0, 100),
            sample(None, 3.0, 900),
            sample(Some("other"), 4.0, 300),
            sample(Some("me"), 5.0, 600),
            sample(Some("third"), 6.0, 200),
        ];

        let picked = select_peer_sample(&samples, &session_for("me")).unwrap();
        assert_eq!(picked.coordinate.latitude, 4.0);
        assert_eq!(picked.user_id, Some(UserId::new("other")));
    }

    #[test]
    fn test_select_peer_sample_prefers_newest_identifier() {
        let samples = vec![
            sample(Some("other"), 2.0, 100),
            sample(Some("third"), 6.0, 200),
        ];
        let picked = select_peer_sample(&samples, &session_for("me")).unwrap();
        assert_eq!(picked.coordinate.latitude, 6.0);
    }

    #[test]
    fn test_select_peer_sample_none_when_only_self() {
        let samples = vec![sample(Some("me"), 1.0, 1), sample(None, 2.0, 2)];
        assert!(select_peer_sample(&samples, &session_for("me")).is_none());
    }

    #[test]
    fn test_sample_deserializes_integer_user_id() {
        let raw = r#"{"userId": 42, "latitude": 6.45, "longitude": 3.39, "timestamp": "2024-05-01T10:00:00Z"}"#;
        let sample: TrackingSample = serde_json::from_str(raw).unwrap();
        assert_eq!(sample.user_id, Some(UserId::new("42")));
        assert_eq!(sample.coordinate, Coordinate::new(6.45, 3.39));
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(TransportState::Connecting.status_label(), "connecting");
        assert_eq!(TransportState::Connected.status_label(), "connected (real-time)");
        assert_eq!(TransportState::RestPollingOnly.status_label(), "REST mode");
    }
}
