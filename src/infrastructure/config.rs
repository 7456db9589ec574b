use crate::application::estimator_service::EstimatorSettings;
use crate::application::live_tracker::TrackerSettings;
use crate::application::position_service::PositionSettings;
use crate::application::transport_service::TransportSettings;
use crate::domain::coordinate::Coordinate;
use crate::domain::tracking::TrackingSession;
use config::{Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

/// Environment variable that overrides `api.base_url` directly.
pub const BASE_URL_ENV: &str = "API_BASE_URL";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TrackerConfig {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub realtime: RealtimeSettings,
    #[serde(default)]
    pub routing: RoutingSettings,
    #[serde(default)]
    pub tracking: TrackingTimings,
    #[serde(default)]
    pub position: PositionConfig,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub session: Option<TrackingSession>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RealtimeSettings {
    pub hub_path: String,
    pub connect_timeout_secs: u64,
    pub invoke_timeout_secs: u64,
    pub reconnect_delays_secs: Vec<u64>,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            hub_path: "/hubs/tracking".to_string(),
            connect_timeout_secs: 15,
            invoke_timeout_secs: 30,
            reconnect_delays_secs: vec![0, 2, 10, 30],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RoutingSettings {
    pub google_api_key: Option<String>,
    pub google_base_url: String,
    pub osrm_base_url: String,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            google_api_key: None,
            google_base_url: "https://maps.googleapis.com/maps/api/directions/json".to_string(),
            osrm_base_url: "https://router.project-osrm.org".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrackingTimings {
    pub poll_interval_secs: u64,
    pub fix_timeout_secs: u64,
    pub max_fix_age_secs: u64,
    pub movement_threshold_m: f64,
    pub liveness_interval_secs: u64,
    pub recompute_min_move_m: f64,
    pub recompute_min_interval_secs: u64,
    pub fallback_speed_mps: f64,
}

impl Default for TrackingTimings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            fix_timeout_secs: 15,
            max_fix_age_secs: 5,
            movement_threshold_m: 10.0,
            liveness_interval_secs: 30,
            recompute_min_move_m: 30.0,
            recompute_min_interval_secs: 20,
            fallback_speed_mps: 1.4,
        }
    }
}

impl TrackingTimings {
    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            position: PositionSettings {
                fix_timeout: Duration::from_secs(self.fix_timeout_secs),
                max_cached_age: Duration::from_secs(self.max_fix_age_secs),
                movement_threshold_m: self.movement_threshold_m,
                liveness_interval: Duration::from_secs(self.liveness_interval_secs),
            },
            estimator: EstimatorSettings {
                min_move_m: self.recompute_min_move_m,
                min_interval: Duration::from_secs(self.recompute_min_interval_secs),
                fallback_speed_mps: self.fallback_speed_mps,
            },
            transport: TransportSettings {
                poll_interval: Duration::from_secs(self.poll_interval_secs),
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PositionConfig {
    /// User consent to read the device position
    pub consent: bool,
    pub gpsd_addr: String,
    /// Used when no GPS daemon is reachable
    pub manual: Option<Coordinate>,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            consent: true,
            gpsd_addr: "127.0.0.1:2947".to_string(),
            manual: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthSettings {
    pub store_path: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            store_path: "data/auth.json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Defaults, then `config/tracker.*`, then `TRACKER__SECTION__KEY`
/// variables, then `API_BASE_URL`.
pub fn load_tracker_config() -> anyhow::Result<TrackerConfig> {
    let settings = config::Config::builder()
        .add_source(File::with_name("config/tracker").required(false))
        .add_source(
            Environment::with_prefix("TRACKER")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("api.base_url", std::env::var(BASE_URL_ENV).ok())?
        .build()?;

    let config: TrackerConfig = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

/// Parse a TOML document on top of the defaults.
pub fn parse_tracker_config(toml: &str) -> anyhow::Result<TrackerConfig> {
    let settings = config::Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()?;

    let config: TrackerConfig = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

impl TrackerConfig {
    /// Reject timings that would spin a timer or time out immediately.
    fn validate(&self) -> anyhow::Result<()> {
        let nonzero = [
            ("tracking.poll_interval_secs", self.tracking.poll_interval_secs),
            ("tracking.liveness_interval_secs", self.tracking.liveness_interval_secs),
            ("tracking.fix_timeout_secs", self.tracking.fix_timeout_secs),
            ("realtime.connect_timeout_secs", self.realtime.connect_timeout_secs),
            ("realtime.invoke_timeout_secs", self.realtime.invoke_timeout_secs),
            ("api.timeout_secs", self.api.timeout_secs),
        ];
        for (key, value) in nonzero {
            anyhow::ensure!(value > 0, "{key} must be greater than zero");
        }
        Ok(())
    }
}

/// Join a base URL and a path with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
