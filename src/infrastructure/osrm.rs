// Secondary routing provider: OSRM route service
use crate::application::errors::ProviderRouteError;
use crate::application::route_provider::RouteProvider;
use crate::domain::coordinate::Coordinate;
use crate::domain::polyline::{self, Precision};
use crate::domain::route::{route_totals, RouteResult, RouteSource, RouteStep};
use crate::infrastructure::config::join_url;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Once;

/// Host of the public OSRM demo server.
const DEMO_HOST: &str = "router.project-osrm.org";

static DEMO_WARNING: Once = Once::new();

pub struct OsrmProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: String,
    #[serde(default)]
    distance: Option<f64>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    legs: Vec<OsrmLeg>,
}

#[derive(Debug, Deserialize)]
struct OsrmLeg {
    #[serde(default)]
    distance: Option<f64>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    steps: Vec<OsrmStep>,
}

#[derive(Debug, Deserialize)]
struct OsrmStep {
    #[serde(default)]
    name: String,
    #[serde(default)]
    distance: f64,
    #[serde(default)]
    duration: f64,
    maneuver: OsrmManeuver,
}

#[derive(Debug, Deserialize)]
struct OsrmManeuver {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    modifier: Option<String>,
}

impl OsrmProvider {
    pub fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    fn route_url(&self, origin: &Coordinate, destination: &Coordinate) -> String {
        // OSRM wants lon,lat pairs.
        join_url(
            &self.base_url,
            &format!(
                "/route/v1/driving/{},{};{},{}?overview=full&geometries=polyline6&steps=true",
                origin.longitude, origin.latitude, destination.longitude, destination.latitude
            ),
        )
    }

    fn into_route(response: OsrmResponse) -> Result<RouteResult, ProviderRouteError> {
        if response.code != "Ok" {
            let status = match response.message {
                Some(message) => format!("{}: {}", response.code, message),
                None => response.code,
            };
            return Err(ProviderRouteError::Status(status));
        }

        let route = response
            .routes
            .into_iter()
            .next()
            .ok_or(ProviderRouteError::NoRoutes)?;

        let path = polyline::decode(&route.geometry, Precision::Six)
            .map_err(|e| ProviderRouteError::Geometry(e.to_string()))?;

        let legs: Vec<(Option<f64>, Option<f64>)> =
            route.legs.iter().map(|l| (l.distance, l.duration)).collect();
        let (distance_m, duration_s) = route_totals(route.distance, route.duration, &legs);

        let steps = route
            .legs
            .into_iter()
            .flat_map(|l| l.steps)
            .map(|s| RouteStep {
                instruction: describe_step(&s),
                distance_m: s.distance,
                duration_s: s.duration,
            })
            .collect();

        Ok(RouteResult {
            path,
            distance_m,
            duration_s,
            steps,
            provider: RouteSource::Secondary,
        })
    }
}

fn describe_step(step: &OsrmStep) -> String {
    let mut text = step.maneuver.kind.clone();
    if let Some(modifier) = &step.maneuver.modifier {
        text.push(' ');
        text.push_str(modifier);
    }
    if !step.name.is_empty() {
        text.push_str(" onto ");
        text.push_str(&step.name);
    }
    text
}

#[async_trait]
impl RouteProvider for OsrmProvider {
    fn name(&self) -> &'static str {
        "OSRM"
    }

    async fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<RouteResult, ProviderRouteError> {
        if self.base_url.contains(DEMO_HOST) {
            DEMO_WARNING.call_once(|| {
                tracing::warn!(
                    "Using the public OSRM demo server for routing; it is not meant for production traffic"
                );
            });
        }

        let response = self
            .client
            .get(self.route_url(&origin, &destination))
            .send()
            .await
            .map_err(|e| ProviderRouteError::Transport(e.to_string()))?;

        // OSRM reports NoRoute and friends with 400 and a JSON body.
        let status = response.status();
        let body = response.json::<OsrmResponse>().await.map_err(|e| {
            ProviderRouteError::Transport(format!("{status}: {e}"))
        })?;

        Self::into_route(body)
    }
}
