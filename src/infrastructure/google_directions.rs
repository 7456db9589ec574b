// Primary routing provider: Google Directions API
use crate::application::errors::ProviderRouteError;
use crate::application::route_provider::RouteProvider;
use crate::domain::coordinate::Coordinate;
use crate::domain::polyline::{self, Precision};
use crate::domain::route::{route_totals, RouteResult, RouteSource, RouteStep};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

pub struct GoogleDirectionsProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRoute {
    overview_polyline: EncodedPolyline,
    #[serde(default)]
    legs: Vec<DirectionsLeg>,
}

#[derive(Debug, Deserialize)]
struct EncodedPolyline {
    points: String,
}

#[derive(Debug, Deserialize)]
struct DirectionsLeg {
    #[serde(default)]
    distance: Option<TextValue>,
    #[serde(default)]
    duration: Option<TextValue>,
    #[serde(default)]
    steps: Vec<DirectionsStep>,
}

#[derive(Debug, Deserialize)]
struct DirectionsStep {
    #[serde(default)]
    html_instructions: String,
    #[serde(default)]
    distance: Option<TextValue>,
    #[serde(default)]
    duration: Option<TextValue>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: f64,
}

impl GoogleDirectionsProvider {
    pub fn new(client: Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url,
            // Blank keys in config files count as absent.
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    fn into_route(response: DirectionsResponse) -> Result<RouteResult, ProviderRouteError> {
        if response.status != "OK" {
            let status = match response.error_message {
                Some(message) => format!("{}: {}", response.status, message),
                None => response.status,
            };
            return Err(ProviderRouteError::Status(status));
        }

        let route = response
            .routes
            .into_iter()
            .next()
            .ok_or(ProviderRouteError::NoRoutes)?;

        let path = polyline::decode(&route.overview_polyline.points, Precision::Five)
            .map_err(|e| ProviderRouteError::Geometry(e.to_string()))?;

        let legs: Vec<(Option<f64>, Option<f64>)> = route
            .legs
            .iter()
            .map(|l| {
                (
                    l.distance.as_ref().map(|d| d.value),
                    l.duration.as_ref().map(|d| d.value),
                )
            })
            .collect();
        // Directions responses carry no route-level totals.
        let (distance_m, duration_s) = route_totals(None, None, &legs);

        let steps = route
            .legs
            .into_iter()
            .flat_map(|l| l.steps)
            .map(|s| RouteStep {
                instruction: strip_html(&s.html_instructions),
                distance_m: s.distance.map_or(0.0, |d| d.value),
                duration_s: s.duration.map_or(0.0, |d| d.value),
            })
            .collect();

        Ok(RouteResult {
            path,
            distance_m,
            duration_s,
            steps,
            provider: RouteSource::Primary,
        })
    }
}

/// Drop markup tags from a Directions instruction.
fn strip_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl RouteProvider for GoogleDirectionsProvider {
    fn name(&self) -> &'static str {
        "Google"
    }

    async fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<RouteResult, ProviderRouteError> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(ProviderRouteError::MissingApiKey);
        };

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("origin", origin.to_lat_lng().as_str()),
                ("destination", destination.to_lat_lng().as_str()),
                ("mode", "driving"),
                ("key", key),
            ])
            .send()
            .await
            .map_err(|e| ProviderRouteError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderRouteError::Status(response.status().to_string()));
        }

        let body = response
            .json::<DirectionsResponse>()
            .await
            .map_err(|e| ProviderRouteError::Transport(e.to_string()))?;

        Self::into_route(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "status": "OK",
        "routes": [{
            "overview_polyline": {"points": "_p~iF~ps|U_ulLnnqC"},
            "legs": [
                {
                    "distance": {"text": "1.2 km", "value": 1200},
                    "duration": {"text": "4 mins", "value": 240},
                    "steps": [
                        {"html_instructions": "Head <b>north</b> on <b>Allen Ave</b>",
                         "distance": {"value": 700}, "duration": {"value": 140}},
                        {"html_instructions": "Turn <b>right</b><div style=\"font-size:0.9em\">Destination will be on the left</div>",
                         "distance": {"value": 500}, "duration": {"value": 100}}
                    ]
                },
                {"distance": {"value": 300}, "duration": {"value": 60}, "steps": []}
            ]
        }]
    }"#;

    #[test]
    fn test_parse_directions_fixture() {
        let response: DirectionsResponse = serde_json::from_str(FIXTURE).unwrap();
        let route = GoogleDirectionsProvider::into_route(response).unwrap();

        assert_eq!(route.provider, RouteSource::Primary);
        assert_eq!(route.path.len(), 2);
        assert!((route.path[1].longitude + 120.95).abs() < 1e-9);
        assert_eq!(route.distance_m, 1500.0);
        assert_eq!(route.duration_s, 300.0);
        assert_eq!(route.steps.len(), 2);
        assert_eq!(route.steps[0].instruction, "Head north on Allen Ave");
        assert_eq!(
            route.steps[1].instruction,
            "Turn right Destination will be on the left"
        );
    }

    #[test]
    fn test_non_ok_status_is_an_error() {
        let response: DirectionsResponse = serde_json::from_str(
            r#"{"status": "REQUEST_DENIED", "error_message": "The provided API key is invalid.", "routes": []}"#,
        )
        .unwrap();
        assert_eq!(
            GoogleDirectionsProvider::into_route(response),
            Err(ProviderRouteError::Status(
                "REQUEST_DENIED: The provided API key is invalid.".to_string()
            ))
        );
    }

    #[test]
    fn test_zero_results() {
        let response: DirectionsResponse =
            serde_json::from_str(r#"{"status": "OK", "routes": []}"#).unwrap();
        assert_eq!(
            GoogleDirectionsProvider::into_route(response),
            Err(ProviderRouteError::NoRoutes)
        );
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_request() {
        let provider = GoogleDirectionsProvider::new(
            Client::new(),
            "http://127.0.0.1:9".to_string(),
            Some("  ".to_string()),
        );
        let result = provider
            .route(Coordinate::new(1.0, 1.0), Coordinate::new(2.0, 2.0))
            .await;
        assert_eq!(result, Err(ProviderRouteError::MissingApiKey));
    }
}
