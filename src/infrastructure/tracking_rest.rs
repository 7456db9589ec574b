// Tracking REST API client
use crate::application::credentials::CredentialStore;
use crate::application::errors::RestCallError;
use crate::application::tracking_api::{BackendDistance, TrackingApi};
use crate::domain::coordinate::Coordinate;
use crate::domain::tracking::{BookingId, TrackingSample};
use crate::infrastructure::config::join_url;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct TrackingRestClient {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DistanceRequest {
    from_latitude: f64,
    from_longitude: f64,
    to_latitude: f64,
    to_longitude: f64,
}

/// History responses come either bare or wrapped in `{ "data": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryResponse {
    Bare(Vec<TrackingSample>),
    Wrapped { data: Vec<TrackingSample> },
}

impl From<HistoryResponse> for Vec<TrackingSample> {
    fn from(response: HistoryResponse) -> Self {
        match response {
            HistoryResponse::Bare(samples) | HistoryResponse::Wrapped { data: samples } => samples,
        }
    }
}

impl TrackingRestClient {
    pub fn new(client: Client, base_url: String, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credentials.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RestCallError> {
        let response = self
            .authorized(request)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| RestCallError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RestCallError::Status { status, body });
        }

        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RestCallError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| RestCallError::Decode(e.to_string()))
    }

    fn history_path(booking_id: &BookingId) -> String {
        format!(
            "/api/tracking/bookings/{}/history",
            urlencoding::encode(booking_id.as_str())
        )
    }

    fn locations_path(booking_id: &BookingId) -> String {
        format!(
            "/api/tracking/bookings/{}/locations",
            urlencoding::encode(booking_id.as_str())
        )
    }
}

#[async_trait]
impl TrackingApi for TrackingRestClient {
    async fn update_current_location(&self, coordinate: Coordinate) -> Result<(), RestCallError> {
        let request = self
            .client
            .post(self.url("/api/tracking/location"))
            .json(&coordinate);
        self.send(request).await?;
        Ok(())
    }

    async fn record_location(
        &self,
        booking_id: &BookingId,
        coordinate: Coordinate,
    ) -> Result<(), RestCallError> {
        let request = self
            .client
            .post(self.url(&Self::locations_path(booking_id)))
            .json(&coordinate);
        self.send(request).await?;
        Ok(())
    }

    async fn tracking_history(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<TrackingSample>, RestCallError> {
        let request = self.client.get(self.url(&Self::history_path(booking_id)));
        let response: HistoryResponse = self.send_json(request).await?;
        let samples: Vec<TrackingSample> = response.into();
        tracing::debug!("Fetched {} history samples for booking {}", samples.len(), booking_id);
        Ok(samples)
    }

    async fn calculate_distance(
        &self,
        from: Coordinate,
        to: Coordinate,
    ) -> Result<BackendDistance, RestCallError> {
        let body = DistanceRequest {
            from_latitude: from.latitude,
            from_longitude: from.longitude,
            to_latitude: to.latitude,
            to_longitude: to.longitude,
        };
        let request = self.client.post(self.url("/api/tracking/distance")).json(&body);
        self.send_json(request).await
    }
}
