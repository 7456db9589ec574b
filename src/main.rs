// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use anyhow::Context;
use axum::{routing::{get, post}, Router};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::credentials::CredentialStore;
use crate::application::live_tracker::{LiveLocationTracker, TrackerDeps};
use crate::application::route_provider::RouteProvider;
use crate::infrastructure::config::load_tracker_config;
use crate::infrastructure::credential_store::FileCredentialStore;
use crate::infrastructure::google_directions::GoogleDirectionsProvider;
use crate::infrastructure::hub::{HubConnector, HubSettings};
use crate::infrastructure::osrm::OsrmProvider;
use crate::infrastructure::position::select_position_source;
use crate::infrastructure::tracking_rest::TrackingRestClient;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{health_check, stop_tracking, tracking_view};
use crate::presentation::view::ProviderNames;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = load_tracker_config()?;
    let mut session = config
        .session
        .clone()
        .context("no tracking session configured (set [session] booking_id)")?;

    let credentials: Arc<dyn CredentialStore> =
        Arc::new(FileCredentialStore::new(&config.auth.store_path));
    if session.self_user_id.is_none() {
        session.self_user_id = credentials.user_id();
    }

    // REST and routing calls are bounded; hub transports hold requests open
    let rest_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.api.timeout_secs))
        .build()?;
    let hub_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.realtime.connect_timeout_secs))
        .build()?;

    // Adapters (infrastructure layer)
    let api = Arc::new(TrackingRestClient::new(
        rest_client.clone(),
        config.api.base_url.clone(),
        credentials.clone(),
    ));
    let primary: Arc<dyn RouteProvider> = Arc::new(GoogleDirectionsProvider::new(
        rest_client.clone(),
        config.routing.google_base_url.clone(),
        config.routing.google_api_key.clone(),
    ));
    let secondary: Arc<dyn RouteProvider> = Arc::new(OsrmProvider::new(
        rest_client,
        config.routing.osrm_base_url.clone(),
    ));
    let connector = Arc::new(HubConnector::new(
        hub_client,
        HubSettings::from_config(&config.api.base_url, &config.realtime),
        credentials,
    ));
    let position = select_position_source(&config.position).await;

    let providers = ProviderNames {
        primary: primary.name(),
        secondary: secondary.name(),
    };

    // Tracking session (application layer)
    let tracker = Arc::new(LiveLocationTracker::start(
        session,
        TrackerDeps {
            position,
            api,
            connector,
            primary,
            secondary,
        },
        config.tracking.tracker_settings(),
    ));

    let state = Arc::new(AppState {
        tracker: tracker.clone(),
        providers,
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/tracking", get(tracking_view))
        .route("/tracking/stop", post(stop_tracking))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    tracing::info!("Starting rental-tracker on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    tracker.stop().await;
    Ok(())
}
