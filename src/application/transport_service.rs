// Transport layer - real-time channel with REST fallback
use crate::application::channel::{
    ChannelConnection, ChannelConnector, ConnectionState, SubTransport,
};
use crate::application::errors::ChannelError;
use crate::application::tracking_api::{BackendDistance, TrackingApi};
use crate::domain::coordinate::Coordinate;
use crate::domain::tracking::{
    select_peer_sample, BookingId, TrackingSession, TransportState, UserId,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval, Interval, MissedTickBehavior};

pub const START_TRACKING: &str = "StartTracking";
pub const UPDATE_LOCATION: &str = "UpdateLocation";
pub const STOP_TRACKING: &str = "StopTracking";
pub const LOCATION_UPDATED: &str = "LocationUpdated";
pub const DISTANCE_UPDATE: &str = "DistanceUpdate";

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub poll_interval: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
        }
    }
}

/// Everything the transport hands back to the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// `recorded_at` is absent for live channel events
    PeerLocation {
        coordinate: Coordinate,
        recorded_at: Option<DateTime<Utc>>,
    },
    ServerDistance(BackendDistance),
    Lifecycle(ConnectionState),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerLocationPayload {
    #[serde(default)]
    user_id: Option<UserId>,
    latitude: f64,
    longitude: f64,
    #[serde(default, alias = "timestamp")]
    recorded_at: Option<DateTime<Utc>>,
}

/// Parse a `LocationUpdated` event. Accepts a single object argument or
/// positional `(userId, latitude, longitude)` arguments.
fn parse_peer_location(args: &[Value]) -> Option<PeerLocationPayload> {
    match args {
        [payload @ Value::Object(_), ..] => serde_json::from_value(payload.clone()).ok(),
        [user, lat, lng, ..] => Some(PeerLocationPayload {
            user_id: serde_json::from_value(user.clone()).ok(),
            latitude: lat.as_f64()?,
            longitude: lng.as_f64()?,
            recorded_at: None,
        }),
        _ => None,
    }
}

/// Register every server-event and lifecycle handler on `connection`.
/// Used for both sub-transports so neither can miss a handler.
pub fn wire_handlers(
    connection: &dyn ChannelConnection,
    self_user_id: Option<UserId>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let tx = events.clone();
    connection.on(
        LOCATION_UPDATED,
        Arc::new(move |args: &[Value]| {
            let Some(payload) = parse_peer_location(args) else {
                tracing::warn!("Unparseable {} event: {:?}", LOCATION_UPDATED, args);
                return;
            };
            if payload.user_id.is_some() && payload.user_id == self_user_id {
                return;
            }
            let coordinate = Coordinate::new(payload.latitude, payload.longitude);
            if !coordinate.is_valid() {
                tracing::debug!("Ignoring invalid peer coordinate {:?}", coordinate);
                return;
            }
            let _ = tx.send(TransportEvent::PeerLocation {
                coordinate,
                recorded_at: payload.recorded_at,
            });
        }),
    );

    let tx = events.clone();
    connection.on(
        DISTANCE_UPDATE,
        Arc::new(move |args: &[Value]| {
            match args.first().cloned().map(serde_json::from_value::<BackendDistance>) {
                Some(Ok(distance)) => {
                    let _ = tx.send(TransportEvent::ServerDistance(distance));
                }
                _ => tracing::debug!("Unparseable {} event: {:?}", DISTANCE_UPDATE, args),
            }
        }),
    );

    connection.on_state_change(Arc::new(move |state: ConnectionState| {
        let _ = events.send(TransportEvent::Lifecycle(state));
    }));
}

/// Owns the channel connection and REST polling for one session.
pub struct Transport {
    session: TrackingSession,
    connector: Arc<dyn ChannelConnector>,
    api: Arc<dyn TrackingApi>,
    settings: TransportSettings,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: TransportState,
    connection: Option<Arc<dyn ChannelConnection>>,
    poll: Option<Interval>,
    /// Background REST calls and invocations; aborted on shutdown
    tasks: JoinSet<()>,
}

impl Transport {
    pub fn new(
        session: TrackingSession,
        connector: Arc<dyn ChannelConnector>,
        api: Arc<dyn TrackingApi>,
        settings: TransportSettings,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            session,
            connector,
            api,
            settings,
            events,
            state: TransportState::Idle,
            connection: None,
            poll: None,
            tasks: JoinSet::new(),
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    #[cfg(test)]
    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    /// Connect the real-time channel, trying the secondary sub-transport
    /// once before settling on REST polling.
    pub async fn start(&mut self) {
        if self.state != TransportState::Idle {
            return;
        }
        if !self.session.enable_realtime_channel {
            tracing::info!("Real-time channel disabled for booking {}", self.session.booking_id);
            self.enter_rest_polling();
            return;
        }

        self.state = TransportState::Connecting;
        match self.open(SubTransport::Primary).await {
            Ok(()) => return,
            Err(e) => {
                tracing::warn!("Primary channel transport failed: {}", e);
                self.state = TransportState::FailedPrimary;
            }
        }

        self.state = TransportState::ConnectingSecondary;
        match self.open(SubTransport::Secondary).await {
            Ok(()) => return,
            Err(e) => {
                tracing::warn!("Secondary channel transport failed: {}", e);
                self.state = TransportState::FailedSecondary;
            }
        }

        self.enter_rest_polling();
    }

    async fn open(&mut self, transport: SubTransport) -> Result<(), ChannelError> {
        let connection = self.connector.connect(transport).await?;
        wire_handlers(
            connection.as_ref(),
            self.session.self_user_id.clone(),
            self.events.clone(),
        );
        connection.start();

        if let Err(e) = connection.invoke(START_TRACKING, self.booking_args()).await {
            connection.stop().await;
            return Err(e);
        }

        tracing::info!(
            "Tracking booking {} over {:?} channel transport",
            self.session.booking_id,
            transport
        );
        self.connection = Some(connection);
        self.state = TransportState::Connected;
        Ok(())
    }

    fn spawn_task(&mut self, task: impl Future<Output = ()> + Send + 'static) {
        // Reap finished tasks so the set only holds work still in flight
        while self.tasks.try_join_next().is_some() {}
        self.tasks.spawn(task);
    }

    fn booking_args(&self) -> Vec<Value> {
        vec![json!(self.session.booking_id.as_str())]
    }

    fn enter_rest_polling(&mut self) {
        tracing::info!(
            "Polling tracking history every {:?} for booking {}",
            self.settings.poll_interval,
            self.session.booking_id
        );
        let mut timer = interval(self.settings.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.poll = Some(timer);
        self.state = TransportState::RestPollingOnly;
    }

    /// Resolves when the next history poll is due; never resolves when the
    /// session is not polling.
    pub async fn next_poll(&mut self) {
        match self.poll.as_mut() {
            Some(timer) => {
                timer.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Fetch history in the background and report the newest peer sample.
    pub fn poll_history(&mut self) {
        let api = self.api.clone();
        let session = self.session.clone();
        let events = self.events.clone();

        self.spawn_task(async move {
            match api.tracking_history(&session.booking_id).await {
                Ok(samples) => {
                    if let Some(sample) = select_peer_sample(&samples, &session) {
                        let _ = events.send(TransportEvent::PeerLocation {
                            coordinate: sample.coordinate,
                            recorded_at: Some(sample.recorded_at),
                        });
                    }
                }
                Err(e) => tracing::warn!("Tracking history poll failed: {}", e),
            }
        });
    }

    /// Publish a local fix. Fire-and-forget: uses the channel when connected
    /// and falls through to REST for this update if the invocation fails.
    pub fn send_update(&mut self, coordinate: Coordinate) {
        let connection = match self.state {
            TransportState::Connected => self.connection.clone(),
            _ => None,
        };
        let api = self.api.clone();
        let booking_id = self.session.booking_id.clone();
        let args = vec![
            json!(booking_id.as_str()),
            json!(coordinate.latitude),
            json!(coordinate.longitude),
        ];

        self.spawn_task(async move {
            if let Some(connection) = connection {
                match connection.invoke(UPDATE_LOCATION, args).await {
                    Ok(_) => return,
                    Err(e) => tracing::warn!("Channel update failed, sending over REST: {}", e),
                }
            }
            rest_update(api.as_ref(), &booking_id, coordinate).await;
        });
    }

    /// Apply a lifecycle change reported by the channel.
    pub fn on_lifecycle(&mut self, change: ConnectionState) {
        match (self.state, change) {
            (TransportState::Connected, ConnectionState::Reconnecting) => {
                tracing::info!("Channel dropped, reconnecting");
                self.state = TransportState::Reconnecting;
            }
            (TransportState::Reconnecting, ConnectionState::Connected) => {
                tracing::info!("Channel reconnected, rejoining booking {}", self.session.booking_id);
                self.state = TransportState::Connected;
                if let Some(connection) = self.connection.clone() {
                    let args = self.booking_args();
                    self.spawn_task(async move {
                        if let Err(e) = connection.invoke(START_TRACKING, args).await {
                            tracing::warn!("Rejoin after reconnect failed: {}", e);
                        }
                    });
                }
            }
            (
                TransportState::Connected | TransportState::Reconnecting,
                ConnectionState::Disconnected,
            ) => {
                tracing::warn!("Channel disconnected, falling back to REST polling");
                self.state = TransportState::Disconnected;
                if let Some(connection) = self.connection.take() {
                    self.spawn_task(async move { connection.stop().await });
                }
                self.enter_rest_polling();
            }
            (state, change) => {
                tracing::debug!("Ignoring channel {:?} while {:?}", change, state);
            }
        }
    }

    /// Clear polling, leave the booking group and close the channel.
    /// Idempotent.
    pub async fn shutdown(&mut self) {
        if self.state == TransportState::Closed {
            return;
        }
        self.poll = None;
        self.tasks.shutdown().await;

        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.invoke(STOP_TRACKING, self.booking_args()).await {
                tracing::debug!("Stop tracking invocation failed: {}", e);
            }
            connection.stop().await;
        }

        self.state = TransportState::Closed;
        tracing::info!("Transport closed for booking {}", self.session.booking_id);
    }
}

async fn rest_update(api: &dyn TrackingApi, booking_id: &BookingId, coordinate: Coordinate) {
    let (recorded, current) = tokio::join!(
        api.record_location(booking_id, coordinate),
        api.update_current_location(coordinate)
    );
    if let Err(e) = recorded {
        tracing::warn!("Recording location for booking {} failed: {}", booking_id, e);
    }
    if let Err(e) = current {
        tracing::warn!("Updating current location failed: {}", e);
    }
}
