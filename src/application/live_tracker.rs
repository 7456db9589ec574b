// Live location tracking session
//
// One session task owns every resource (position watch, channel, poll
// timer) and processes events one at a time. Route computations run in
// spawned tasks and report back to the session loop.
use crate::application::channel::ChannelConnector;
use crate::application::errors::PositionError;
use crate::application::estimator_service::{
    select_destination, EstimateOutcome, EstimatorSettings, EstimatorState, RecomputeJob,
    RouteEstimator,
};
use crate::application::position_service::{PositionSampler, PositionSettings, WatchHandle};
use crate::application::position_source::PositionSource;
use crate::application::route_provider::RouteProvider;
use crate::application::tracking_api::{BackendDistance, TrackingApi};
use crate::application::transport_service::{Transport, TransportEvent, TransportSettings};
use crate::domain::coordinate::Coordinate;
use crate::domain::route::{DistanceEstimate, RouteResult, RouteStatus};
use crate::domain::tracking::{BookingId, TrackingSession, TransportState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

/// External collaborators for a session.
#[derive(Clone)]
pub struct TrackerDeps {
    pub position: Arc<dyn PositionSource>,
    pub api: Arc<dyn TrackingApi>,
    pub connector: Arc<dyn ChannelConnector>,
    pub primary: Arc<dyn RouteProvider>,
    pub secondary: Arc<dyn RouteProvider>,
}

#[derive(Debug, Clone, Default)]
pub struct TrackerSettings {
    pub position: PositionSettings,
    pub estimator: EstimatorSettings,
    pub transport: TransportSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Starting,
    Active,
    PermissionDenied,
    Unavailable,
}

/// Everything the presentation surface needs, published after each event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub booking_id: BookingId,
    pub other_user_label: String,
    pub self_coordinate: Option<Coordinate>,
    pub peer_coordinate: Option<Coordinate>,
    pub meeting_coordinate: Option<Coordinate>,
    pub route: Option<RouteResult>,
    pub estimate: Option<DistanceEstimate>,
    pub route_status: RouteStatus,
    pub transport: TransportState,
    pub position: PositionStatus,
    pub server_distance: Option<BackendDistance>,
}

impl TrackerSnapshot {
    fn initial(session: &TrackingSession) -> Self {
        Self {
            booking_id: session.booking_id.clone(),
            other_user_label: session.other_user_label.clone(),
            self_coordinate: None,
            peer_coordinate: None,
            meeting_coordinate: session.meeting_coordinate,
            route: None,
            estimate: None,
            route_status: RouteStatus::Idle,
            transport: TransportState::Idle,
            position: PositionStatus::Starting,
            server_distance: None,
        }
    }
}

enum Command {
    Stop,
}

/// Handle to a running tracking session.
pub struct LiveLocationTracker {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<TrackerSnapshot>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveLocationTracker {
    /// Spawn the session loop. Must be called inside a tokio runtime.
    pub fn start(session: TrackingSession, deps: TrackerDeps, settings: TrackerSettings) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (fixes_tx, fixes_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(TrackerSnapshot::initial(&session));

        tracing::info!(
            "Starting tracking session for booking {} (real-time: {})",
            session.booking_id,
            session.enable_realtime_channel
        );

        let session_loop = SessionLoop {
            sampler: Arc::new(PositionSampler::new(deps.position, settings.position)),
            transport: Transport::new(
                session.clone(),
                deps.connector,
                deps.api.clone(),
                settings.transport,
                transport_tx,
            ),
            estimator: Arc::new(RouteEstimator::new(
                deps.primary,
                deps.secondary,
                deps.api,
                settings.estimator.fallback_speed_mps,
            )),
            estimates: EstimatorState::new(settings.estimator),
            position_watch: WatchHandle::inactive(),
            position_status: PositionStatus::Starting,
            self_coordinate: None,
            peer_coordinate: None,
            peer_recorded_at: None,
            server_distance: None,
            fixes_tx,
            fixes_rx,
            transport_rx,
            route_jobs: JoinSet::new(),
            snapshot: snapshot_tx,
            session,
        };

        Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
            task: Mutex::new(Some(tokio::spawn(session_loop.run(commands_rx)))),
        }
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Tear the session down and wait for it to finish. Calling this again
    /// is a no-op.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        let _ = self.commands.send(Command::Stop);
        if let Err(e) = task.await {
            tracing::error!("Tracking session task failed: {}", e);
        }
    }
}

struct SessionLoop {
    session: TrackingSession,
    sampler: Arc<PositionSampler>,
    transport: Transport,
    estimator: Arc<RouteEstimator>,
    estimates: EstimatorState,
    position_watch: WatchHandle,
    position_status: PositionStatus,
    self_coordinate: Option<Coordinate>,
    peer_coordinate: Option<Coordinate>,
    /// Timestamp of the peer coordinate, used to drop older samples
    peer_recorded_at: Option<DateTime<Utc>>,
    server_distance: Option<BackendDistance>,
    fixes_tx: mpsc::UnboundedSender<Coordinate>,
    fixes_rx: mpsc::UnboundedReceiver<Coordinate>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    /// In-flight route computations; aborted on teardown
    route_jobs: JoinSet<(RecomputeJob, EstimateOutcome)>,
    snapshot: watch::Sender<TrackerSnapshot>,
}

impl SessionLoop {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.start_position().await;
        if self.session.enable_realtime_channel {
            self.publish_with(TransportState::Connecting);
        }

        let stopped = tokio::select! {
            _ = commands.recv() => true,
            _ = self.transport.start() => false,
        };
        self.publish();

        if !stopped {
            loop {
                tokio::select! {
                    _ = commands.recv() => break,
                    Some(coordinate) = self.fixes_rx.recv() => self.on_fix(coordinate),
                    Some(event) = self.transport_rx.recv() => self.on_transport_event(event),
                    Some(Ok((job, outcome))) = self.route_jobs.join_next() => {
                        self.estimates.finish(&job, outcome, Instant::now());
                    }
                    _ = self.transport.next_poll() => self.transport.poll_history(),
                }
                self.publish();
            }
        }

        self.teardown().await;
    }

    async fn start_position(&mut self) {
        match self.sampler.request_permission().await {
            Ok(()) => {
                let fixes = self.fixes_tx.clone();
                self.position_watch = self.sampler.watch(move |coordinate| {
                    let _ = fixes.send(coordinate);
                });
                self.position_status = PositionStatus::Active;
                tracing::info!("Watching position via {}", self.sampler.source_name());
            }
            Err(PositionError::PermissionDenied) => {
                tracing::warn!("Location permission denied; tracking without own position");
                self.position_status = PositionStatus::PermissionDenied;
            }
            Err(e) => {
                tracing::warn!("Position unavailable; tracking without own position: {}", e);
                self.position_status = PositionStatus::Unavailable;
            }
        }
    }

    fn on_fix(&mut self, coordinate: Coordinate) {
        self.self_coordinate = Some(coordinate);
        self.transport.send_update(coordinate);
        self.recompute();
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerLocation {
                coordinate,
                recorded_at,
            } => {
                // Live channel events carry no timestamp and count as current
                let recorded_at = recorded_at.unwrap_or_else(Utc::now);
                if self.peer_recorded_at.is_some_and(|newest| recorded_at < newest) {
                    tracing::debug!("Ignoring peer sample from {}", recorded_at);
                    return;
                }
                self.peer_coordinate = Some(coordinate);
                self.peer_recorded_at = Some(recorded_at);
                self.recompute();
            }
            TransportEvent::ServerDistance(distance) => {
                self.server_distance = Some(distance);
            }
            TransportEvent::Lifecycle(change) => self.transport.on_lifecycle(change),
        }
    }

    fn recompute(&mut self) {
        let Some(origin) = self.self_coordinate else {
            return;
        };
        let Some((destination, source)) =
            select_destination(self.session.meeting_coordinate, self.peer_coordinate)
        else {
            self.estimates.go_idle();
            return;
        };
        let Some(job) = self
            .estimates
            .begin(origin, destination, source, Instant::now())
        else {
            return;
        };

        let estimator = self.estimator.clone();
        self.route_jobs.spawn(async move {
            let outcome = estimator
                .estimate(job.origin, job.destination, job.source)
                .await;
            (job, outcome)
        });
    }

    async fn teardown(&mut self) {
        // Position watch first: this also clears its liveness timer.
        self.position_watch.cancel();
        self.route_jobs.shutdown().await;
        self.transport.shutdown().await;
        self.publish();
        tracing::info!("Tracking session for booking {} stopped", self.session.booking_id);
    }

    fn publish(&self) {
        self.publish_with(self.transport.state());
    }

    fn publish_with(&self, transport: TransportState) {
        self.snapshot.send_replace(TrackerSnapshot {
            booking_id: self.session.booking_id.clone(),
            other_user_label: self.session.other_user_label.clone(),
            self_coordinate: self.self_coordinate,
            peer_coordinate: self.peer_coordinate,
            meeting_coordinate: self.session.meeting_coordinate,
            route: self.estimates.route().cloned(),
            estimate: self.estimates.estimate().copied(),
            route_status: self.estimates.status(),
            transport,
            position: self.position_status,
            server_distance: self.server_distance,
        });
    }
}
