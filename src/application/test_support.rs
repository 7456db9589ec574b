// In-memory collaborators shared by the service tests
use crate::application::channel::{
    ChannelConnection, ChannelConnector, ConnectionState, EventHandler, StateHandler, SubTransport,
};
use crate::application::errors::{ChannelError, PositionError, ProviderRouteError, RestCallError};
use crate::application::position_source::PositionSource;
use crate::application::route_provider::RouteProvider;
use crate::application::tracking_api::{BackendDistance, TrackingApi};
use crate::domain::coordinate::Coordinate;
use crate::domain::route::{RouteResult, RouteSource};
use crate::domain::tracking::{BookingId, TrackingSample};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Position source fed from a test-controlled channel.
pub struct ScriptedSource {
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Result<Coordinate, PositionError>>>>,
    pub fix: Option<Coordinate>,
    pub permission: Result<(), PositionError>,
    pub stream_dropped: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<Result<Coordinate, PositionError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            receiver: Mutex::new(Some(rx)),
            fix: None,
            permission: Ok(()),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        };
        (source, tx)
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PositionSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn request_permission(&self) -> Result<(), PositionError> {
        self.permission.clone()
    }

    async fn current_fix(&self) -> Result<Coordinate, PositionError> {
        self.fix
            .ok_or_else(|| PositionError::Unavailable("no scripted fix".to_string()))
    }

    fn watch(&self) -> BoxStream<'static, Result<Coordinate, PositionError>> {
        let rx = self.receiver.lock().unwrap().take();
        let guard = DropFlag(self.stream_dropped.clone());
        match rx {
            Some(rx) => UnboundedReceiverStream::new(rx)
                .map(move |item| {
                    let _ = &guard;
                    item
                })
                .boxed(),
            None => futures::stream::empty().boxed(),
        }
    }
}

pub struct FakeRouteProvider {
    source: RouteSource,
    fail: bool,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeRouteProvider {
    pub fn succeeding(source: RouteSource) -> Self {
        Self {
            source,
            fail: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(source: RouteSource) -> Self {
        Self {
            source,
            fail: true,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer only after `delay`
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sample_route(provider: RouteSource) -> RouteResult {
        RouteResult {
            path: vec![Coordinate::new(6.5244, 3.3792), Coordinate::new(6.4550, 3.3941)],
            distance_m: 9_800.0,
            duration_s: 1_260.0,
            steps: Vec::new(),
            provider,
        }
    }
}

#[async_trait]
impl RouteProvider for FakeRouteProvider {
    fn name(&self) -> &'static str {
        match self.source {
            RouteSource::Primary => "fake-primary",
            RouteSource::Secondary => "fake-secondary",
        }
    }

    async fn route(
        &self,
        _origin: Coordinate,
        _destination: Coordinate,
    ) -> Result<RouteResult, ProviderRouteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            Err(ProviderRouteError::NoRoutes)
        } else {
            Ok(Self::sample_route(self.source))
        }
    }
}

#[derive(Default)]
pub struct FakeTrackingApi {
    distance: Option<BackendDistance>,
    history: Mutex<Vec<TrackingSample>>,
    pub recorded: Mutex<Vec<Coordinate>>,
    pub current_updates: AtomicUsize,
    pub history_calls: AtomicUsize,
    history_delay: Duration,
    distance_calls: AtomicUsize,
}

impl FakeTrackingApi {
    pub fn with_distance(distance_km: f64, duration_minutes: f64) -> Self {
        Self {
            distance: Some(BackendDistance {
                distance_km,
                duration_minutes,
            }),
            ..Self::default()
        }
    }

    /// History responses arrive only after `delay`
    pub fn slow_history(mut self, delay: Duration) -> Self {
        self.history_delay = delay;
        self
    }

    pub fn set_history(&self, samples: Vec<TrackingSample>) {
        *self.history.lock().unwrap() = samples;
    }

    pub fn distance_calls(&self) -> usize {
        self.distance_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<Coordinate> {
        self.recorded.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrackingApi for FakeTrackingApi {
    async fn update_current_location(&self, _coordinate: Coordinate) -> Result<(), RestCallError> {
        self.current_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn record_location(
        &self,
        _booking_id: &BookingId,
        coordinate: Coordinate,
    ) -> Result<(), RestCallError> {
        self.recorded.lock().unwrap().push(coordinate);
        Ok(())
    }

    async fn tracking_history(
        &self,
        _booking_id: &BookingId,
    ) -> Result<Vec<TrackingSample>, RestCallError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if !self.history_delay.is_zero() {
            tokio::time::sleep(self.history_delay).await;
        }
        Ok(self.history.lock().unwrap().clone())
    }

    async fn calculate_distance(
        &self,
        _from: Coordinate,
        _to: Coordinate,
    ) -> Result<BackendDistance, RestCallError> {
        self.distance_calls.fetch_add(1, Ordering::SeqCst);
        self.distance.ok_or(RestCallError::Status {
            status: 503,
            body: "unavailable".to_string(),
        })
    }
}

#[derive(Default)]
pub struct FakeConnection {
    invocations: Mutex<Vec<(String, Vec<Value>)>>,
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
    state_handlers: Mutex<Vec<StateHandler>>,
    failing_methods: Mutex<HashSet<String>>,
    starts: Mutex<Vec<(usize, usize)>>,
    stops: AtomicUsize,
}

impl FakeConnection {
    pub fn fail_method(&self, method: &str) {
        self.failing_methods.lock().unwrap().insert(method.to_string());
    }

    pub fn invoked(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }

    /// Event and lifecycle handler counts seen by each `start` call
    pub fn starts(&self) -> Vec<(usize, usize)> {
        self.starts.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: &str, args: &[Value]) {
        let handlers = self.handlers.lock().unwrap().get(event).cloned().unwrap_or_default();
        for handler in handlers {
            handler(args);
        }
    }

    pub fn emit_state(&self, state: ConnectionState) {
        let handlers = self.state_handlers.lock().unwrap().clone();
        for handler in handlers {
            handler(state);
        }
    }
}

#[async_trait]
impl ChannelConnection for FakeConnection {
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ChannelError> {
        self.invocations
            .lock()
            .unwrap()
            .push((method.to_string(), args));
        if self.failing_methods.lock().unwrap().contains(method) {
            return Err(ChannelError::Invocation {
                method: method.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(Value::Null)
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.handlers
            .lock()
            .unwrap()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    fn on_state_change(&self, handler: StateHandler) {
        self.state_handlers.lock().unwrap().push(handler);
    }

    fn start(&self) {
        let events = self.handlers.lock().unwrap().values().map(Vec::len).sum();
        let lifecycle = self.state_handlers.lock().unwrap().len();
        self.starts.lock().unwrap().push((events, lifecycle));
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeConnector {
    failing: HashSet<&'static str>,
    attempts: Mutex<Vec<SubTransport>>,
    pub connection: Arc<FakeConnection>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            failing: HashSet::new(),
            attempts: Mutex::new(Vec::new()),
            connection: Arc::new(FakeConnection::default()),
        }
    }

    pub fn failing_primary(mut self) -> Self {
        self.failing.insert("primary");
        self
    }

    pub fn failing_secondary(mut self) -> Self {
        self.failing.insert("secondary");
        self
    }

    pub fn attempts(&self) -> Vec<SubTransport> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelConnector for FakeConnector {
    async fn connect(
        &self,
        transport: SubTransport,
    ) -> Result<Arc<dyn ChannelConnection>, ChannelError> {
        self.attempts.lock().unwrap().push(transport);
        let key = match transport {
            SubTransport::Primary => "primary",
            SubTransport::Secondary => "secondary",
        };
        if self.failing.contains(key) {
            return Err(ChannelError::Connect(format!("{key} refused")));
        }
        Ok(self.connection.clone())
    }
}
