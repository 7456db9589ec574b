// Position sampling with cached fixes and a movement-threshold watcher
use crate::application::errors::PositionError;
use crate::application::position_source::PositionSource;
use crate::domain::coordinate::Coordinate;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

#[derive(Debug, Clone)]
pub struct PositionSettings {
    /// Upper bound for a one-shot fix
    pub fix_timeout: Duration,
    /// A cached fix younger than this is returned instead of asking the source
    pub max_cached_age: Duration,
    /// Minimum displacement before the watcher reports again
    pub movement_threshold_m: f64,
    /// Report at least this often even when stationary
    pub liveness_interval: Duration,
}

impl Default for PositionSettings {
    fn default() -> Self {
        Self {
            fix_timeout: Duration::from_secs(15),
            max_cached_age: Duration::from_secs(5),
            movement_threshold_m: 10.0,
            liveness_interval: Duration::from_secs(30),
        }
    }
}

/// Wraps the session's position source with timeout and fix caching.
pub struct PositionSampler {
    source: Arc<dyn PositionSource>,
    settings: PositionSettings,
    last_fix: Mutex<Option<(Coordinate, Instant)>>,
}

impl PositionSampler {
    pub fn new(source: Arc<dyn PositionSource>, settings: PositionSettings) -> Self {
        Self {
            source,
            settings,
            last_fix: Mutex::new(None),
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    pub async fn request_permission(&self) -> Result<(), PositionError> {
        self.source.request_permission().await
    }

    /// One-shot fix, served from cache when fresh enough.
    pub async fn current_coordinate(&self) -> Result<Coordinate, PositionError> {
        if let Some(cached) = self.cached() {
            return Ok(cached);
        }

        let coordinate = timeout(self.settings.fix_timeout, self.source.current_fix())
            .await
            .map_err(|_| PositionError::Timeout)??;

        if !coordinate.is_valid() {
            return Err(PositionError::Unavailable(format!(
                "source returned invalid coordinate {coordinate:?}"
            )));
        }

        self.remember(coordinate);
        Ok(coordinate)
    }

    fn cached(&self) -> Option<Coordinate> {
        let guard = self.last_fix.lock().ok()?;
        let (coordinate, taken_at) = (*guard)?;
        (taken_at.elapsed() <= self.settings.max_cached_age).then_some(coordinate)
    }

    fn remember(&self, coordinate: Coordinate) {
        if let Ok(mut guard) = self.last_fix.lock() {
            *guard = Some((coordinate, Instant::now()));
        }
    }

    /// Subscribe to position changes.
    ///
    /// `on_update` fires when the device has moved more than the movement
    /// threshold from the last reported coordinate, or when the liveness
    /// interval elapses without a report. The first valid fix is always
    /// reported.
    pub fn watch<F>(self: &Arc<Self>, mut on_update: F) -> WatchHandle
    where
        F: FnMut(Coordinate) + Send + 'static,
    {
        let sampler = Arc::clone(self);
        let threshold = self.settings.movement_threshold_m;
        let interval = self.settings.liveness_interval;

        let task = tokio::spawn(async move {
            let mut stream = sampler.source.watch();
            let mut last_reported: Option<Coordinate> = None;
            let mut latest: Option<Coordinate> = None;
            let liveness = sleep(interval);
            tokio::pin!(liveness);

            loop {
                tokio::select! {
                    item = stream.next() => match item {
                        Some(Ok(coordinate)) if coordinate.is_valid() => {
                            sampler.remember(coordinate);
                            latest = Some(coordinate);

                            let moved = last_reported
                                .map_or(true, |last| last.distance_to(&coordinate) > threshold);
                            if moved {
                                on_update(coordinate);
                                last_reported = Some(coordinate);
                                liveness.as_mut().reset(Instant::now() + interval);
                            }
                        }
                        Some(Ok(coordinate)) => {
                            tracing::debug!("Dropping invalid fix {:?}", coordinate);
                        }
                        Some(Err(e)) => {
                            tracing::warn!("Position watch error from {}: {}", sampler.source_name(), e);
                        }
                        None => {
                            tracing::debug!("Position stream from {} ended", sampler.source_name());
                            stream = futures::stream::pending().boxed();
                        }
                    },
                    _ = &mut liveness => {
                        let fix = match sampler.current_coordinate().await {
                            Ok(coordinate) => Some(coordinate),
                            Err(e) => {
                                tracing::debug!("Liveness fix failed: {}", e);
                                latest
                            }
                        };
                        if let Some(coordinate) = fix {
                            on_update(coordinate);
                            last_reported = Some(coordinate);
                        }
                        liveness.as_mut().reset(Instant::now() + interval);
                    }
                }
            }
        });

        WatchHandle { task: Some(task) }
    }
}

/// Cancels a position watch. Cancelling drops the platform stream and the
/// liveness timer; it is safe to call more than once.
#[derive(Debug, Default)]
pub struct WatchHandle {
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// A handle with nothing to cancel, for sessions without a position source.
    pub fn inactive() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
