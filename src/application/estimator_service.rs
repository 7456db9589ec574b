// Distance/route estimation with provider fallback and recompute rate limiting
use crate::application::route_provider::RouteProvider;
use crate::application::tracking_api::TrackingApi;
use crate::domain::coordinate::Coordinate;
use crate::domain::route::{
    DestinationSource, DistanceEstimate, EstimateBasis, RouteResult, RouteStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct EstimatorSettings {
    /// Origin displacement below which a recent result is reused
    pub min_move_m: f64,
    /// Age below which a recent result is reused
    pub min_interval: Duration,
    /// Assumed speed for straight-line ETAs
    pub fallback_speed_mps: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            min_move_m: 30.0,
            min_interval: Duration::from_secs(20),
            fallback_speed_mps: 1.4,
        }
    }
}

/// Destination priority: fixed meeting point, then the peer, then nothing.
pub fn select_destination(
    meeting: Option<Coordinate>,
    peer: Option<Coordinate>,
) -> Option<(Coordinate, DestinationSource)> {
    meeting
        .map(|c| (c, DestinationSource::Meeting))
        .or_else(|| peer.map(|c| (c, DestinationSource::Peer)))
}

/// Result of one pass through the fallback chain.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateOutcome {
    pub route: Option<RouteResult>,
    pub estimate: DistanceEstimate,
}

/// Runs the provider fallback chain. Never fails: the last resort is a
/// great-circle estimate.
pub struct RouteEstimator {
    primary: Arc<dyn RouteProvider>,
    secondary: Arc<dyn RouteProvider>,
    api: Arc<dyn TrackingApi>,
    fallback_speed_mps: f64,
}

impl RouteEstimator {
    pub fn new(
        primary: Arc<dyn RouteProvider>,
        secondary: Arc<dyn RouteProvider>,
        api: Arc<dyn TrackingApi>,
        fallback_speed_mps: f64,
    ) -> Self {
        Self {
            primary,
            secondary,
            api,
            fallback_speed_mps,
        }
    }

    /// Route from the first provider that answers.
    pub async fn fetch_route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Option<RouteResult> {
        for provider in [&self.primary, &self.secondary] {
            match provider.route(origin, destination).await {
                Ok(route) => {
                    tracing::debug!(
                        "{} route: {:.0} m, {:.0} s, {} points",
                        provider.name(),
                        route.distance_m,
                        route.duration_s,
                        route.path.len()
                    );
                    return Some(route);
                }
                Err(e) => {
                    tracing::info!("{} routing failed: {}", provider.name(), e);
                }
            }
        }
        None
    }

    pub async fn estimate(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        source: DestinationSource,
    ) -> EstimateOutcome {
        if let Some(route) = self.fetch_route(origin, destination).await {
            let estimate = DistanceEstimate::from_route(&route, source);
            return EstimateOutcome {
                route: Some(route),
                estimate,
            };
        }

        let estimate = match self.api.calculate_distance(origin, destination).await {
            Ok(backend) => DistanceEstimate {
                distance_m: backend.distance_km * 1000.0,
                eta_s: backend.duration_minutes * 60.0,
                source,
                basis: EstimateBasis::Backend,
            },
            Err(e) => {
                tracing::info!("Backend distance failed, using straight line: {}", e);
                DistanceEstimate::straight_line(
                    &origin,
                    &destination,
                    self.fallback_speed_mps,
                    source,
                )
            }
        };

        EstimateOutcome {
            route: None,
            estimate,
        }
    }
}

/// A computation to run off the session loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecomputeJob {
    pub generation: u64,
    pub origin: Coordinate,
    pub destination: Coordinate,
    pub source: DestinationSource,
}

#[derive(Debug, Clone, Copy)]
struct Inputs {
    origin: Coordinate,
    destination: Coordinate,
    source: DestinationSource,
    at: Instant,
}

/// Rate limiting and stale-while-revalidate bookkeeping for the estimator.
#[derive(Debug)]
pub struct EstimatorState {
    settings: EstimatorSettings,
    last_success: Option<Inputs>,
    in_flight: Option<(u64, Inputs)>,
    next_generation: u64,
    applied_generation: u64,
    route: Option<RouteResult>,
    estimate: Option<DistanceEstimate>,
}

impl EstimatorState {
    pub fn new(settings: EstimatorSettings) -> Self {
        Self {
            settings,
            last_success: None,
            in_flight: None,
            next_generation: 1,
            applied_generation: 0,
            route: None,
            estimate: None,
        }
    }

    pub fn route(&self) -> Option<&RouteResult> {
        self.route.as_ref()
    }

    pub fn estimate(&self) -> Option<&DistanceEstimate> {
        self.estimate.as_ref()
    }

    pub fn status(&self) -> RouteStatus {
        if self.in_flight.is_some() {
            return RouteStatus::Computing;
        }
        match self.estimate.map(|e| e.basis) {
            Some(EstimateBasis::Route(provider)) => RouteStatus::Routed(provider),
            Some(_) => RouteStatus::EstimateOnly,
            None => RouteStatus::Idle,
        }
    }

    /// Decide whether new inputs warrant a provider round trip.
    ///
    /// Inputs are compared against the in-flight computation if there is one,
    /// otherwise against the last successful one. While a job is pending and
    /// no estimate matches the current destination, a straight-line estimate
    /// is published so the distance is never blank.
    pub fn begin(
        &mut self,
        origin: Coordinate,
        destination: Coordinate,
        source: DestinationSource,
        now: Instant,
    ) -> Option<RecomputeJob> {
        let reference = self.in_flight.map(|(_, i)| i).or(self.last_success);

        if let Some(prior) = reference {
            let same_target = prior.source == source
                && prior.destination.distance_to(&destination) < self.settings.min_move_m;
            let moved = prior.origin.distance_to(&origin);
            let elapsed = now.saturating_duration_since(prior.at);

            if same_target && moved < self.settings.min_move_m && elapsed < self.settings.min_interval
            {
                tracing::trace!("Skipping recompute: moved {:.1} m in {:?}", moved, elapsed);
                return None;
            }
        }

        if self.estimate.is_none_or(|e| e.source != source) {
            self.estimate = Some(DistanceEstimate::straight_line(
                &origin,
                &destination,
                self.settings.fallback_speed_mps,
                source,
            ));
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.in_flight = Some((
            generation,
            Inputs {
                origin,
                destination,
                source,
                at: now,
            },
        ));

        Some(RecomputeJob {
            generation,
            origin,
            destination,
            source,
        })
    }

    /// Apply a finished computation. Results older than one already applied
    /// are dropped. Returns whether the outcome was applied.
    pub fn finish(&mut self, job: &RecomputeJob, outcome: EstimateOutcome, now: Instant) -> bool {
        if self.in_flight.is_some_and(|(g, _)| g == job.generation) {
            self.in_flight = None;
        }
        if job.generation <= self.applied_generation {
            tracing::debug!("Discarding stale estimate generation {}", job.generation);
            return false;
        }
        self.applied_generation = job.generation;

        if let Some(route) = outcome.route {
            self.route = Some(route);
        }
        self.estimate = Some(outcome.estimate);
        self.last_success = Some(Inputs {
            origin: job.origin,
            destination: job.destination,
            source: job.source,
            at: now,
        });
        true
    }

    /// No destination any more: drop everything derived from the old one.
    pub fn go_idle(&mut self) {
        self.in_flight = None;
        self.last_success = None;
        self.route = None;
        self.estimate = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{FakeRouteProvider, FakeTrackingApi};
    use crate::domain::route::RouteSource;
    use crate::infrastructure::google_directions::GoogleDirectionsProvider;

    fn origin() -> Coordinate {
        Coordinate::new(6.5244, 3.3792)
    }

    fn destination() -> Coordinate {
        Coordinate::new(6.4550, 3.3941)
    }

    fn estimator(
        primary: Arc<dyn RouteProvider>,
        secondary: Arc<dyn RouteProvider>,
        api: Arc<dyn TrackingApi>,
    ) -> RouteEstimator {
        RouteEstimator::new(primary, secondary, api, 1.4)
    }

    #[test]
    fn test_meeting_point_takes_priority() {
        let meeting = Coordinate::new(1.0, 1.0);
        let peer = Coordinate::new(2.0, 2.0);
        assert_eq!(
            select_destination(Some(meeting), Some(peer)),
            Some((meeting, DestinationSource::Meeting))
        );
        assert_eq!(
            select_destination(Some(meeting), None),
            Some((meeting, DestinationSource::Meeting))
        );
        assert_eq!(
            select_destination(None, Some(peer)),
            Some((peer, DestinationSource::Peer))
        );
        assert_eq!(select_destination(None, None), None);
    }

    #[tokio::test]
    async fn test_missing_api_key_goes_straight_to_secondary() {
        let client = reqwest::Client::new();
        let primary = Arc::new(GoogleDirectionsProvider::new(
            client,
            "http://127.0.0.1:9".to_string(),
            None,
        ));
        let secondary = Arc::new(FakeRouteProvider::succeeding(RouteSource::Secondary));
        let api = Arc::new(FakeTrackingApi::default());
        let est = estimator(primary, secondary.clone(), api.clone());

        let outcome = est
            .estimate(origin(), destination(), DestinationSource::Peer)
            .await;

        let route = outcome.route.expect("secondary route");
        assert_eq!(route.provider, RouteSource::Secondary);
        assert_eq!(
            outcome.estimate.basis,
            EstimateBasis::Route(RouteSource::Secondary)
        );
        assert_eq!(secondary.calls(), 1);
        assert_eq!(api.distance_calls(), 0);
    }

    #[tokio::test]
    async fn test_primary_success_skips_secondary() {
        let primary = Arc::new(FakeRouteProvider::succeeding(RouteSource::Primary));
        let secondary = Arc::new(FakeRouteProvider::succeeding(RouteSource::Secondary));
        let est = estimator(primary.clone(), secondary.clone(), Arc::new(FakeTrackingApi::default()));

        let outcome = est
            .estimate(origin(), destination(), DestinationSource::Meeting)
            .await;

        assert_eq!(outcome.route.unwrap().provider, RouteSource::Primary);
        assert_eq!(outcome.estimate.source, DestinationSource::Meeting);
        assert_eq!((primary.calls(), secondary.calls()), (1, 0));
    }

    #[tokio::test]
    async fn test_backend_distance_when_both_providers_fail() {
        let api = Arc::new(FakeTrackingApi::with_distance(2.5, 7.0));
        let est = estimator(
            Arc::new(FakeRouteProvider::failing(RouteSource::Primary)),
            Arc::new(FakeRouteProvider::failing(RouteSource::Secondary)),
            api.clone(),
        );

        let outcome = est
            .estimate(origin(), destination(), DestinationSource::Peer)
            .await;

        assert!(outcome.route.is_none());
        assert_eq!(outcome.estimate.basis, EstimateBasis::Backend);
        assert_eq!(outcome.estimate.distance_m, 2500.0);
        assert_eq!(outcome.estimate.eta_s, 420.0);
    }

    #[tokio::test]
    async fn test_straight_line_is_last_resort() {
        let est = estimator(
            Arc::new(FakeRouteProvider::failing(RouteSource::Primary)),
            Arc::new(FakeRouteProvider::failing(RouteSource::Secondary)),
            Arc::new(FakeTrackingApi::default()),
        );

        let outcome = est
            .estimate(origin(), destination(), DestinationSource::Meeting)
            .await;

        assert_eq!(outcome.estimate.basis, EstimateBasis::StraightLine);
        assert_eq!(outcome.estimate.source, DestinationSource::Meeting);
        let expected = origin().distance_to(&destination());
        assert!((outcome.estimate.distance_m - expected).abs() < 1e-6);
        assert!((outcome.estimate.eta_s - expected / 1.4).abs() < 1e-6);
    }

    fn routed(source: DestinationSource, provider: RouteSource) -> EstimateOutcome {
        let route = FakeRouteProvider::sample_route(provider);
        EstimateOutcome {
            estimate: DistanceEstimate::from_route(&route, source),
            route: Some(route),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_quick_moves_are_rate_limited() {
        let mut state = EstimatorState::new(EstimatorSettings::default());
        let t0 = Instant::now();

        let job = state
            .begin(origin(), destination(), DestinationSource::Peer, t0)
            .expect("first trigger computes");
        assert_eq!(state.status(), RouteStatus::Computing);
        state.finish(&job, routed(DestinationSource::Peer, RouteSource::Primary), t0);

        // ~5 m north, 5 s later
        let nudged = Coordinate::new(origin().latitude + 0.000045, origin().longitude);
        let t1 = t0 + Duration::from_secs(5);
        assert!(state.begin(nudged, destination(), DestinationSource::Peer, t1).is_none());

        // Same nudge after the interval has passed
        let t2 = t0 + Duration::from_secs(21);
        assert!(state.begin(nudged, destination(), DestinationSource::Peer, t2).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_move_recomputes_immediately() {
        let mut state = EstimatorState::new(EstimatorSettings::default());
        let t0 = Instant::now();
        let job = state
            .begin(origin(), destination(), DestinationSource::Peer, t0)
            .unwrap();
        state.finish(&job, routed(DestinationSource::Peer, RouteSource::Primary), t0);

        let far = Coordinate::new(origin().latitude + 0.001, origin().longitude);
        assert!(state
            .begin(far, destination(), DestinationSource::Peer, t0 + Duration::from_secs(2))
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_job_suppresses_duplicates() {
        let mut state = EstimatorState::new(EstimatorSettings::default());
        let t0 = Instant::now();
        assert!(state
            .begin(origin(), destination(), DestinationSource::Peer, t0)
            .is_some());
        assert!(state
            .begin(origin(), destination(), DestinationSource::Peer, t0 + Duration::from_secs(1))
            .is_none());
        // Provisional straight-line numbers while waiting
        assert_eq!(state.estimate().unwrap().basis, EstimateBasis::StraightLine);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destination_source_change_retags_estimate() {
        let mut state = EstimatorState::new(EstimatorSettings::default());
        let t0 = Instant::now();
        let job = state
            .begin(origin(), destination(), DestinationSource::Peer, t0)
            .unwrap();
        state.finish(&job, routed(DestinationSource::Peer, RouteSource::Primary), t0);

        let meeting = Coordinate::new(6.5, 3.4);
        let job = state
            .begin(origin(), meeting, DestinationSource::Meeting, t0 + Duration::from_secs(1))
            .expect("new destination source bypasses the rate limit");
        assert_eq!(state.estimate().unwrap().source, DestinationSource::Meeting);

        state.finish(
            &job,
            routed(DestinationSource::Meeting, RouteSource::Secondary),
            t0 + Duration::from_secs(2),
        );
        assert_eq!(state.estimate().unwrap().source, DestinationSource::Meeting);
        assert_eq!(state.status(), RouteStatus::Routed(RouteSource::Secondary));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_providers_keep_previous_route() {
        let mut state = EstimatorState::new(EstimatorSettings::default());
        let t0 = Instant::now();
        let job = state
            .begin(origin(), destination(), DestinationSource::Peer, t0)
            .unwrap();
        state.finish(&job, routed(DestinationSource::Peer, RouteSource::Primary), t0);
        let previous = state.route().cloned();

        let later = t0 + Duration::from_secs(30);
        let job = state
            .begin(origin(), destination(), DestinationSource::Peer, later)
            .unwrap();
        let estimate_only = EstimateOutcome {
            route: None,
            estimate: DistanceEstimate::straight_line(
                &origin(),
                &destination(),
                1.4,
                DestinationSource::Peer,
            ),
        };
        assert!(state.finish(&job, estimate_only, later));

        assert_eq!(state.route().cloned(), previous);
        assert_eq!(state.estimate().unwrap().basis, EstimateBasis::StraightLine);
        assert_eq!(state.status(), RouteStatus::EstimateOnly);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_results_are_discarded() {
        let mut state = EstimatorState::new(EstimatorSettings::default());
        let t0 = Instant::now();
        let first = state
            .begin(origin(), destination(), DestinationSource::Peer, t0)
            .unwrap();
        let far = Coordinate::new(origin().latitude + 0.01, origin().longitude);
        let second = state
            .begin(far, destination(), DestinationSource::Peer, t0 + Duration::from_secs(1))
            .unwrap();

        assert!(state.finish(&second, routed(DestinationSource::Peer, RouteSource::Secondary), t0));
        assert!(!state.finish(&first, routed(DestinationSource::Peer, RouteSource::Primary), t0));
        assert_eq!(state.route().unwrap().provider, RouteSource::Secondary);
    }
}
