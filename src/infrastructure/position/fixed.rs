use crate::application::errors::PositionError;
use crate::application::position_source::PositionSource;
use crate::domain::coordinate::Coordinate;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

/// A stationary device at a configured coordinate.
///
/// The watch stream yields the coordinate once and then stays open, so
/// the sampler's liveness timer drives periodic reports.
#[derive(Debug, Clone, Copy)]
pub struct FixedPosition {
    coordinate: Coordinate,
}

impl FixedPosition {
    pub fn new(coordinate: Coordinate) -> Self {
        Self { coordinate }
    }
}

#[async_trait]
impl PositionSource for FixedPosition {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn request_permission(&self) -> Result<(), PositionError> {
        Ok(())
    }

    async fn current_fix(&self) -> Result<Coordinate, PositionError> {
        Ok(self.coordinate)
    }

    fn watch(&self) -> BoxStream<'static, Result<Coordinate, PositionError>> {
        stream::once(futures::future::ready(Ok(self.coordinate)))
            .chain(stream::pending())
            .boxed()
    }
}

/// The user declined location access.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeniedPosition;

#[async_trait]
impl PositionSource for DeniedPosition {
    fn name(&self) -> &'static str {
        "denied"
    }

    async fn request_permission(&self) -> Result<(), PositionError> {
        Err(PositionError::PermissionDenied)
    }

    async fn current_fix(&self) -> Result<Coordinate, PositionError> {
        Err(PositionError::PermissionDenied)
    }

    fn watch(&self) -> BoxStream<'static, Result<Coordinate, PositionError>> {
        stream::iter([Err(PositionError::PermissionDenied)]).boxed()
    }
}

/// No position hardware or fallback is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailablePosition;

const NO_PROVIDER: &str = "no position provider";

#[async_trait]
impl PositionSource for UnavailablePosition {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn request_permission(&self) -> Result<(), PositionError> {
        Err(PositionError::Unavailable(NO_PROVIDER.to_string()))
    }

    async fn current_fix(&self) -> Result<Coordinate, PositionError> {
        Err(PositionError::Unavailable(NO_PROVIDER.to_string()))
    }

    fn watch(&self) -> BoxStream<'static, Result<Coordinate, PositionError>> {
        stream::iter([Err(PositionError::Unavailable(NO_PROVIDER.to_string()))]).boxed()
    }
}
