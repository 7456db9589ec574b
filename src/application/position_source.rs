// Position source trait
use crate::application::errors::PositionError;
use crate::domain::coordinate::Coordinate;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Platform capability that yields device coordinates.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Short name for logs ("gpsd", "fixed", ...)
    fn name(&self) -> &'static str;

    /// Ask for (or verify) permission to read the device position
    async fn request_permission(&self) -> Result<(), PositionError>;

    /// One high-accuracy fix
    async fn current_fix(&self) -> Result<Coordinate, PositionError>;

    /// Continuous stream of raw fixes. Dropping the stream ends the
    /// underlying subscription.
    fn watch(&self) -> BoxStream<'static, Result<Coordinate, PositionError>>;
}
