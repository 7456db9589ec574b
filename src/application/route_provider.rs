// Routing provider trait
use crate::application::errors::ProviderRouteError;
use crate::domain::coordinate::Coordinate;
use crate::domain::route::RouteResult;
use async_trait::async_trait;

#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Human-readable provider name for status lines
    fn name(&self) -> &'static str;

    /// Driving route from `origin` to `destination`
    async fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<RouteResult, ProviderRouteError>;
}
