// Application layer - Collaborator traits and tracking services
pub mod channel;
pub mod credentials;
pub mod errors;
pub mod estimator_service;
pub mod live_tracker;
pub mod position_service;
pub mod position_source;
pub mod route_provider;
pub mod tracking_api;
pub mod transport_service;
#[cfg(test)]
pub(crate) mod test_support;
