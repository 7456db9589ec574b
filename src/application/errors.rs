// Error taxonomy for the tracking services
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("location permission not granted")]
    PermissionDenied,
    #[error("position unavailable: {0}")]
    Unavailable(String),
    #[error("timed out waiting for a position fix")]
    Timeout,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel connect failed: {0}")]
    Connect(String),
    #[error("server does not offer the {0} transport")]
    TransportUnavailable(&'static str),
    #[error("invocation of {method} failed: {reason}")]
    Invocation { method: String, reason: String },
    #[error("channel protocol error: {0}")]
    Protocol(String),
    #[error("channel is closed")]
    Closed,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderRouteError {
    #[error("no API key provisioned")]
    MissingApiKey,
    #[error("provider returned status {0}")]
    Status(String),
    #[error("provider returned no routes")]
    NoRoutes,
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("could not decode route geometry: {0}")]
    Geometry(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RestCallError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server responded {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not parse response: {0}")]
    Decode(String),
}
