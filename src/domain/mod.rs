// Domain layer - Value types for live tracking
pub mod coordinate;
pub mod polyline;
pub mod route;
pub mod tracking;
