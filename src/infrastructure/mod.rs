// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod credential_store;
pub mod google_directions;
pub mod hub;
pub mod osrm;
pub mod position;
pub mod tracking_rest;
