// Presentation layer - HTTP surface over the tracking session
pub mod app_state;
pub mod handlers;
pub mod view;
