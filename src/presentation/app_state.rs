// Application state for HTTP handlers
use crate::application::live_tracker::LiveLocationTracker;
use crate::presentation::view::ProviderNames;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<LiveLocationTracker>,
    pub providers: ProviderNames,
}
