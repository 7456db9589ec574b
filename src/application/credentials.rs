// Read-only access to persisted auth state
use crate::domain::tracking::UserId;

/// Persisted key/value auth state. Implementations must re-read on every
/// call so that refreshed tokens are picked up by reconnects.
pub trait CredentialStore: Send + Sync {
    fn bearer_token(&self) -> Option<String>;

    fn user_id(&self) -> Option<UserId>;
}
