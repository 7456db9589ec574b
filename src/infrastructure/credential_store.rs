// File-backed credential store
use crate::application::credentials::CredentialStore;
use crate::domain::tracking::UserId;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredAuth {
    #[serde(default, alias = "authToken")]
    token: Option<String>,
    #[serde(default)]
    user_id: Option<UserId>,
}

/// Reads `{ "token": ..., "userId": ... }` from a JSON file on every access.
/// A missing or unreadable file means "not signed in".
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> StoredAuth {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!("No credentials at {}: {}", self.path.display(), e);
                return StoredAuth::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed credentials file {}: {}", self.path.display(), e);
            StoredAuth::default()
        })
    }
}

impl CredentialStore for FileCredentialStore {
    fn bearer_token(&self) -> Option<String> {
        self.read().token.filter(|t| !t.is_empty())
    }

    fn user_id(&self) -> Option<UserId> {
        self.read().user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("rental-tracker-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_reads_token_and_user() {
        let path = temp_file("auth.json", r#"{"authToken": "abc", "userId": 12}"#);
        let store = FileCredentialStore::new(&path);
        assert_eq!(store.bearer_token().as_deref(), Some("abc"));
        assert_eq!(store.user_id(), Some(UserId::new("12")));

        // Re-read on each access
        std::fs::write(&path, r#"{"token": "def"}"#).unwrap();
        assert_eq!(store.bearer_token().as_deref(), Some("def"));
        assert_eq!(store.user_id(), None);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_missing_or_malformed_file() {
        let store = FileCredentialStore::new("/nonexistent/rental-tracker/auth.json");
        assert!(store.bearer_token().is_none());

        let path = temp_file("broken.json", "{not json");
        assert!(FileCredentialStore::new(&path).user_id().is_none());
        let _ = std::fs::remove_file(path);
    }
}
