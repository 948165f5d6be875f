//! # Credential Store
//!
//! Persistence for the session credential blob (a cookie storage state).
//!
//! ```text
//! ┌──────────────────┐   load / save   ┌──────────────────────────────┐
//! │  SessionManager  │ ◄─────────────► │  CredentialStore             │
//! └──────────────────┘                 │   FileCredentialStore        │
//! ┌──────────────────┐   save          │   (session.json, atomic)     │
//! │  status server   │ ──────────────► │                              │
//! └──────────────────┘                 └──────────────────────────────┘
//! ```
//!
//! The blob stays opaque to everything except expiry inspection and the
//! HTTP transport's cookie jar.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use screentime_core::StorageState;

use crate::error::{BridgeError, BridgeResult};

/// Read/write contract for the persisted credential.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the stored credential, or `None` if nothing is stored.
    async fn load(&self) -> BridgeResult<Option<StorageState>>;

    /// Replaces the stored credential.
    async fn save(&self, state: &StorageState) -> BridgeResult<()>;

    /// Human-readable location for log lines.
    fn describe(&self) -> String;
}

/// Parses and sanity-checks an uploaded credential blob.
pub fn parse_credential(raw: &[u8]) -> BridgeResult<StorageState> {
    let state: StorageState = serde_json::from_slice(raw)
        .map_err(|e| BridgeError::InvalidCredential(e.to_string()))?;
    if state.is_empty() {
        return Err(BridgeError::InvalidCredential("no cookies in blob".into()));
    }
    Ok(state)
}

// =============================================================================
// File Store
// =============================================================================

/// JSON file store. Writes go to a sibling temp file and are renamed into
/// place so a crash never leaves a truncated blob.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileCredentialStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> BridgeResult<Option<StorageState>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "No stored credential");
                return Ok(None);
            }
            Err(e) => return Err(BridgeError::CredentialStore(e.to_string())),
        };

        let state: StorageState = serde_json::from_slice(&bytes)
            .map_err(|e| BridgeError::InvalidCredential(e.to_string()))?;
        Ok(Some(state))
    }

    async fn save(&self, state: &StorageState) -> BridgeResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| BridgeError::CredentialStore(e.to_string()))?;

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        info!(path = ?self.path, cookies = state.cookies.len(), "Credential saved");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screentime_core::Cookie;

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("session.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested").join("session.json"));

        let state = StorageState::new(vec![Cookie::new("ft-session", "abc")]);
        store.save(&state).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(state));
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = FileCredentialStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidCredential(_)));
    }

    #[test]
    fn test_parse_credential() {
        assert!(parse_credential(br#"{"cookies":[{"name":"a","value":"b"}],"origins":[]}"#).is_ok());
        assert!(parse_credential(br#"{"cookies":[]}"#).is_err());
        assert!(parse_credential(b"[]").is_err());
    }
}
