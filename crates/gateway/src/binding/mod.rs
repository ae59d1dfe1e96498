//! Key binding: the active `(key_id, version)` pair and the check against it.
//!
//! # Lifecycle
//!
//! 1. At startup the binding is seeded from `KMS_KEY_ID` / `KEY_VERSION`.
//! 2. If `KEY_BINDING_PATH` is set, [`refresh_task`] re-reads the binding file
//!    on an interval and swaps the whole value into the [`KeyBindingStore`].
//!    The rotation stage command is what rewrites that file.
//! 3. Every decrypt takes one snapshot and runs [`check`] against it.

pub mod store;

pub use store::KeyBindingStore;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time;
use tracing::{info, warn};

/// The currently active key identifier and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBinding {
    pub key_id: String,
    pub active_version: u32,
}

impl KeyBinding {
    pub fn new(key_id: impl Into<String>, active_version: u32) -> Self {
        Self {
            key_id: key_id.into(),
            active_version,
        }
    }

    fn validate(&self) -> Result<(), BindingError> {
        if self.key_id.trim().is_empty() {
            return Err(BindingError::EmptyKeyId);
        }
        if self.active_version == 0 {
            return Err(BindingError::ZeroVersion);
        }
        Ok(())
    }
}

/// A binding value that must never be installed.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("key id must not be empty")]
    EmptyKeyId,
    #[error("key version must be > 0")]
    ZeroVersion,
}

/// A request does not match the active binding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyBindingError {
    /// Key id or version differ from the active binding. There is no
    /// fallback to older versions.
    #[error(
        "key binding mismatch: requested {requested_key_id}#{requested_version}, \
         active {active_key_id}#{active_version}"
    )]
    VersionMismatch {
        requested_key_id: String,
        requested_version: u32,
        active_key_id: String,
        active_version: u32,
    },
}

/// Require exact equality of the requested key id and version with `binding`.
///
/// # Errors
///
/// Returns [`KeyBindingError::VersionMismatch`] on any difference.
pub fn check(
    requested_key_id: &str,
    requested_version: u32,
    binding: &KeyBinding,
) -> Result<(), KeyBindingError> {
    if requested_key_id == binding.key_id && requested_version == binding.active_version {
        return Ok(());
    }
    Err(KeyBindingError::VersionMismatch {
        requested_key_id: requested_key_id.to_owned(),
        requested_version,
        active_key_id: binding.key_id.clone(),
        active_version: binding.active_version,
    })
}

/// Read a binding file (`{"key_id": ..., "active_version": ...}`).
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or holds an invalid binding.
pub async fn load_from_file(path: &Path) -> Result<KeyBinding> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read key binding file {}", path.display()))?;
    let binding: KeyBinding = serde_json::from_slice(&raw)
        .with_context(|| format!("malformed key binding file {}", path.display()))?;
    binding.validate()?;
    Ok(binding)
}

/// Spawn a background task that periodically reloads the binding file.
///
/// On failure the previous binding is retained and a warning is emitted.
pub fn refresh_task(
    path: PathBuf,
    interval: std::time::Duration,
    store: KeyBindingStore,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            match refresh_once(&path, &store).await {
                Ok(true) => {
                    let b = store.current();
                    info!(key_id = %b.key_id, key_version = b.active_version, "key binding updated");
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, "key binding refresh failed; retaining previous binding"),
            }
        }
    })
}

/// Reload once; returns whether the binding changed.
async fn refresh_once(path: &Path, store: &KeyBindingStore) -> Result<bool> {
    let next = load_from_file(path).await?;
    if *store.current() == next {
        return Ok(false);
    }
    store.replace(next)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_passes() {
        assert!(check("connector-tokens", 3, &KeyBinding::new("connector-tokens", 3)).is_ok());
    }

    #[test]
    fn any_version_difference_is_mismatch() {
        let binding = KeyBinding::new("k", 5);
        for requested in [0u32, 1, 4, 6, u32::MAX] {
            assert!(matches!(
                check("k", requested, &binding),
                Err(KeyBindingError::VersionMismatch { active_version: 5, .. })
            ));
        }
    }

    #[test]
    fn key_id_difference_is_mismatch() {
        let err = check("other", 5, &KeyBinding::new("k", 5)).unwrap_err();
        assert!(err.to_string().contains("other#5"));
    }

    #[tokio::test]
    async fn load_from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"{"key_id":"k","active_version":2}"#).unwrap();
        assert_eq!(load_from_file(&good).await.unwrap(), KeyBinding::new("k", 2));

        let zero = dir.path().join("zero.json");
        std::fs::write(&zero, r#"{"key_id":"k","active_version":0}"#).unwrap();
        assert!(load_from_file(&zero).await.is_err());

        assert!(load_from_file(&dir.path().join("missing.json")).await.is_err());
    }

    #[tokio::test]
    async fn refresh_once_swaps_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binding.json");
        std::fs::write(&path, r#"{"key_id":"k","active_version":1}"#).unwrap();
        let store = KeyBindingStore::new(KeyBinding::new("k", 1));

        assert!(!refresh_once(&path, &store).await.unwrap());

        std::fs::write(&path, r#"{"key_id":"k","active_version":2}"#).unwrap();
        assert!(refresh_once(&path, &store).await.unwrap());
        assert_eq!(store.current().active_version, 2);
    }

    #[tokio::test]
    async fn refresh_failure_keeps_previous_binding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binding.json");
        std::fs::write(&path, "garbage").unwrap();
        let store = KeyBindingStore::new(KeyBinding::new("k", 1));
        assert!(refresh_once(&path, &store).await.is_err());
        assert_eq!(*store.current(), KeyBinding::new("k", 1));
    }
}
