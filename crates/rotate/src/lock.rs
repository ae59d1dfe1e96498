//! Single-writer-per-environment run lock.
//!
//! The lock is a file created with `O_EXCL` semantics. It is removed when the
//! [`RunLock`] is dropped; a crashed process leaves it behind and an operator
//! must remove it after investigating.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use common::Environment;
use tracing::warn;
use uuid::Uuid;

use crate::error::RotationError;

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock for `environment` in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError::Concurrency`] if another run holds it, or
    /// [`RotationError::Evidence`] if the lock file cannot be written.
    pub fn acquire(dir: &Path, environment: Environment, run_id: Uuid) -> Result<Self, RotationError> {
        fs::create_dir_all(dir).map_err(|e| {
            RotationError::Evidence(format!("cannot create lock dir {}: {e}", dir.display()))
        })?;
        let path = dir.join(format!("rotation-{environment}.lock"));

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .map(|s| s.trim().to_owned())
                    .unwrap_or_else(|_| "unknown".into());
                return Err(RotationError::Concurrency {
                    environment,
                    holder,
                });
            }
            Err(e) => {
                return Err(RotationError::Evidence(format!(
                    "cannot create lock {}: {e}",
                    path.display()
                )))
            }
        };

        // Remove the lock if we cannot record the holder.
        let lock = Self { path };
        writeln!(file, "run_id={run_id} pid={}", std::process::id())
            .and_then(|()| file.sync_data())
            .map_err(|e| RotationError::Evidence(format!("cannot write lock: {e}")))?;
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(error = %e, path = %self.path.display(), "failed to remove rotation lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let first_id = Uuid::new_v4();
        let first = RunLock::acquire(dir.path(), Environment::Production, first_id).unwrap();

        let err = RunLock::acquire(dir.path(), Environment::Production, Uuid::new_v4()).unwrap_err();
        match err {
            RotationError::Concurrency {
                environment,
                holder,
            } => {
                assert_eq!(environment, Environment::Production);
                assert!(holder.contains(&first_id.to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }

        drop(first);
        assert!(RunLock::acquire(dir.path(), Environment::Production, Uuid::new_v4()).is_ok());
    }

    #[test]
    fn environments_lock_independently() {
        let dir = tempfile::tempdir().unwrap();
        let _prod = RunLock::acquire(dir.path(), Environment::Production, Uuid::new_v4()).unwrap();
        let staging = RunLock::acquire(dir.path(), Environment::Staging, Uuid::new_v4()).unwrap();
        assert!(staging.path().ends_with("rotation-staging.lock"));
    }

    #[test]
    fn leftover_lock_blocks_new_runs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rotation-staging.lock"), "run_id=crashed pid=1\n").unwrap();
        let err = RunLock::acquire(dir.path(), Environment::Staging, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, RotationError::Concurrency { .. }));
    }
}
