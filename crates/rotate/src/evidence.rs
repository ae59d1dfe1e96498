//! Append-only evidence log, one file per run.
//!
//! Every line is `<RFC 3339 UTC> <LEVEL> <message>` and is synced to disk
//! before [`EvidenceRecorder::record`] returns, so an interrupted run leaves a
//! truthful prefix of what happened.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use common::Environment;
use tracing::warn;

use crate::config::Action;
use crate::error::RotationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

/// Deterministic evidence file name for a run.
pub fn file_name(environment: Environment, action: Action, started_at: DateTime<Utc>) -> String {
    format!(
        "rotation-{}-{}-{}.log",
        environment,
        action.as_str(),
        started_at.format("%Y%m%dT%H%M%SZ")
    )
}

const MAX_NAME_ATTEMPTS: u32 = 1_000;

#[derive(Debug)]
pub struct EvidenceRecorder {
    path: PathBuf,
    file: Mutex<File>,
}

impl EvidenceRecorder {
    /// Create `dir` if needed and create a fresh evidence file for this run.
    ///
    /// The file is always new: if another run already owns the name for the
    /// same second, a `-2`, `-3`, ... suffix is added before `.log`.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError::Evidence`] if the directory or file cannot be
    /// created. Callers treat this as fatal.
    pub fn open(
        dir: &Path,
        environment: Environment,
        action: Action,
        started_at: DateTime<Utc>,
    ) -> Result<Self, RotationError> {
        fs::create_dir_all(dir).map_err(|e| {
            RotationError::Evidence(format!("cannot create {}: {e}", dir.display()))
        })?;
        let base = file_name(environment, action, started_at);

        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let path = match attempt {
                1 => dir.join(&base),
                n => dir.join(format!("{}-{n}.log", base.trim_end_matches(".log"))),
            };
            match OpenOptions::new().append(true).create_new(true).open(&path) {
                Ok(file) => {
                    return Ok(Self {
                        path,
                        file: Mutex::new(file),
                    })
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(RotationError::Evidence(format!(
                        "cannot create {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        Err(RotationError::Evidence(format!(
            "no free evidence file name for {base} in {}",
            dir.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line and sync it. A write failure is reported through
    /// tracing and does not fail the run.
    pub fn record(&self, level: Level, message: &str) {
        let line = format!(
            "{} {} {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level.as_str(),
            message
        );
        let result = match self.file.lock() {
            Ok(mut file) => file
                .write_all(line.as_bytes())
                .and_then(|()| file.sync_data()),
            Err(_) => Err(std::io::Error::other("evidence file lock poisoned")),
        };
        if let Err(e) = result {
            warn!(error = %e, path = %self.path.display(), "failed to write evidence line");
        }
    }

    pub fn info(&self, message: &str) {
        self.record(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.record(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.record(Level::Error, message);
    }
}
