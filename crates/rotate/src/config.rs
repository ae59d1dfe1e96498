//! Configuration loading and validation for the rotation CLI.
//!
//! Raw settings come from `ROTATION_*` environment variables. They are checked
//! once, together with the command-line invocation, into an immutable
//! [`RotationConfig`]; nothing downstream re-reads the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use common::Environment;
use serde::{Deserialize, Serialize};

use crate::error::RotationError;
use crate::state::Phase;

/// Operator action requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Preflight,
    Stage,
    Validate,
    Rollback,
    All,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Preflight => "preflight",
            Action::Stage => "stage",
            Action::Validate => "validate",
            Action::Rollback => "rollback",
            Action::All => "all",
        }
    }

    /// Phases executed for this action, in order.
    pub fn phases(&self) -> &'static [Phase] {
        match self {
            Action::Preflight => &[Phase::Preflight],
            Action::Stage => &[Phase::Preflight, Phase::Stage],
            Action::Validate => &[Phase::Validate],
            Action::Rollback => &[Phase::Rollback],
            Action::All => &[Phase::Preflight, Phase::Stage, Phase::Validate],
        }
    }

    /// Whether the action may change deployed state and so needs
    /// `--confirm-production` in production.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Action::Preflight)
    }

    fn stages(&self) -> bool {
        self.phases().contains(&Phase::Stage)
    }
}

/// What the operator asked for on the command line.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub action: Action,
    pub environment: Environment,
    pub dry_run: bool,
    pub confirm_production: bool,
    pub evidence_dir: PathBuf,
}

/// Raw `ROTATION_*` environment settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RotationSettings {
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub active_version: Option<u32>,
    #[serde(default)]
    pub next_version: Option<u32>,
    /// Comma-separated measurement allowlist.
    #[serde(default)]
    pub allowed_measurements: Option<String>,

    #[serde(default)]
    pub preflight_cmd: Option<String>,
    #[serde(default)]
    pub stage_cmd: Option<String>,
    #[serde(default)]
    pub validate_cmd: Option<String>,
    #[serde(default)]
    pub rollback_cmd: Option<String>,

    #[serde(default)]
    pub api_health_url: Option<String>,
    #[serde(default)]
    pub enclave_health_url: Option<String>,
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,

    /// Directory holding per-environment lock files. Defaults to the evidence directory.
    #[serde(default)]
    pub lock_dir: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_health_timeout() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".into()
}

impl RotationSettings {
    /// Load settings from `ROTATION_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed into its field type.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::with_prefix("ROTATION"))
            .build()
            .context("failed to build rotation configuration from environment")?;

        cfg.try_deserialize()
            .context("failed to deserialise rotation configuration")
    }
}

/// Shell commands per phase. `None` only when not required (or dry-run).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseCommands {
    pub preflight: Option<String>,
    pub stage: Option<String>,
    pub validate: Option<String>,
    pub rollback: Option<String>,
}

impl PhaseCommands {
    pub fn for_phase(&self, phase: Phase) -> Option<&str> {
        match phase {
            Phase::Preflight => self.preflight.as_deref(),
            Phase::Stage => self.stage.as_deref(),
            Phase::Validate => self.validate.as_deref(),
            Phase::Rollback => self.rollback.as_deref(),
        }
    }
}

/// A liveness endpoint probed after preflight, validate and rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthTarget {
    pub label: &'static str,
    pub url: String,
}

/// Validated, immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub invocation: Invocation,
    pub key_id: String,
    pub active_version: u32,
    pub next_version: Option<u32>,
    pub allowed_measurements: Vec<String>,
    pub commands: PhaseCommands,
    pub health_targets: Vec<HealthTarget>,
    pub health_timeout: Duration,
    pub lock_dir: PathBuf,
}

impl RotationConfig {
    /// Check `settings` against `invocation`, returning the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError::Configuration`] when the production guard is
    /// not satisfied, a required setting is missing, `next_version` equals
    /// `active_version`, or a phase command is missing outside dry-run.
    pub fn new(settings: RotationSettings, invocation: Invocation) -> Result<Self, RotationError> {
        let action = invocation.action;

        if invocation.environment.is_production()
            && action.is_mutating()
            && !invocation.confirm_production
        {
            return Err(RotationError::configuration(format!(
                "{} in production requires --confirm-production",
                action.as_str()
            )));
        }

        let key_id = non_blank(settings.key_id)
            .ok_or_else(|| RotationError::configuration("ROTATION_KEY_ID is required"))?;
        let active_version = match settings.active_version {
            Some(0) | None => {
                return Err(RotationError::configuration(
                    "ROTATION_ACTIVE_VERSION is required and must be > 0",
                ))
            }
            Some(v) => v,
        };
        let allowed_measurements = parse_csv(settings.allowed_measurements.as_deref());
        if allowed_measurements.is_empty() {
            return Err(RotationError::configuration(
                "ROTATION_ALLOWED_MEASUREMENTS must list at least one measurement",
            ));
        }

        let next_version = settings.next_version;
        if action.stages() {
            match next_version {
                None => {
                    return Err(RotationError::configuration(format!(
                        "ROTATION_NEXT_VERSION is required for {}",
                        action.as_str()
                    )))
                }
                Some(next) if next == active_version => {
                    return Err(RotationError::configuration(format!(
                        "ROTATION_NEXT_VERSION ({next}) must differ from ROTATION_ACTIVE_VERSION"
                    )))
                }
                Some(0) => {
                    return Err(RotationError::configuration("ROTATION_NEXT_VERSION must be > 0"))
                }
                Some(_) => {}
            }
        }

        let commands = PhaseCommands {
            preflight: non_blank(settings.preflight_cmd),
            stage: non_blank(settings.stage_cmd),
            validate: non_blank(settings.validate_cmd),
            rollback: non_blank(settings.rollback_cmd),
        };
        if !invocation.dry_run {
            for phase in action.phases() {
                let required = !matches!(phase, Phase::Preflight);
                if required && commands.for_phase(*phase).is_none() {
                    return Err(RotationError::configuration(format!(
                        "ROTATION_{}_CMD is required for {} (or pass --dry-run)",
                        phase.as_str().to_ascii_uppercase(),
                        action.as_str()
                    )));
                }
            }
        }

        let mut health_targets = Vec::new();
        if let Some(url) = non_blank(settings.api_health_url) {
            health_targets.push(HealthTarget { label: "api", url });
        }
        if let Some(url) = non_blank(settings.enclave_health_url) {
            health_targets.push(HealthTarget {
                label: "enclave",
                url,
            });
        }
        if settings.health_timeout_secs == 0 {
            return Err(RotationError::configuration(
                "ROTATION_HEALTH_TIMEOUT_SECS must be > 0",
            ));
        }

        let lock_dir = non_blank(settings.lock_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| invocation.evidence_dir.clone());

        Ok(Self {
            invocation,
            key_id,
            active_version,
            next_version,
            allowed_measurements,
            commands,
            health_targets,
            health_timeout: Duration::from_secs(settings.health_timeout_secs),
            lock_dir,
        })
    }

    /// Variables exported to every phase command.
    pub fn command_env(&self) -> Vec<(String, String)> {
        vec![
            ("ROTATION_ENV".into(), self.invocation.environment.to_string()),
            ("ROTATION_KEY_ID".into(), self.key_id.clone()),
            ("ROTATION_ACTIVE_VERSION".into(), self.active_version.to_string()),
            (
                "ROTATION_NEXT_VERSION".into(),
                self.next_version.map(|v| v.to_string()).unwrap_or_default(),
            ),
            ("ROTATION_DRY_RUN".into(), self.invocation.dry_run.to_string()),
        ]
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn parse_csv(raw: Option<&str>) -> Vec<String> {
    let mut items: Vec<String> = raw
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_owned)
        .collect();
    items.sort();
    items.dedup();
    items
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn settings() -> RotationSettings {
        RotationSettings {
            key_id: Some("connector-tokens".into()),
            active_version: Some(1),
            next_version: Some(2),
            allowed_measurements: Some("pcr0-aaaa, pcr0-bbbb".into()),
            preflight_cmd: Some("echo preflight".into()),
            stage_cmd: Some("echo stage".into()),
            validate_cmd: Some("echo validate".into()),
            rollback_cmd: Some("echo rollback".into()),
            api_health_url: None,
            enclave_health_url: None,
            health_timeout_secs: 10,
            lock_dir: None,
            log_level: "info".into(),
        }
    }

    pub(crate) fn invocation(action: Action, environment: Environment) -> Invocation {
        Invocation {
            action,
            environment,
            dry_run: false,
            confirm_production: false,
            evidence_dir: PathBuf::from("rotation-evidence"),
        }
    }

    #[test]
    fn defaults() {
        assert_eq!(default_health_timeout(), 10);
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn accepts_complete_staging_config() {
        let cfg = RotationConfig::new(settings(), invocation(Action::All, Environment::Staging))
            .unwrap();
        assert_eq!(cfg.allowed_measurements, vec!["pcr0-aaaa", "pcr0-bbbb"]);
        assert_eq!(cfg.lock_dir, PathBuf::from("rotation-evidence"));
        assert_eq!(cfg.health_timeout, Duration::from_secs(10));
    }

    #[test]
    fn next_equal_to_active_is_a_configuration_error() {
        let mut s = settings();
        s.next_version = Some(1);
        for action in [Action::Stage, Action::All] {
            let err = RotationConfig::new(s.clone(), invocation(action, Environment::Staging))
                .unwrap_err();
            assert!(matches!(err, RotationError::Configuration(ref m) if m.contains("must differ")));
        }
        // Validate and rollback do not stage, so the versions are not compared.
        assert!(RotationConfig::new(s, invocation(Action::Validate, Environment::Staging)).is_ok());
    }

    #[test]
    fn production_guard_applies_to_mutating_actions_only() {
        for action in [Action::Stage, Action::Validate, Action::Rollback, Action::All] {
            let err = RotationConfig::new(settings(), invocation(action, Environment::Production))
                .unwrap_err();
            assert!(
                matches!(err, RotationError::Configuration(ref m) if m.contains("--confirm-production")),
                "{action:?}"
            );
        }
        assert!(RotationConfig::new(
            settings(),
            invocation(Action::Preflight, Environment::Production)
        )
        .is_ok());

        let mut confirmed = invocation(Action::All, Environment::Production);
        confirmed.confirm_production = true;
        assert!(RotationConfig::new(settings(), confirmed).is_ok());
    }

    #[test]
    fn production_guard_is_checked_even_in_dry_run() {
        let mut inv = invocation(Action::Stage, Environment::Production);
        inv.dry_run = true;
        assert!(RotationConfig::new(settings(), inv).is_err());
    }

    #[test]
    fn missing_commands_rejected_unless_dry_run() {
        let mut s = settings();
        s.stage_cmd = Some("   ".into());
        let err = RotationConfig::new(s.clone(), invocation(Action::Stage, Environment::Staging))
            .unwrap_err();
        assert!(matches!(err, RotationError::Configuration(ref m) if m.contains("ROTATION_STAGE_CMD")));

        let mut dry = invocation(Action::Stage, Environment::Staging);
        dry.dry_run = true;
        let cfg = RotationConfig::new(s, dry).unwrap();
        assert_eq!(cfg.commands.stage, None);
    }

    #[test]
    fn preflight_command_is_optional() {
        let mut s = settings();
        s.preflight_cmd = None;
        assert!(RotationConfig::new(s, invocation(Action::Stage, Environment::Staging)).is_ok());
    }

    #[test]
    fn required_identity_settings() {
        let mut s = settings();
        s.key_id = None;
        assert!(RotationConfig::new(s, invocation(Action::Preflight, Environment::Staging)).is_err());

        let mut s = settings();
        s.active_version = Some(0);
        assert!(RotationConfig::new(s, invocation(Action::Preflight, Environment::Staging)).is_err());

        let mut s = settings();
        s.allowed_measurements = Some(" , ".into());
        assert!(RotationConfig::new(s, invocation(Action::Preflight, Environment::Staging)).is_err());

        let mut s = settings();
        s.next_version = None;
        assert!(RotationConfig::new(s, invocation(Action::Stage, Environment::Staging)).is_err());
    }

    #[test]
    fn health_targets_and_lock_dir_override() {
        let mut s = settings();
        s.api_health_url = Some("http://api/health".into());
        s.enclave_health_url = Some("http://enclave/health".into());
        s.lock_dir = Some("/var/lock/rotation".into());
        let cfg = RotationConfig::new(s, invocation(Action::Preflight, Environment::Staging)).unwrap();
        assert_eq!(cfg.health_targets.len(), 2);
        assert_eq!(cfg.health_targets[1].label, "enclave");
        assert_eq!(cfg.lock_dir, PathBuf::from("/var/lock/rotation"));
    }

    #[test]
    fn command_env_exports_run_identity() {
        let cfg = RotationConfig::new(settings(), invocation(Action::All, Environment::Staging))
            .unwrap();
        let env = cfg.command_env();
        assert!(env.contains(&("ROTATION_ENV".into(), "staging".into())));
        assert!(env.contains(&("ROTATION_NEXT_VERSION".into(), "2".into())));
        assert!(env.contains(&("ROTATION_DRY_RUN".into(), "false".into())));
    }
}
