//! `rotate`: operator CLI for key rotation.
//!
//! Invocation sequence:
//! 1. Parse arguments and read `ROTATION_*` settings.
//! 2. Initialise structured JSON logging (stderr).
//! 3. Open the run's evidence file. Failure here is fatal.
//! 4. Validate configuration; rejections are written to evidence.
//! 5. Take the environment lock and run the action's phases.
//!
//! Exit code 0 on success, 1 otherwise. A one-line JSON summary goes to stdout.

mod command;
mod config;
mod controller;
mod error;
mod evidence;
mod health;
mod lock;
mod state;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use common::Environment;
use serde::Serialize;
use tracing::{error, info};

use command::ShellCommandRunner;
use config::{Action, Invocation, RotationConfig, RotationSettings};
use controller::RotationController;
use error::RotationError;
use evidence::EvidenceRecorder;
use health::ReqwestHealthProbe;

#[derive(Debug, Parser)]
#[command(name = "rotate", version, about = "Rotate the attested-decrypt key for one environment")]
struct Cli {
    /// Action to perform.
    #[arg(value_enum)]
    action: Action,

    /// Target environment (staging | production).
    #[arg(long = "env")]
    environment: Environment,

    /// Validate and log every step without running commands or probes.
    #[arg(long)]
    dry_run: bool,

    /// Directory for evidence files (and lock files unless ROTATION_LOCK_DIR is set).
    #[arg(long, default_value = "rotation-evidence")]
    evidence_dir: PathBuf,

    /// Required for mutating actions in production.
    #[arg(long)]
    confirm_production: bool,
}

impl Cli {
    fn invocation(&self) -> Invocation {
        Invocation {
            action: self.action,
            environment: self.environment,
            dry_run: self.dry_run,
            confirm_production: self.confirm_production,
            evidence_dir: self.evidence_dir.clone(),
        }
    }
}

/// Summary printed when a run is refused before it starts.
#[derive(Debug, Serialize)]
struct Rejection {
    action: Action,
    environment: Environment,
    status: &'static str,
    evidence_path: Option<PathBuf>,
    error: String,
    #[serde(skip)]
    source: RotationError,
}

impl Rejection {
    fn new(invocation: &Invocation, evidence_path: Option<PathBuf>, source: RotationError) -> Self {
        Self {
            action: invocation.action,
            environment: invocation.environment,
            status: "rejected",
            evidence_path,
            error: source.to_string(),
            source,
        }
    }
}

/// Open evidence, then validate configuration against the invocation.
fn prepare(
    invocation: Invocation,
    settings: anyhow::Result<RotationSettings>,
) -> Result<(EvidenceRecorder, RotationConfig), Rejection> {
    let evidence = EvidenceRecorder::open(
        &invocation.evidence_dir,
        invocation.environment,
        invocation.action,
        Utc::now(),
    )
    .map_err(|e| Rejection::new(&invocation, None, e))?;

    let validated = settings
        .map_err(|e| RotationError::configuration(format!("{e:#}")))
        .and_then(|s| RotationConfig::new(s, invocation.clone()));

    match validated {
        Ok(cfg) => Ok((evidence, cfg)),
        Err(e) => {
            evidence.error(&format!("configuration rejected: {e}"));
            Err(Rejection::new(&invocation, Some(evidence.path().to_path_buf()), e))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // -----------------------------------------------------------------------
    // 1. Arguments and settings
    // -----------------------------------------------------------------------
    let cli = Cli::parse();
    let settings = RotationSettings::from_env();

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    let log_level = settings
        .as_ref()
        .map(|s| s.log_level.clone())
        .unwrap_or_else(|_| "info".into());
    if let Err(e) = telemetry::init(&log_level) {
        eprintln!("WARN: {e}");
    }

    // -----------------------------------------------------------------------
    // 3–4. Evidence and configuration
    // -----------------------------------------------------------------------
    let (evidence, cfg) = match prepare(cli.invocation(), settings) {
        Ok(prepared) => prepared,
        Err(rejection) => {
            error!(error = %rejection.source, "rotation refused");
            eprintln!("ERROR: {}", rejection.error);
            println!(
                "{}",
                serde_json::to_string(&rejection).unwrap_or_else(|_| rejection.error.clone())
            );
            return ExitCode::FAILURE;
        }
    };
    info!(
        action = cfg.invocation.action.as_str(),
        environment = %cfg.invocation.environment,
        dry_run = cfg.invocation.dry_run,
        evidence = %evidence.path().display(),
        "rotation starting"
    );

    // -----------------------------------------------------------------------
    // 5. Run
    // -----------------------------------------------------------------------
    let probe = match ReqwestHealthProbe::new(cfg.health_timeout) {
        Ok(probe) => probe,
        Err(e) => {
            let msg = format!("cannot build health probe client: {e}");
            evidence.error(&msg);
            eprintln!("ERROR: {msg}");
            return ExitCode::FAILURE;
        }
    };
    let controller = RotationController::new(cfg, Arc::new(ShellCommandRunner), Arc::new(probe));
    let run = controller.run(&evidence).await;

    println!("{}", run.summary());
    match &run.error {
        None => ExitCode::SUCCESS,
        Some(e) => {
            match e.phase() {
                Some(phase) => eprintln!("ERROR: phase {phase} failed: {e}"),
                None => eprintln!("ERROR: {e}"),
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::settings;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("rotate").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn parses_full_command_line() {
        let c = cli(&[
            "all",
            "--env",
            "production",
            "--dry-run",
            "--evidence-dir",
            "/tmp/ev",
            "--confirm-production",
        ]);
        assert_eq!(c.action, Action::All);
        assert_eq!(c.environment, Environment::Production);
        assert!(c.dry_run && c.confirm_production);
        assert_eq!(c.evidence_dir, PathBuf::from("/tmp/ev"));
    }

    #[test]
    fn evidence_dir_has_a_default() {
        let c = cli(&["preflight", "--env", "staging"]);
        assert_eq!(c.evidence_dir, PathBuf::from("rotation-evidence"));
        assert!(!c.dry_run);
    }

    #[test]
    fn rejects_unknown_action_and_environment() {
        assert!(Cli::try_parse_from(["rotate", "promote", "--env", "staging"]).is_err());
        assert!(Cli::try_parse_from(["rotate", "stage", "--env", "qa"]).is_err());
        assert!(Cli::try_parse_from(["rotate", "stage"]).is_err());
    }

    #[test]
    fn production_without_confirmation_logs_only_the_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let c = cli(&[
            "stage",
            "--env",
            "production",
            "--evidence-dir",
            dir.path().to_str().unwrap(),
        ]);
        let rejection = prepare(c.invocation(), Ok(settings())).unwrap_err();
        assert!(matches!(rejection.source, RotationError::Configuration(_)));

        let path = rejection.evidence_path.expect("evidence opened before validation");
        let log = std::fs::read_to_string(path).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains("ERROR configuration rejected"));
        assert!(log.contains("--confirm-production"));
        // No lock was taken.
        assert!(!dir.path().join("rotation-production.lock").exists());
    }

    #[test]
    fn unreadable_settings_are_a_logged_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let c = cli(&["preflight", "--env", "staging", "--evidence-dir", dir.path().to_str().unwrap()]);
        let rejection = prepare(c.invocation(), Err(anyhow::anyhow!("bad ROTATION_ACTIVE_VERSION")))
            .unwrap_err();
        assert!(rejection.error.contains("bad ROTATION_ACTIVE_VERSION"));
        assert!(rejection.evidence_path.is_some());
    }

    #[test]
    fn evidence_failure_is_fatal_before_validation() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let c = cli(&["stage", "--env", "staging", "--evidence-dir", blocker.to_str().unwrap()]);
        let rejection = prepare(c.invocation(), Ok(settings())).unwrap_err();
        assert!(matches!(rejection.source, RotationError::Evidence(_)));
        assert!(rejection.evidence_path.is_none());
    }

    #[tokio::test]
    async fn dry_run_end_to_end_with_shell_runner() {
        let dir = tempfile::tempdir().unwrap();
        let c = cli(&[
            "all",
            "--env",
            "staging",
            "--dry-run",
            "--evidence-dir",
            dir.path().to_str().unwrap(),
        ]);
        let mut s = settings();
        // Would fail if actually executed.
        s.stage_cmd = Some("exit 1".into());
        let (evidence, cfg) = prepare(c.invocation(), Ok(s)).unwrap();
        let probe = ReqwestHealthProbe::new(cfg.health_timeout).unwrap();
        let run = RotationController::new(cfg, Arc::new(ShellCommandRunner), Arc::new(probe))
            .run(&evidence)
            .await;
        assert!(run.succeeded());
        let log = std::fs::read_to_string(evidence.path()).unwrap();
        assert!(log.contains("DRY-RUN stage: would run `exit 1`"));
    }
}
