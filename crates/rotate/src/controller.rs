//! [`RotationController`]: drives one rotation run through its phases.
//!
//! A run takes the environment lock, walks the action's phases in order and
//! stops at the first failure. Every step is written to evidence before the
//! controller moves on. There is no implicit rollback.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::Environment;
use serde::{Serialize, Serializer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::command::CommandRunner;
use crate::config::{Action, RotationConfig};
use crate::error::RotationError;
use crate::evidence::EvidenceRecorder;
use crate::health::HealthProbe;
use crate::lock::RunLock;
use crate::state::{transition, Event, Phase, RunState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Record of one invocation. Terminal once `status` leaves `Running`.
#[derive(Debug, Clone, Serialize)]
pub struct RotationRun {
    pub id: Uuid,
    pub action: Action,
    pub environment: Environment,
    pub dry_run: bool,
    pub status: RunStatus,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub evidence_path: PathBuf,
    #[serde(serialize_with = "display_error")]
    pub error: Option<RotationError>,
}

fn display_error<S: Serializer>(err: &Option<RotationError>, s: S) -> Result<S::Ok, S::Error> {
    match err {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

impl RotationRun {
    fn begin(config: &RotationConfig, evidence: &EvidenceRecorder) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: config.invocation.action,
            environment: config.invocation.environment,
            dry_run: config.invocation.dry_run,
            status: RunStatus::Running,
            state: RunState::Idle,
            started_at: Utc::now(),
            finished_at: None,
            evidence_path: evidence.path().to_path_buf(),
            error: None,
        }
    }

    /// One-line JSON form used for evidence and the CLI summary.
    pub fn summary(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"summary_error\":\"{e}\"}}"))
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }

    fn advance(&mut self, event: Event) -> Result<(), RotationError> {
        self.state = transition(self.state, event)?;
        Ok(())
    }
}

pub struct RotationController {
    config: RotationConfig,
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn HealthProbe>,
}

impl RotationController {
    pub fn new(
        config: RotationConfig,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            config,
            runner,
            probe,
        }
    }

    /// Execute the configured action. The returned run is always terminal.
    pub async fn run(&self, evidence: &EvidenceRecorder) -> RotationRun {
        let mut run = RotationRun::begin(&self.config, evidence);
        evidence.info(&format!("run started {}", run.summary()));

        let outcome = match RunLock::acquire(&self.config.lock_dir, run.environment, run.id) {
            Ok(lock) => {
                evidence.info(&format!("lock acquired {}", lock.path().display()));
                let outcome = self.run_phases(&mut run, evidence).await;
                drop(lock);
                outcome
            }
            Err(e) => Err(e),
        };

        run.finished_at = Some(Utc::now());
        match outcome {
            Ok(()) => {
                run.status = RunStatus::Completed;
                info!(run_id = %run.id, state = ?run.state, "rotation run completed");
            }
            Err(e) => {
                if let Ok(failed) = transition(run.state, Event::PhaseFailed) {
                    run.state = failed;
                }
                run.status = RunStatus::Failed;
                error!(run_id = %run.id, error = %e, "rotation run failed");
                evidence.error(&e.to_string());
                run.error = Some(e);
            }
        }
        evidence.info(&format!("run finished {}", run.summary()));
        run
    }

    async fn run_phases(
        &self,
        run: &mut RotationRun,
        evidence: &EvidenceRecorder,
    ) -> Result<(), RotationError> {
        for phase in self.config.invocation.action.phases() {
            if let Some(event) = phase.start_event() {
                run.advance(event)?;
            }
            evidence.info(&format!("phase {phase} starting (state {:?})", run.state));

            if let Err(e) = self.run_phase(*phase, evidence).await {
                run.advance(Event::PhaseFailed)?;
                return Err(e);
            }

            if *phase == Phase::Stage {
                run.advance(Event::StageApplied)?;
            }
            evidence.info(&format!("phase {phase} passed (state {:?})", run.state));
        }
        run.advance(Event::Finish)?;
        Ok(())
    }

    async fn run_phase(&self, phase: Phase, evidence: &EvidenceRecorder) -> Result<(), RotationError> {
        if phase == Phase::Preflight {
            let cfg = &self.config;
            evidence.info(&format!(
                "preflight: key_id={} active_version={} next_version={} allowed_measurements={}",
                cfg.key_id,
                cfg.active_version,
                cfg.next_version.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
                cfg.allowed_measurements.len()
            ));
        }

        self.run_command(phase, evidence).await?;

        if phase != Phase::Stage {
            self.check_health(phase, evidence).await?;
        }
        Ok(())
    }

    async fn run_command(&self, phase: Phase, evidence: &EvidenceRecorder) -> Result<(), RotationError> {
        let Some(command) = self.config.commands.for_phase(phase) else {
            // Only reachable for the optional preflight command or in dry-run.
            evidence.info(&format!("{phase}: no command configured"));
            return Ok(());
        };

        if self.config.invocation.dry_run {
            evidence.info(&format!("DRY-RUN {phase}: would run `{command}`"));
            return Ok(());
        }

        evidence.info(&format!("{phase}: running `{command}`"));
        let output = self
            .runner
            .run(command, &self.config.command_env())
            .await
            .map_err(|e| RotationError::Phase {
                phase,
                reason: format!("command could not be started: {e}"),
            })?;

        let code = output
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".into());
        for line in output.stdout.lines() {
            evidence.info(&format!("{phase} stdout: {line}"));
        }
        for line in output.stderr.lines() {
            evidence.warn(&format!("{phase} stderr: {line}"));
        }
        evidence.info(&format!("{phase}: command exited {code}"));

        if output.success() {
            Ok(())
        } else {
            Err(RotationError::Phase {
                phase,
                reason: format!("command exited {code}"),
            })
        }
    }

    async fn check_health(&self, phase: Phase, evidence: &EvidenceRecorder) -> Result<(), RotationError> {
        for target in &self.config.health_targets {
            if self.config.invocation.dry_run {
                evidence.info(&format!(
                    "DRY-RUN {phase}: would check {} health at {}",
                    target.label, target.url
                ));
                continue;
            }
            match self.probe.check(&target.url).await {
                Ok(status) => {
                    evidence.info(&format!("{phase}: {} health ok ({status})", target.label));
                }
                Err(e) => {
                    warn!(phase = %phase, target = target.label, error = %e, "health check failed");
                    evidence.error(&format!("{phase}: {} health failed: {e}", target.label));
                    return Err(RotationError::Phase {
                        phase,
                        reason: format!("{} health check failed: {e}", target.label),
                    });
                }
            }
        }
        Ok(())
    }
}
