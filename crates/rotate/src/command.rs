//! Execution of operator-supplied phase commands.

use std::process::Stdio;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;

/// Captured result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion with `env` added to the inherited environment.
    async fn run(&self, command: &str, env: &[(String, String)]) -> std::io::Result<CommandOutput>;
}

/// Runs commands through `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct ShellCommandRunner;

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, command: &str, env: &[(String, String)]) -> std::io::Result<CommandOutput> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_exit_code_and_streams() {
        let out = ShellCommandRunner
            .run("echo out; echo err >&2; exit 3", &[])
            .await
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn exports_environment() {
        let env = vec![("ROTATION_NEXT_VERSION".to_string(), "2".to_string())];
        let out = ShellCommandRunner
            .run("printf %s \"$ROTATION_NEXT_VERSION\"", &env)
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "2");
    }
}
