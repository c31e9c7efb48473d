use crate::domain::ports::{CommandRunner, ToolCommand, ToolOutput};
use crate::utils::error::{ImagenieError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// Spawns real child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ImagenieError::ToolNotFound {
                tool: command.program.clone(),
            },
            _ => ImagenieError::IoError(e),
        })?;

        let output = match command.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ImagenieError::ToolTimeout {
                    tool: command.program.clone(),
                    seconds: limit.as_secs(),
                })??,
            None => child.wait_with_output().await?,
        };

        Ok(ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Logs what would run and reports success without spawning anything.
#[derive(Debug, Clone, Default)]
pub struct DryRunRunner;

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput> {
        tracing::info!("🔍 [dry-run] {}", command.display());
        Ok(ToolOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}
