//! Typed wrappers around the external container tools.

use crate::domain::model::{ImageRef, ScanVerdict};
use crate::domain::ports::{CommandRunner, ToolCommand, ToolOutput};
use crate::utils::error::{ImagenieError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Lines of stderr kept on a failed invocation.
const STDERR_TAIL_LINES: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub docker: String,
    /// `singularity` or `apptainer`; both accept the same sub-commands.
    pub singularity: String,
    pub skopeo: String,
    pub trivy: String,
    pub tool_timeout_seconds: Option<u64>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            docker: "docker".to_string(),
            singularity: "singularity".to_string(),
            skopeo: "skopeo".to_string(),
            trivy: "trivy".to_string(),
            tool_timeout_seconds: None,
        }
    }
}

#[derive(Clone)]
pub struct Toolchain {
    runner: Arc<dyn CommandRunner>,
    paths: ToolPaths,
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

impl Toolchain {
    pub fn new(runner: Arc<dyn CommandRunner>, paths: ToolPaths) -> Self {
        Self { runner, paths }
    }

    pub fn paths(&self) -> &ToolPaths {
        &self.paths
    }

    fn command(&self, program: &str) -> ToolCommand {
        ToolCommand::new(program)
            .timeout(self.paths.tool_timeout_seconds.map(Duration::from_secs))
    }

    /// Runs a command and turns a non-zero exit into `ToolError`.
    async fn run_checked(&self, command: ToolCommand) -> Result<ToolOutput> {
        tracing::info!("▶️ {}", command.display());
        let output = self.runner.run(&command).await?;
        if output.success() {
            return Ok(output);
        }

        let stderr = if output.stderr.trim().is_empty() {
            &output.stdout
        } else {
            &output.stderr
        };
        tracing::debug!("{} failed:\n{}", command.program, stderr);
        Err(ImagenieError::ToolError {
            tool: command.program.clone(),
            code: output.code,
            stderr: tail(stderr, STDERR_TAIL_LINES),
        })
    }

    pub async fn docker_build(&self, context_dir: &Path, image: &ImageRef) -> Result<ToolOutput> {
        let cmd = self
            .command(&self.paths.docker)
            .args(["build", "-t"])
            .arg(image.docker_ref())
            .arg(context_dir.display().to_string());
        self.run_checked(cmd).await
    }

    pub async fn docker_run(&self, image: &ImageRef, argv: &[String]) -> Result<ToolOutput> {
        let cmd = self
            .command(&self.paths.docker)
            .args(["run", "--rm"])
            .arg(image.docker_ref())
            .args(argv.iter().cloned());
        self.run_checked(cmd).await
    }

    pub async fn singularity_build_from_daemon(
        &self,
        sif: &Path,
        image: &ImageRef,
    ) -> Result<ToolOutput> {
        let cmd = self
            .command(&self.paths.singularity)
            .args(["build", "--force"])
            .arg(sif.display().to_string())
            .arg(image.docker_daemon_ref());
        self.run_checked(cmd).await
    }

    pub async fn singularity_build_from_archive(
        &self,
        sif: &Path,
        archive: &Path,
    ) -> Result<ToolOutput> {
        let cmd = self
            .command(&self.paths.singularity)
            .args(["build", "--force"])
            .arg(sif.display().to_string())
            .arg(format!("docker-archive:{}", archive.display()));
        self.run_checked(cmd).await
    }

    pub async fn singularity_exec(&self, sif: &Path, argv: &[String]) -> Result<ToolOutput> {
        let cmd = self
            .command(&self.paths.singularity)
            .arg("exec")
            .arg(sif.display().to_string())
            .args(argv.iter().cloned());
        self.run_checked(cmd).await
    }

    pub async fn skopeo_copy(&self, image: &ImageRef, archive: &Path) -> Result<ToolOutput> {
        let cmd = self
            .command(&self.paths.skopeo)
            .arg("copy")
            .arg(image.registry_ref())
            .arg(format!("docker-archive:{}", archive.display()));
        self.run_checked(cmd).await
    }

    /// `trivy` exits 1 when findings at `severity` exist, anything else
    /// non-zero is a scanner failure.
    pub async fn trivy_scan(&self, archive: &Path, severity: &str) -> Result<ScanVerdict> {
        let cmd = self
            .command(&self.paths.trivy)
            .args(["image", "--exit-code", "1", "--severity", severity, "--input"])
            .arg(archive.display().to_string());
        tracing::info!("▶️ {}", cmd.display());

        let output = self.runner.run(&cmd).await?;
        match output.code {
            Some(0) => Ok(ScanVerdict::Clean),
            Some(1) => {
                let summary = output
                    .stdout
                    .lines()
                    .find(|l| l.trim_start().starts_with("Total:"))
                    .map(|l| l.trim().to_string())
                    .unwrap_or_else(|| format!("{} findings present", severity));
                Ok(ScanVerdict::Vulnerable { summary })
            }
            code => Err(ImagenieError::ToolError {
                tool: cmd.program.clone(),
                code,
                stderr: tail(&output.stderr, STDERR_TAIL_LINES),
            }),
        }
    }

    /// Runs `<tool> --version` for each tool; returns the ones that failed.
    pub async fn check_available(&self, tools: &[&str]) -> Vec<String> {
        let mut missing = Vec::new();
        for tool in tools {
            let cmd = ToolCommand::new(*tool).arg("--version");
            match self.runner.run(&cmd).await {
                Ok(out) if out.success() => {
                    let version = out.stdout.lines().next().unwrap_or("").trim().to_string();
                    tracing::info!("✅ {} {}", tool, version);
                }
                Ok(out) => {
                    tracing::warn!("⚠️ {} --version exited with {:?}", tool, out.code);
                    missing.push(tool.to_string());
                }
                Err(e) => {
                    tracing::warn!("⚠️ {}: {}", tool, e);
                    missing.push(tool.to_string());
                }
            }
        }
        missing
    }
}

/// `python3 -c "import a, b"` for the given modules. `python3` exists on
/// both `python:*` images and distro bases.
pub fn python_import_check(modules: &[String]) -> Vec<String> {
    vec![
        "python3".to_string(),
        "-c".to_string(),
        format!("import {}", modules.join(", ")),
    ]
}
