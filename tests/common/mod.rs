use async_trait::async_trait;
use imagenie::core::{CommandRunner, ToolCommand, ToolOutput};
use imagenie::Result;
use std::sync::Mutex;

/// Stands in for docker/skopeo/trivy/singularity.
///
/// Commands whose rendering contains a `fail_on` needle exit with the given
/// code. Successful `skopeo copy` and `singularity build` calls create their
/// output file so later steps (upload) see something on disk.
#[derive(Default)]
pub struct FakeTools {
    pub calls: Mutex<Vec<String>>,
    fail_on: Vec<(String, i32, String, String)>,
}

impl FakeTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, needle: &str, code: i32, stdout: &str, stderr: &str) -> Self {
        self.fail_on
            .push((needle.to_string(), code, stdout.to_string(), stderr.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn create_output(command: &ToolCommand) {
        let target = match (command.program.as_str(), command.args.first().map(String::as_str)) {
            ("skopeo", Some("copy")) => command
                .args
                .get(2)
                .and_then(|a| a.strip_prefix("docker-archive:"))
                .map(str::to_string),
            ("singularity", Some("build")) => command.args.get(2).cloned(),
            _ => None,
        };
        if let Some(path) = target {
            std::fs::write(path, b"fake image").unwrap();
        }
    }
}

#[async_trait]
impl CommandRunner for FakeTools {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput> {
        let shown = command.display();
        self.calls.lock().unwrap().push(shown.clone());

        for (needle, code, stdout, stderr) in &self.fail_on {
            if shown.contains(needle.as_str()) {
                return Ok(ToolOutput {
                    code: Some(*code),
                    stdout: stdout.clone(),
                    stderr: stderr.clone(),
                });
            }
        }

        Self::create_output(command);
        Ok(ToolOutput {
            code: Some(0),
            ..Default::default()
        })
    }
}
