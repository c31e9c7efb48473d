use crate::core::dockerfile::{render_context, DockerfileOptions};
use crate::core::report::write_report;
use crate::core::specifier::{PackageList, StripRules};
use crate::core::toolchain::{python_import_check, Toolchain};
use crate::domain::model::{ImageOutcome, ImageRef, PackageSpec, RunReport, Stage};
use crate::domain::ports::{Pipeline, Storage};
use crate::utils::error::{ImagenieError, Result};
use std::path::PathBuf;
use std::time::Instant;

/// Everything the package-list workflow needs to know.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub packages_path: PathBuf,
    pub image: ImageRef,
    pub context_dir: PathBuf,
    pub output_dir: PathBuf,
    pub dockerfile: DockerfileOptions,
    pub strip: StripRules,
    pub skip_sif: bool,
    pub skip_tests: bool,
    /// Replaces the default `python3 -c "import ..."` smoke test.
    pub smoke_command: Option<Vec<String>>,
}

impl BuildSettings {
    pub fn sif_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.sif", self.image.file_stem()))
    }
}

/// Package list -> Dockerfile -> docker image -> SIF, smoke-testing both images.
pub struct BuildPipeline<S: Storage> {
    storage: S,
    toolchain: Toolchain,
    settings: BuildSettings,
}

impl<S: Storage> BuildPipeline<S> {
    pub fn new(storage: S, toolchain: Toolchain, settings: BuildSettings) -> Self {
        Self {
            storage,
            toolchain,
            settings,
        }
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    fn smoke_argv(&self, list: &PackageList) -> Vec<String> {
        match &self.settings.smoke_command {
            Some(argv) if !argv.is_empty() => argv.clone(),
            _ => python_import_check(&list.import_names()),
        }
    }

    /// Steps run in order; the first failure stops the rest.
    async fn build_image(&self, list: &PackageList, outcome: &mut ImageOutcome) -> Result<()> {
        let settings = &self.settings;

        let context = render_context(&settings.context_dir, &settings.dockerfile, list).await?;
        outcome.stage = Stage::Rendered;

        self.toolchain
            .docker_build(&context.dir, &settings.image)
            .await?;
        outcome.stage = Stage::Built;
        tracing::info!("🐳 Built {}", settings.image);

        let smoke = self.smoke_argv(list);
        if !settings.skip_tests {
            self.toolchain.docker_run(&settings.image, &smoke).await?;
            outcome.stage = Stage::DockerTested;
            tracing::info!("✅ Docker smoke test passed");
        }

        if settings.skip_sif {
            tracing::info!("⏭️ SIF conversion skipped");
            return Ok(());
        }

        let sif = settings.sif_path();
        tokio::fs::create_dir_all(&settings.output_dir).await?;
        self.toolchain
            .singularity_build_from_daemon(&sif, &settings.image)
            .await?;
        outcome.stage = Stage::Converted;
        outcome.sif_path = Some(sif.display().to_string());
        tracing::info!("📦 Converted to {}", sif.display());

        if !settings.skip_tests {
            self.toolchain.singularity_exec(&sif, &smoke).await?;
            outcome.stage = Stage::SifTested;
            tracing::info!("✅ SIF smoke test passed");
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for BuildPipeline<S> {
    type Item = PackageSpec;

    fn name(&self) -> &str {
        "build"
    }

    async fn extract(&self) -> Result<Vec<PackageSpec>> {
        let path = &self.settings.packages_path;
        tracing::debug!("Reading package list from {}", path.display());
        let list = PackageList::from_file(path, &self.settings.strip)?;

        if list.is_empty() {
            return Err(ImagenieError::ProcessingError {
                message: format!("{} contains no package specifiers", path.display()),
            });
        }
        Ok(list.specs)
    }

    async fn transform(&self, specs: Vec<PackageSpec>) -> Result<RunReport> {
        let list = PackageList { specs };
        let mut report = RunReport::new(self.name());
        let mut outcome = ImageOutcome::new(&self.settings.image.repository, &self.settings.image);
        let started = Instant::now();

        if let Err(e) = self.build_image(&list, &mut outcome).await {
            tracing::error!(
                "❌ {} failed after stage '{}': {}",
                self.settings.image,
                outcome.stage.as_str(),
                e
            );
            outcome.fail(&e);
        }

        outcome.elapsed_ms = started.elapsed().as_millis() as u64;
        report.outcomes.push(outcome);
        Ok(report)
    }

    async fn load(&self, mut report: RunReport) -> Result<String> {
        report.finish();
        write_report(&self.storage, &report).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::LocalStorage;
    use crate::core::engine::ImagenieEngine;
    use crate::core::toolchain::testing::RecordingRunner;
    use crate::core::toolchain::ToolPaths;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn settings(dir: &TempDir, packages: &str) -> BuildSettings {
        let packages_path = dir.path().join("packages.txt");
        std::fs::write(&packages_path, packages).unwrap();
        BuildSettings {
            packages_path,
            image: ImageRef::new("pyenv", "test"),
            context_dir: dir.path().join("context"),
            output_dir: dir.path().join("out"),
            dockerfile: DockerfileOptions::default(),
            strip: StripRules::default(),
            skip_sif: false,
            skip_tests: false,
            smoke_command: None,
        }
    }

    fn pipeline(
        dir: &TempDir,
        packages: &str,
        runner: Arc<RecordingRunner>,
    ) -> BuildPipeline<LocalStorage> {
        let settings = settings(dir, packages);
        let storage = LocalStorage::new(settings.output_dir.clone());
        BuildPipeline::new(storage, Toolchain::new(runner, ToolPaths::default()), settings)
    }

    #[tokio::test]
    async fn test_full_sequence() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let engine = ImagenieEngine::new(pipeline(&dir, "numpy\npython3-yaml\n", runner.clone()));

        let summary = engine.run().await.unwrap();
        assert_eq!(summary.succeeded, 1);

        let sif = dir.path().join("out/pyenv_test.sif").display().to_string();
        let ctx = dir.path().join("context").display().to_string();
        assert_eq!(
            runner.displays(),
            vec![
                format!("docker build -t pyenv:test {}", ctx),
                "docker run --rm pyenv:test python3 -c 'import numpy, yaml'".to_string(),
                format!("singularity build --force {} docker-daemon://pyenv:test", sif),
                format!("singularity exec {} python3 -c 'import numpy, yaml'", sif),
            ]
        );

        let report: RunReport = serde_json::from_slice(
            &std::fs::read(dir.path().join("out/report.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(report.outcomes[0].stage, Stage::SifTested);
        assert_eq!(report.outcomes[0].sif_path.as_deref(), Some(sif.as_str()));
        assert!(report.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_build_failure_stops_sequence_and_is_reported() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new().respond(
            "docker build",
            1,
            "",
            "error: externally-managed-environment",
        ));
        let engine = ImagenieEngine::new(pipeline(&dir, "numpy\n", runner.clone()));

        let summary = engine.run().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(runner.displays().len(), 1);

        let report: RunReport = serde_json::from_slice(
            &std::fs::read(dir.path().join("out/report.json")).unwrap(),
        )
        .unwrap();
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.stage, Stage::Rendered);
        assert!(outcome
            .remedy
            .as_deref()
            .unwrap()
            .contains("PIP_BREAK_SYSTEM_PACKAGES"));
    }

    #[tokio::test]
    async fn test_skip_flags_and_custom_smoke_command() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let mut settings = settings(&dir, "numpy\n");
        settings.skip_sif = true;
        settings.smoke_command = Some(vec!["python".to_string(), "--version".to_string()]);
        let storage = LocalStorage::new(settings.output_dir.clone());
        let pipeline = BuildPipeline::new(
            storage,
            Toolchain::new(runner.clone(), ToolPaths::default()),
            settings,
        );

        let summary = ImagenieEngine::new(pipeline).run().await.unwrap();
        assert_eq!(summary.succeeded, 1);
        let calls = runner.displays();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], "docker run --rm pyenv:test python --version");
    }

    #[tokio::test]
    async fn test_empty_package_list_is_an_error() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let engine = ImagenieEngine::new(pipeline(&dir, "# nothing here\n\n", runner.clone()));

        assert!(engine.run().await.is_err());
        assert!(runner.displays().is_empty());
    }
}
