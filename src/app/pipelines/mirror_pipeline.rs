use crate::adapters::hub::DockerHubClient;
use crate::core::report::write_report;
use crate::core::toolchain::Toolchain;
use crate::domain::model::{HubRepository, ImageOutcome, RunReport, ScanVerdict, Stage};
use crate::domain::ports::{Pipeline, Storage};
use crate::utils::error::{ImagenieError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct MirrorSettings {
    pub org: String,
    pub tag: String,
    /// Only repositories whose name matches are processed.
    pub include: Option<String>,
    /// Where pulled `docker-archive` tarballs are staged.
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub scan: bool,
    pub severity: String,
    pub upload: bool,
    pub upload_prefix: String,
    pub keep_archives: bool,
}

impl MirrorSettings {
    pub fn new(org: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            tag: "latest".to_string(),
            include: None,
            work_dir: std::env::temp_dir().join("imagenie"),
            output_dir: PathBuf::from("./output"),
            scan: true,
            severity: "CRITICAL".to_string(),
            upload: false,
            upload_prefix: "containers".to_string(),
            keep_archives: false,
        }
    }

    fn upload_key(&self, name: &str) -> String {
        let prefix = self.upload_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{}.sif", name)
        } else {
            format!("{}/{}.sif", prefix, name)
        }
    }
}

/// Docker Hub organisation -> skopeo archive -> trivy gate -> SIF -> storage.
pub struct MirrorPipeline<S: Storage> {
    storage: S,
    toolchain: Toolchain,
    hub: DockerHubClient,
    settings: MirrorSettings,
    include: Option<Regex>,
}

impl<S: Storage> MirrorPipeline<S> {
    pub fn new(
        storage: S,
        toolchain: Toolchain,
        hub: DockerHubClient,
        settings: MirrorSettings,
    ) -> Result<Self> {
        let include = settings
            .include
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ImagenieError::InvalidConfigValueError {
                field: "mirror.include".to_string(),
                value: settings.include.clone().unwrap_or_default(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            storage,
            toolchain,
            hub,
            settings,
            include,
        })
    }

    async fn remove_archive(&self, archive: &Path) {
        match tokio::fs::remove_file(archive).await {
            Ok(()) => tracing::debug!("Removed {}", archive.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("⚠️ Could not remove {}: {}", archive.display(), e),
        }
    }

    async fn mirror_one(&self, repo: &HubRepository, outcome: &mut ImageOutcome) -> Result<()> {
        let settings = &self.settings;
        let image = repo.image(&settings.tag);
        let archive = settings.work_dir.join(format!("{}.tar", repo.name));

        // skopeo refuses to write over an existing docker-archive
        self.remove_archive(&archive).await;
        self.toolchain.skopeo_copy(&image, &archive).await?;
        outcome.stage = Stage::Pulled;

        let verdict = if settings.scan {
            self.toolchain.trivy_scan(&archive, &settings.severity).await?
        } else {
            ScanVerdict::Skipped
        };
        outcome.stage = Stage::Scanned;
        outcome.verdict = Some(verdict.clone());

        if let ScanVerdict::Vulnerable { summary } = &verdict {
            tracing::warn!("🛑 {} has {} findings, not converting: {}", image, settings.severity, summary);
            return Ok(());
        }

        let sif = settings.output_dir.join(format!("{}.sif", repo.name));
        self.toolchain
            .singularity_build_from_archive(&sif, &archive)
            .await?;
        outcome.stage = Stage::Converted;
        outcome.sif_path = Some(sif.display().to_string());
        tracing::info!("📦 {} -> {}", image, sif.display());

        if settings.upload {
            let key = settings.upload_key(&repo.name);
            let location = self.storage.upload_file(&key, &sif).await?;
            outcome.stage = Stage::Uploaded;
            outcome.uploaded_key = Some(location.clone());
            tracing::info!("☁️ Uploaded {}", location);
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for MirrorPipeline<S> {
    type Item = HubRepository;

    fn name(&self) -> &str {
        "mirror"
    }

    async fn extract(&self) -> Result<Vec<HubRepository>> {
        let repos = self.hub.list_repositories(&self.settings.org).await?;
        let selected: Vec<HubRepository> = match &self.include {
            Some(re) => repos.into_iter().filter(|r| re.is_match(&r.name)).collect(),
            None => repos,
        };
        tracing::debug!("{} repositories selected", selected.len());
        Ok(selected)
    }

    async fn transform(&self, repos: Vec<HubRepository>) -> Result<RunReport> {
        let mut report = RunReport::new(self.name());
        tokio::fs::create_dir_all(&self.settings.work_dir).await?;
        tokio::fs::create_dir_all(&self.settings.output_dir).await?;

        for (index, repo) in repos.iter().enumerate() {
            let image = repo.image(&self.settings.tag);
            tracing::info!("🔄 [{}/{}] {}", index + 1, repos.len(), image);

            let mut outcome = ImageOutcome::new(&repo.name, &image);
            let started = Instant::now();

            if let Err(e) = self.mirror_one(repo, &mut outcome).await {
                tracing::error!("❌ {} failed after stage '{}': {}", image, outcome.stage.as_str(), e);
                outcome.fail(&e);
            }
            if !self.settings.keep_archives {
                self.remove_archive(&self.settings.work_dir.join(format!("{}.tar", repo.name)))
                    .await;
            }

            outcome.elapsed_ms = started.elapsed().as_millis() as u64;
            report.outcomes.push(outcome);
        }

        Ok(report)
    }

    async fn load(&self, mut report: RunReport) -> Result<String> {
        report.finish();
        let vulnerable = report
            .outcomes
            .iter()
            .filter(|o| matches!(o.verdict, Some(ScanVerdict::Vulnerable { .. })))
            .count();
        if vulnerable > 0 {
            tracing::warn!("🛑 {} images held back by the vulnerability gate", vulnerable);
        }
        write_report(&self.storage, &report).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::LocalStorage;
    use crate::core::toolchain::testing::RecordingRunner;
    use crate::core::toolchain::ToolPaths;
    use httpmock::prelude::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_upload_key() {
        let mut settings = MirrorSettings::new("acme");
        assert_eq!(settings.upload_key("bwa"), "containers/bwa.sif");
        settings.upload_prefix = "/".to_string();
        assert_eq!(settings.upload_key("bwa"), "bwa.sif");
    }

    #[test]
    fn test_bad_include_pattern() {
        let mut settings = MirrorSettings::new("acme");
        settings.include = Some("([".to_string());
        let result = MirrorPipeline::new(
            LocalStorage::new("/tmp"),
            Toolchain::new(Arc::new(RecordingRunner::new()), ToolPaths::default()),
            DockerHubClient::new("http://127.0.0.1:1").unwrap(),
            settings,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_vulnerable_image_is_not_converted() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v2/repositories/acme/");
            then.status(200).json_body(serde_json::json!({
                "next": null,
                "results": [{"name": "old", "namespace": "acme"}]
            }));
        });

        let dir = TempDir::new().unwrap();
        let mut settings = MirrorSettings::new("acme");
        settings.work_dir = dir.path().join("work");
        settings.output_dir = dir.path().join("out");
        let runner = Arc::new(RecordingRunner::new().respond(
            "trivy",
            1,
            "Total: 1 (CRITICAL: 1)",
            "",
        ));
        let pipeline = MirrorPipeline::new(
            LocalStorage::new(dir.path().join("out")),
            Toolchain::new(runner.clone(), ToolPaths::default()),
            DockerHubClient::new(&server.base_url()).unwrap(),
            settings,
        )
        .unwrap();

        let repos = pipeline.extract().await.unwrap();
        let report = pipeline.transform(repos).await.unwrap();

        let calls = runner.displays();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("skopeo copy docker://acme/old:latest"));
        assert!(calls[1].starts_with("trivy image"));
        assert!(report.outcomes[0].succeeded());
        assert_eq!(report.outcomes[0].stage, Stage::Scanned);
        assert!(report.outcomes[0].sif_path.is_none());
    }
}
