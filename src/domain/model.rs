use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a package comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackageSource {
    Index,
    Git {
        url: String,
        reference: Option<String>,
        /// Package root inside the repository (`#subdirectory=`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subdirectory: Option<String>,
    },
}

/// One line of a package list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub raw: String,
    pub name: String,
    pub extras: Vec<String>,
    pub constraint: Option<String>,
    pub source: PackageSource,
    pub import_name: String,
}

impl PackageSpec {
    /// The line written into `requirements.txt`.
    pub fn requirement(&self) -> String {
        match &self.source {
            PackageSource::Git {
                url,
                reference,
                subdirectory,
            } => {
                let mut line = format!("git+{}", url);
                if let Some(r) = reference {
                    line.push('@');
                    line.push_str(r);
                }
                if let Some(dir) = subdirectory {
                    line.push_str("#subdirectory=");
                    line.push_str(dir);
                }
                format!("{} @ {}", self.name_with_extras(), line)
            }
            PackageSource::Index => {
                let mut line = self.name_with_extras();
                if let Some(c) = &self.constraint {
                    line.push_str(c);
                }
                line
            }
        }
    }

    fn name_with_extras(&self) -> String {
        if self.extras.is_empty() {
            self.name.clone()
        } else {
            format!("{}[{}]", self.name, self.extras.join(","))
        }
    }

    pub fn is_git(&self) -> bool {
        matches!(self.source, PackageSource::Git { .. })
    }

    /// PEP 503 normalised name, used for de-duplication.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.chars() {
        if c == '-' || c == '_' || c == '.' {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.push(c.to_ascii_lowercase());
            last_sep = false;
        }
    }
    out
}

/// `repository:tag` reference of a local or remote image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Splits `repo[:tag]`; a colon inside a registry host (`host:5000/x`) is
    /// not treated as a tag separator.
    pub fn parse(s: &str) -> Self {
        match s.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') && !repo.is_empty() => Self::new(repo, tag),
            _ => Self::new(s, "latest"),
        }
    }

    pub fn docker_ref(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }

    pub fn registry_ref(&self) -> String {
        format!("docker://{}", self.docker_ref())
    }

    pub fn docker_daemon_ref(&self) -> String {
        format!("docker-daemon://{}", self.docker_ref())
    }

    /// File-system friendly stem, e.g. `org_name_latest`.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.repository, self.tag)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Files handed to `docker build`.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub dir: PathBuf,
    pub dockerfile: PathBuf,
    pub dockerignore: PathBuf,
    pub requirements: PathBuf,
}

impl BuildContext {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            dockerfile: dir.join("Dockerfile"),
            dockerignore: dir.join(".dockerignore"),
            requirements: dir.join("requirements.txt"),
        }
    }
}

/// A repository listed under a Docker Hub namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubRepository {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

impl HubRepository {
    pub fn image(&self, tag: &str) -> ImageRef {
        ImageRef::new(format!("{}/{}", self.namespace, self.name), tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ScanVerdict {
    Clean,
    Vulnerable { summary: String },
    Skipped,
}

impl ScanVerdict {
    pub fn allows_conversion(&self) -> bool {
        !matches!(self, ScanVerdict::Vulnerable { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScanVerdict::Clean => "clean",
            ScanVerdict::Vulnerable { .. } => "vulnerable",
            ScanVerdict::Skipped => "skipped",
        }
    }
}

/// Last step an image got through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Rendered,
    Built,
    DockerTested,
    Pulled,
    Scanned,
    Converted,
    SifTested,
    Uploaded,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Rendered => "rendered",
            Stage::Built => "built",
            Stage::DockerTested => "docker_tested",
            Stage::Pulled => "pulled",
            Stage::Scanned => "scanned",
            Stage::Converted => "converted",
            Stage::SifTested => "sif_tested",
            Stage::Uploaded => "uploaded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageOutcome {
    pub name: String,
    pub image: String,
    pub stage: Stage,
    pub verdict: Option<ScanVerdict>,
    pub sif_path: Option<String>,
    pub uploaded_key: Option<String>,
    pub error: Option<String>,
    pub remedy: Option<String>,
    pub elapsed_ms: u64,
}

impl ImageOutcome {
    pub fn new(name: impl Into<String>, image: &ImageRef) -> Self {
        Self {
            name: name.into(),
            image: image.docker_ref(),
            stage: Stage::Pending,
            verdict: None,
            sif_path: None,
            uploaded_key: None,
            error: None,
            remedy: None,
            elapsed_ms: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Records a failure together with the troubleshooting hint for it.
    pub fn fail(&mut self, error: &crate::utils::error::ImagenieError) {
        self.error = Some(error.user_friendly_message());
        self.remedy = Some(error.recovery_suggestion());
    }
}

/// Flat row for `report.csv`.
#[derive(Debug, Serialize)]
pub struct OutcomeRow<'a> {
    pub name: &'a str,
    pub image: &'a str,
    pub stage: &'a str,
    pub verdict: &'a str,
    pub sif_path: &'a str,
    pub uploaded_key: &'a str,
    pub error: &'a str,
    pub elapsed_ms: u64,
}

impl<'a> From<&'a ImageOutcome> for OutcomeRow<'a> {
    fn from(o: &'a ImageOutcome) -> Self {
        Self {
            name: &o.name,
            image: &o.image,
            stage: o.stage.as_str(),
            verdict: o.verdict.as_ref().map(|v| v.label()).unwrap_or(""),
            sif_path: o.sif_path.as_deref().unwrap_or(""),
            uploaded_key: o.uploaded_key.as_deref().unwrap_or(""),
            error: o.error.as_deref().unwrap_or(""),
            elapsed_ms: o.elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcomes: Vec<ImageOutcome>,
}

impl RunReport {
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            started_at: Utc::now(),
            finished_at: None,
            outcomes: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ref_parse() {
        assert_eq!(ImageRef::parse("pyenv:1.0").docker_ref(), "pyenv:1.0");
        assert_eq!(ImageRef::parse("org/tool").tag, "latest");
        let with_port = ImageRef::parse("registry:5000/org/tool");
        assert_eq!(with_port.repository, "registry:5000/org/tool");
        assert_eq!(with_port.tag, "latest");
    }

    #[test]
    fn test_image_ref_renderings() {
        let image = ImageRef::new("ghtrecontainers/bwa", "latest");
        assert_eq!(image.registry_ref(), "docker://ghtrecontainers/bwa:latest");
        assert_eq!(
            image.docker_daemon_ref(),
            "docker-daemon://ghtrecontainers/bwa:latest"
        );
        assert_eq!(image.file_stem(), "ghtrecontainers_bwa_latest");
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Scikit_Learn"), "scikit-learn");
        assert_eq!(normalize_name("zope.interface"), "zope-interface");
        assert_eq!(normalize_name("a-_-b"), "a-b");
    }

    #[test]
    fn test_outcome_row_flattens_options() {
        let mut outcome = ImageOutcome::new("bwa", &ImageRef::new("org/bwa", "latest"));
        outcome.verdict = Some(ScanVerdict::Vulnerable {
            summary: "CRITICAL: 2".to_string(),
        });
        let row = OutcomeRow::from(&outcome);
        assert_eq!(row.verdict, "vulnerable");
        assert_eq!(row.stage, "pending");
        assert_eq!(row.sif_path, "");
    }
}
