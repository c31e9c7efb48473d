use crate::adapters::hub::DEFAULT_HUB_URL;
use crate::core::dockerfile::DockerfileOptions;
use crate::core::specifier::StripRules;
use crate::core::toolchain::ToolPaths;
use crate::utils::error::{ImagenieError, Result};
use crate::utils::validation::{
    validate_hub_namespace, validate_non_empty_string, validate_path, validate_range,
    validate_regex, validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub build: BuildSection,
    pub dockerfile: DockerfileOptions,
    pub strip: StripRules,
    pub tools: ToolPaths,
    pub mirror: MirrorSection,
    pub hub: HubSection,
    pub storage: StorageSection,
    pub monitoring: MonitoringSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    pub packages: Option<String>,
    pub image: Option<String>,
    pub context_dir: Option<String>,
    pub output_dir: Option<String>,
    pub skip_sif: bool,
    pub skip_tests: bool,
    pub smoke_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorSection {
    pub org: Option<String>,
    pub tag: String,
    pub include: Option<String>,
    pub work_dir: Option<String>,
    pub output_dir: Option<String>,
    pub scan: bool,
    pub severity: String,
    pub upload: bool,
    pub upload_prefix: String,
    pub keep_archives: bool,
}

impl Default for MirrorSection {
    fn default() -> Self {
        Self {
            org: None,
            tag: "latest".to_string(),
            include: None,
            work_dir: None,
            output_dir: None,
            scan: true,
            severity: "CRITICAL".to_string(),
            upload: false,
            upload_prefix: "containers".to_string(),
            keep_archives: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSection {
    pub base_url: String,
    pub page_size: u32,
    pub max_pages: u32,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_HUB_URL.to_string(),
            page_size: 100,
            max_pages: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    S3,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: StorageBackend,
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSection {
    pub enabled: bool,
}

const SEVERITIES: [&str; 5] = ["UNKNOWN", "LOW", "MEDIUM", "HIGH", "CRITICAL"];

impl MirrorSection {
    /// `severity` as trivy takes it: uppercase, comma-separated, no blanks.
    pub fn severity_list(&self) -> String {
        self.severity
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content);

        toml::from_str(&processed).map_err(|e| ImagenieError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${REGISTRY_ORG})，未定義的變數保留原樣
    fn substitute_env_vars(content: &str) -> String {
        use regex::Regex;
        use std::sync::OnceLock;

        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"));

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .into_owned()
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.enabled
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        validate_url("hub.base_url", &self.hub.base_url)?;
        validate_range("hub.page_size", self.hub.page_size, 1, 100)?;
        validate_range("hub.max_pages", self.hub.max_pages, 1, 10_000)?;

        if let Some(org) = &self.mirror.org {
            validate_hub_namespace("mirror.org", org)?;
        }
        if let Some(include) = &self.mirror.include {
            validate_regex("mirror.include", include)?;
        }
        validate_non_empty_string("mirror.tag", &self.mirror.tag)?;
        let severities = self.mirror.severity_list();
        if let Some(unknown) = severities.split(',').find(|s| !SEVERITIES.contains(s)) {
            return Err(ImagenieError::InvalidConfigValueError {
                field: "mirror.severity".to_string(),
                value: self.mirror.severity.clone(),
                reason: format!("'{}' is not one of {}", unknown, SEVERITIES.join(", ")),
            });
        }

        for (field, value) in [
            ("build.packages", &self.build.packages),
            ("build.context_dir", &self.build.context_dir),
            ("build.output_dir", &self.build.output_dir),
            ("mirror.work_dir", &self.mirror.work_dir),
            ("mirror.output_dir", &self.mirror.output_dir),
        ] {
            if let Some(path) = value {
                validate_path(field, path)?;
            }
        }

        for (field, tool) in [
            ("tools.docker", &self.tools.docker),
            ("tools.singularity", &self.tools.singularity),
            ("tools.skopeo", &self.tools.skopeo),
            ("tools.trivy", &self.tools.trivy),
        ] {
            validate_non_empty_string(field, tool)?;
        }

        if self.storage.backend == StorageBackend::S3 {
            match &self.storage.bucket {
                Some(bucket) => validate_non_empty_string("storage.bucket", bucket)?,
                None => {
                    return Err(ImagenieError::MissingConfigError {
                        field: "storage.bucket".to_string(),
                    })
                }
            }
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dockerfile::Installer;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TomlConfig::from_toml_str("").unwrap();
        assert_eq!(config.hub.base_url, "https://hub.docker.com");
        assert_eq!(config.mirror.severity, "CRITICAL");
        assert!(config.mirror.scan);
        assert_eq!(config.dockerfile.base_image, "python:3.11-slim");
        assert_eq!(config.tools.singularity, "singularity");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[build]
packages = "requirements.in"
image = "lab/pyenv:2024.1"
skip_tests = true

[dockerfile]
base_image = "python:3.12-slim"
installer = "uv"
apt_packages = ["libhdf5-dev"]
env = { OMP_NUM_THREADS = "1" }

[strip]
prefixes = ["python3-"]
suffixes = []
import_names = { "scikit-learn" = "sklearn" }

[tools]
singularity = "apptainer"
tool_timeout_seconds = 3600

[mirror]
org = "ghtrecontainers"
include = "^bio-"
upload = true

[storage]
backend = "s3"
bucket = "sif-images"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.build.packages.as_deref(), Some("requirements.in"));
        assert!(config.build.skip_tests);
        assert_eq!(config.dockerfile.installer, Installer::Uv);
        assert_eq!(config.dockerfile.env.get("OMP_NUM_THREADS").unwrap(), "1");
        assert_eq!(config.strip.prefixes, vec!["python3-".to_string()]);
        assert!(config.strip.suffixes.is_empty());
        assert_eq!(config.tools.singularity, "apptainer");
        assert_eq!(config.tools.tool_timeout_seconds, Some(3600));
        assert_eq!(config.mirror.org.as_deref(), Some("ghtrecontainers"));
        assert_eq!(config.mirror.tag, "latest");
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("IMAGENIE_TEST_ORG", "biocontainers");

        let config = TomlConfig::from_toml_str(
            r#"
[mirror]
org = "${IMAGENIE_TEST_ORG}"
"#,
        )
        .unwrap();
        assert_eq!(config.mirror.org.as_deref(), Some("biocontainers"));

        std::env::remove_var("IMAGENIE_TEST_ORG");
    }

    #[test]
    fn test_severity_list_accepts_several_levels() {
        let config =
            TomlConfig::from_toml_str("[mirror]\nseverity = \"high, Critical\"\n").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.mirror.severity_list(), "HIGH,CRITICAL");

        let single = TomlConfig::from_toml_str("[mirror]\nseverity = \"medium\"\n").unwrap();
        assert!(single.validate().is_ok());
        assert_eq!(single.mirror.severity_list(), "MEDIUM");
    }

    #[test]
    fn test_validation_errors() {
        let bad_severity = TomlConfig::from_toml_str("[mirror]\nseverity = \"SEVERE\"\n").unwrap();
        assert!(bad_severity.validate().is_err());

        let mixed = TomlConfig::from_toml_str("[mirror]\nseverity = \"HIGH,SEVERE\"\n").unwrap();
        assert!(mixed.validate().is_err());

        let blank = TomlConfig::from_toml_str("[mirror]\nseverity = \"\"\n").unwrap();
        assert!(blank.validate().is_err());

        let bad_url = TomlConfig::from_toml_str("[hub]\nbase_url = \"hub.docker.com\"\n").unwrap();
        assert!(bad_url.validate().is_err());

        let missing_bucket = TomlConfig::from_toml_str("[storage]\nbackend = \"s3\"\n").unwrap();
        assert!(matches!(
            missing_bucket.validate(),
            Err(ImagenieError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_unknown_installer_is_a_parse_error() {
        assert!(TomlConfig::from_toml_str("[dockerfile]\ninstaller = \"conda\"\n").is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[build]\npackages = \"packages.txt\"\n")
            .unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.build.packages.as_deref(), Some("packages.txt"));
    }
}
