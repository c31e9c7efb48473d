//! Build context rendering: `Dockerfile`, `.dockerignore`, `requirements.txt`.

use crate::core::specifier::PackageList;
use crate::domain::model::BuildContext;
use crate::utils::error::{ImagenieError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tera::{Context, Tera};

const DOCKERFILE_TEMPLATE: &str = r#"# syntax=docker/dockerfile:1
# Generated by imagenie. Edit the package list, not this file.
FROM {{ base_image }}

ENV DEBIAN_FRONTEND=noninteractive \
    PYTHONDONTWRITEBYTECODE=1 \
    PYTHONUNBUFFERED=1{% for var in env %} \
    {{ var.key }}={{ var.value }}{% endfor %}

RUN apt-get update \
 && apt-get install -y --no-install-recommends{% for pkg in apt_packages %} {{ pkg }}{% endfor %} \
 && rm -rf /var/lib/apt/lists/*
{% if installer == "uv" %}
COPY --from={{ uv_image }} /uv /uvx /usr/local/bin/
{% endif %}
WORKDIR {{ workdir }}
COPY requirements.txt {{ workdir }}/requirements.txt
RUN {{ install_command }}

CMD ["python3"]
"#;

const DOCKERIGNORE: &str = "\
.git
.gitignore
.hg
.svn
**/__pycache__
**/*.pyc
.venv
venv
.mypy_cache
.pytest_cache
.tox
*.sif
*.tar
report.json
report.csv
";

/// Always installed so C extensions can find `Python.h`.
const BASE_APT_PACKAGES: [&str; 2] = ["build-essential", "python3-dev"];

/// Official image that ships the static `uv` and `uvx` binaries.
pub const DEFAULT_UV_IMAGE: &str = "ghcr.io/astral-sh/uv:latest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Installer {
    #[default]
    Pip,
    Uv,
}

impl Installer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Installer::Pip => "pip",
            Installer::Uv => "uv",
        }
    }

    /// Variables that let the installer write into the image's system
    /// interpreter instead of refusing with "externally-managed-environment".
    pub fn system_env(&self) -> [(&'static str, &'static str); 2] {
        match self {
            Installer::Pip => [
                ("PIP_BREAK_SYSTEM_PACKAGES", "1"),
                ("PIP_NO_CACHE_DIR", "1"),
            ],
            Installer::Uv => [
                ("UV_SYSTEM_PYTHON", "1"),
                ("UV_BREAK_SYSTEM_PACKAGES", "1"),
            ],
        }
    }

    pub fn install_command(&self, requirements: &str) -> String {
        match self {
            Installer::Pip => format!("python3 -m pip install -r {}", requirements),
            Installer::Uv => format!("uv pip install --no-cache -r {}", requirements),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerfileOptions {
    pub base_image: String,
    pub installer: Installer,
    pub apt_packages: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub workdir: String,
    /// Image `uv` is copied from when the installer is `uv`.
    pub uv_image: String,
}

impl Default for DockerfileOptions {
    fn default() -> Self {
        Self {
            base_image: "python:3.11-slim".to_string(),
            installer: Installer::Pip,
            apt_packages: Vec::new(),
            env: BTreeMap::new(),
            workdir: "/opt/app".to_string(),
            uv_image: DEFAULT_UV_IMAGE.to_string(),
        }
    }
}

#[derive(Serialize)]
struct EnvVar<'a> {
    key: &'a str,
    value: &'a str,
}

impl DockerfileOptions {
    fn check(&self) -> Result<()> {
        for (field, image) in [
            ("dockerfile.base_image", &self.base_image),
            ("dockerfile.uv_image", &self.uv_image),
        ] {
            if image.trim().is_empty() || image.contains(char::is_whitespace) {
                return Err(ImagenieError::InvalidConfigValueError {
                    field: field.to_string(),
                    value: image.clone(),
                    reason: "must be a single image reference".to_string(),
                });
            }
        }

        for pkg in &self.apt_packages {
            let ok = !pkg.is_empty()
                && pkg.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
                && pkg.chars().all(|c| {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || "+.-=:".contains(c)
                });
            if !ok {
                return Err(ImagenieError::InvalidConfigValueError {
                    field: "dockerfile.apt_packages".to_string(),
                    value: pkg.clone(),
                    reason: "not a valid Debian package name".to_string(),
                });
            }
        }

        for (key, value) in &self.env {
            let key_ok = key.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !key_ok || value.contains(['\n', '\\']) || value.contains(char::is_whitespace) {
                return Err(ImagenieError::InvalidConfigValueError {
                    field: "dockerfile.env".to_string(),
                    value: format!("{}={}", key, value),
                    reason: "keys must be identifiers and values must not contain whitespace"
                        .to_string(),
                });
            }
        }

        if !self.workdir.starts_with('/') {
            return Err(ImagenieError::InvalidConfigValueError {
                field: "dockerfile.workdir".to_string(),
                value: self.workdir.clone(),
                reason: "must be an absolute path".to_string(),
            });
        }

        Ok(())
    }

    /// `python:*` images ship an interpreter and pip; distro bases need
    /// them from apt.
    pub fn base_has_python(&self) -> bool {
        let image = self.base_image.split('@').next().unwrap_or_default();
        let last = image.rsplit('/').next().unwrap_or_default();
        let repository = last.split(':').next().unwrap_or_default();
        repository == "python" || repository.starts_with("python-")
    }

    fn apt_packages_for(&self, list: &PackageList) -> Vec<String> {
        let mut packages: Vec<String> = Vec::new();
        if !self.base_has_python() {
            packages.push("python3".to_string());
            if self.installer == Installer::Pip {
                packages.push("python3-pip".to_string());
            }
        }
        packages.extend(BASE_APT_PACKAGES.iter().map(|p| p.to_string()));
        if list.has_git_sources() {
            packages.push("git".to_string());
        }
        if self.installer == Installer::Uv {
            packages.push("ca-certificates".to_string());
        }
        for extra in &self.apt_packages {
            if !packages.contains(extra) {
                packages.push(extra.clone());
            }
        }
        packages
    }
}

pub fn render_dockerfile(options: &DockerfileOptions, list: &PackageList) -> Result<String> {
    options.check()?;

    let mut env: Vec<EnvVar> = options
        .installer
        .system_env()
        .into_iter()
        .map(|(key, value)| EnvVar { key, value })
        .collect();
    for (key, value) in &options.env {
        if env.iter().any(|e| e.key == key) {
            env.retain(|e| e.key != key);
        }
        env.push(EnvVar { key, value });
    }

    let mut context = Context::new();
    context.insert("base_image", &options.base_image);
    context.insert("installer", options.installer.as_str());
    context.insert("env", &env);
    context.insert("apt_packages", &options.apt_packages_for(list));
    context.insert("workdir", &options.workdir);
    context.insert("uv_image", &options.uv_image);
    context.insert(
        "install_command",
        &options.installer.install_command("requirements.txt"),
    );

    let mut tera = Tera::default();
    tera.add_raw_template("Dockerfile", DOCKERFILE_TEMPLATE)?;
    Ok(tera.render("Dockerfile", &context)?)
}

pub fn render_dockerignore() -> &'static str {
    DOCKERIGNORE
}

/// Writes the three build-context files into `dir`.
pub async fn render_context(
    dir: &Path,
    options: &DockerfileOptions,
    list: &PackageList,
) -> Result<BuildContext> {
    if list.is_empty() {
        return Err(ImagenieError::ProcessingError {
            message: "package list is empty; nothing to build".to_string(),
        });
    }

    let dockerfile = render_dockerfile(options, list)?;
    let context = BuildContext::in_dir(dir);

    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&context.dockerfile, dockerfile).await?;
    tokio::fs::write(&context.dockerignore, render_dockerignore()).await?;
    tokio::fs::write(&context.requirements, list.requirements_txt()).await?;

    tracing::info!(
        "📝 Build context written to {} ({} packages, installer: {})",
        dir.display(),
        list.len(),
        options.installer.as_str()
    );
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::specifier::StripRules;

    fn list(text: &str) -> PackageList {
        PackageList::parse(text, &StripRules::default()).unwrap()
    }

    #[test]
    fn test_pip_dockerfile() {
        let rendered = render_dockerfile(&DockerfileOptions::default(), &list("numpy\n")).unwrap();

        assert!(rendered.contains("FROM python:3.11-slim"));
        assert!(rendered.contains("PIP_BREAK_SYSTEM_PACKAGES=1"));
        assert!(rendered.contains("PIP_NO_CACHE_DIR=1"));
        assert!(rendered.contains("build-essential python3-dev"));
        assert!(!rendered.contains(" git"));
        assert!(rendered.contains("COPY requirements.txt /opt/app/requirements.txt"));
        assert!(rendered.contains("RUN python3 -m pip install -r requirements.txt"));
        assert!(!rendered.contains("astral-sh/uv"));
        // the image already has an interpreter
        assert!(!rendered.contains("python3-pip"));
        assert!(rendered.contains("install -y --no-install-recommends build-essential"));
    }

    #[test]
    fn test_uv_dockerfile_with_git_source() {
        let options = DockerfileOptions {
            installer: Installer::Uv,
            base_image: "debian:bookworm-slim".to_string(),
            ..Default::default()
        };
        let rendered =
            render_dockerfile(&options, &list("git+https://github.com/org/tool.git@v1\n")).unwrap();

        assert!(rendered.contains("FROM debian:bookworm-slim"));
        assert!(rendered.contains("UV_SYSTEM_PYTHON=1"));
        assert!(rendered.contains("UV_BREAK_SYSTEM_PACKAGES=1"));
        assert!(rendered.contains(" git"));
        // debian has neither python nor pip; uv comes from its own image
        assert!(rendered.contains("--no-install-recommends python3 build-essential python3-dev"));
        assert!(!rendered.contains("python3-pip"));
        assert!(!rendered.contains("-m pip install"));
        assert!(rendered.contains("COPY --from=ghcr.io/astral-sh/uv:latest /uv /uvx /usr/local/bin/"));
        assert!(rendered.contains("RUN uv pip install --no-cache -r requirements.txt"));
        assert!(rendered.contains("CMD [\"python3\"]"));
    }

    #[test]
    fn test_pip_on_distro_base_installs_interpreter() {
        let options = DockerfileOptions {
            base_image: "ubuntu:24.04".to_string(),
            ..Default::default()
        };
        let rendered = render_dockerfile(&options, &list("numpy\n")).unwrap();

        assert!(rendered.contains("--no-install-recommends python3 python3-pip build-essential"));
        assert!(rendered.contains("PIP_BREAK_SYSTEM_PACKAGES=1"));
        assert!(rendered.contains("RUN python3 -m pip install -r requirements.txt"));
    }

    #[test]
    fn test_base_has_python() {
        let with = |image: &str| DockerfileOptions {
            base_image: image.to_string(),
            ..Default::default()
        };
        assert!(with("python:3.12-slim").base_has_python());
        assert!(with("docker.io/library/python:3.11").base_has_python());
        assert!(with("python@sha256:abc").base_has_python());
        assert!(!with("debian:bookworm-slim").base_has_python());
        assert!(!with("nvidia/cuda:12.4.1-runtime-ubuntu22.04").base_has_python());
        assert!(!with("mypython:1").base_has_python());
    }

    #[test]
    fn test_extra_env_overrides_installer_default() {
        let mut options = DockerfileOptions::default();
        options.env.insert("PIP_NO_CACHE_DIR".to_string(), "0".to_string());
        options.env.insert("OMP_NUM_THREADS".to_string(), "1".to_string());
        options.apt_packages.push("libhdf5-dev".to_string());

        let rendered = render_dockerfile(&options, &list("h5py\n")).unwrap();
        assert!(rendered.contains("PIP_NO_CACHE_DIR=0"));
        assert!(!rendered.contains("PIP_NO_CACHE_DIR=1"));
        assert!(rendered.contains("OMP_NUM_THREADS=1"));
        assert!(rendered.contains("libhdf5-dev"));
    }

    #[test]
    fn test_rejects_injection_in_options() {
        let mut options = DockerfileOptions::default();
        options.apt_packages.push("curl && rm -rf /".to_string());
        assert!(render_dockerfile(&options, &list("numpy\n")).is_err());

        let mut options = DockerfileOptions::default();
        options.env.insert("BAD KEY".to_string(), "1".to_string());
        assert!(render_dockerfile(&options, &list("numpy\n")).is_err());

        let options = DockerfileOptions {
            workdir: "relative".to_string(),
            ..Default::default()
        };
        assert!(render_dockerfile(&options, &list("numpy\n")).is_err());
    }

    #[tokio::test]
    async fn test_render_context_writes_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let packages = list("numpy\npandas==2.2\n");

        let context = render_context(dir.path(), &DockerfileOptions::default(), &packages)
            .await
            .unwrap();

        let requirements = std::fs::read_to_string(&context.requirements).unwrap();
        assert_eq!(requirements, "numpy\npandas==2.2\n");
        let ignore = std::fs::read_to_string(&context.dockerignore).unwrap();
        assert!(ignore.contains("*.sif"));
        assert!(context.dockerfile.exists());
    }

    #[tokio::test]
    async fn test_render_context_rejects_empty_list() {
        let dir = tempfile::TempDir::new().unwrap();
        let result =
            render_context(dir.path(), &DockerfileOptions::default(), &PackageList::default()).await;
        assert!(result.is_err());
    }
}
