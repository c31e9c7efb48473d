use crate::app::pipelines::{BuildSettings, MirrorSettings};
use crate::config::toml_config::TomlConfig;
use crate::core::dockerfile::Installer;
use crate::domain::model::ImageRef;
use crate::utils::error::{ImagenieError, Result};
use crate::utils::validation::{validate_hub_namespace, validate_path, Validate};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "imagenie")]
#[command(about = "Turn Python package lists and Docker Hub images into Docker and Singularity images")]
#[command(version)]
pub struct CliConfig {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log CPU and memory between pipeline stages
    #[arg(long, global = true)]
    pub monitor: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Build a Docker image and a SIF from a package list, then smoke-test both
    Build(BuildArgs),
    /// Only write Dockerfile, .dockerignore and requirements.txt
    Render(RenderArgs),
    /// Pull, scan and convert every image of a Docker Hub organisation
    Mirror(MirrorArgs),
    /// Match tool output against known failures and print remedies
    Diagnose {
        /// Log file to inspect, or '-' for stdin
        input: String,
    },
    /// Check that docker, singularity, skopeo and trivy are installed
    Doctor,
}

#[derive(Debug, Clone, Default, Args)]
pub struct DockerfileArgs {
    /// Package list, one specifier per line
    #[arg(short, long)]
    pub packages: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub installer: Option<Installer>,

    #[arg(long)]
    pub base_image: Option<String>,

    /// Extra apt packages, comma separated
    #[arg(long, value_delimiter = ',')]
    pub apt: Vec<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct BuildArgs {
    #[command(flatten)]
    pub dockerfile: DockerfileArgs,

    /// Image reference, e.g. lab/pyenv:1.0
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Where the SIF and the run report are written
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    #[arg(long)]
    pub skip_sif: bool,

    #[arg(long)]
    pub skip_tests: bool,

    /// Print tool invocations without running them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct RenderArgs {
    #[command(flatten)]
    pub dockerfile: DockerfileArgs,

    /// Directory that receives the build context
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct MirrorArgs {
    /// Docker Hub organisation to mirror
    #[arg(long)]
    pub org: Option<String>,

    /// Only mirror repositories whose name matches this regex
    #[arg(long)]
    pub include: Option<String>,

    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Skip the trivy vulnerability gate
    #[arg(long)]
    pub no_scan: bool,

    /// Upload converted SIFs to the configured storage
    #[arg(long)]
    pub upload: bool,

    #[arg(long)]
    pub keep_archives: bool,

    #[arg(long)]
    pub dry_run: bool,
}

fn missing(field: &str) -> ImagenieError {
    ImagenieError::MissingConfigError {
        field: field.to_string(),
    }
}

/// Loads the TOML file if one was given, otherwise defaults.
pub fn load_file_config(path: Option<&PathBuf>) -> Result<TomlConfig> {
    let config = match path {
        Some(p) => {
            tracing::info!("📁 Loading configuration from: {}", p.display());
            TomlConfig::from_file(p)?
        }
        None => TomlConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

impl DockerfileArgs {
    /// Applies flag overrides onto the file's `[dockerfile]` section.
    pub fn apply(&self, file: &mut TomlConfig) {
        if let Some(installer) = self.installer {
            file.dockerfile.installer = installer;
        }
        if let Some(base) = &self.base_image {
            file.dockerfile.base_image = base.clone();
        }
        for pkg in &self.apt {
            if !file.dockerfile.apt_packages.contains(pkg) {
                file.dockerfile.apt_packages.push(pkg.clone());
            }
        }
    }

    pub fn packages_path(&self, file: &TomlConfig) -> Result<PathBuf> {
        let path = self
            .packages
            .clone()
            .or_else(|| file.build.packages.as_ref().map(PathBuf::from))
            .ok_or_else(|| missing("build.packages (--packages)"))?;
        validate_path("build.packages", &path.display().to_string())?;
        Ok(path)
    }
}

impl BuildArgs {
    /// CLI flags override the file; the file overrides built-in defaults.
    pub fn settings(&self, mut file: TomlConfig) -> Result<BuildSettings> {
        self.dockerfile.apply(&mut file);
        let packages_path = self.dockerfile.packages_path(&file)?;

        let image = self
            .tag
            .clone()
            .or_else(|| file.build.image.clone())
            .map(|s| ImageRef::parse(&s))
            .unwrap_or_else(|| ImageRef::new("imagenie-env", "latest"));

        let output_dir = self
            .out
            .clone()
            .or_else(|| file.build.output_dir.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./output"));
        let context_dir = file
            .build
            .context_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| output_dir.join("context"));

        Ok(BuildSettings {
            packages_path,
            image,
            context_dir,
            output_dir,
            dockerfile: file.dockerfile,
            strip: file.strip,
            skip_sif: self.skip_sif || file.build.skip_sif,
            skip_tests: self.skip_tests || file.build.skip_tests,
            smoke_command: file.build.smoke_command,
        })
    }
}

impl MirrorArgs {
    pub fn settings(&self, file: &TomlConfig) -> Result<MirrorSettings> {
        let org = self
            .org
            .clone()
            .or_else(|| file.mirror.org.clone())
            .ok_or_else(|| missing("mirror.org (--org)"))?;
        validate_hub_namespace("mirror.org", &org)?;

        let mut settings = MirrorSettings::new(org);
        settings.tag = file.mirror.tag.clone();
        settings.include = self.include.clone().or_else(|| file.mirror.include.clone());
        if let Some(work) = &file.mirror.work_dir {
            settings.work_dir = PathBuf::from(work);
        }
        settings.output_dir = self
            .out
            .clone()
            .or_else(|| file.mirror.output_dir.as_ref().map(PathBuf::from))
            .unwrap_or(settings.output_dir);
        settings.scan = file.mirror.scan && !self.no_scan;
        settings.severity = file.mirror.severity_list();
        settings.upload = (self.upload || file.mirror.upload) && !self.dry_run;
        settings.upload_prefix = file.mirror.upload_prefix.clone();
        settings.keep_archives = self.keep_archives || file.mirror.keep_archives;
        Ok(settings)
    }
}
