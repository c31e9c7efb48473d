use anyhow::Context;
use clap::Parser;
use imagenie::adapters::runner::DryRunRunner;
use imagenie::config::cli::{load_file_config, BuildArgs, MirrorArgs, RenderArgs};
use imagenie::config::{CliConfig, Command, StorageBackend, TomlConfig};
use imagenie::core::dockerfile::render_context;
use imagenie::core::engine::RunSummary;
use imagenie::core::specifier::PackageList;
use imagenie::core::troubleshoot;
use imagenie::core::{CommandRunner, Storage};
use imagenie::utils::logger;
use imagenie::{
    BuildPipeline, DockerHubClient, ImagenieEngine, ImagenieError, LocalStorage, MirrorPipeline,
    MirrorSettings, ProcessRunner, Toolchain,
};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.log_json {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    tracing::debug!("CLI config: {:?}", cli);

    if let Command::Diagnose { input } = &cli.command {
        return diagnose_command(input);
    }

    match run(&cli).await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(
                "❌ imagenie failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 {}", e.recovery_suggestion());
            std::process::exit(e.severity().exit_code().max(1));
        }
    }
}

async fn run(cli: &CliConfig) -> imagenie::Result<i32> {
    let file = load_file_config(cli.config.as_ref())?;
    let monitor = cli.monitor || file.monitoring_enabled();

    match &cli.command {
        Command::Build(args) => build_command(args, file, monitor).await,
        Command::Render(args) => render_command(args, file).await,
        Command::Mirror(args) => mirror_command(args, file, monitor).await,
        Command::Doctor => doctor_command(&file).await,
        Command::Diagnose { .. } => Ok(0),
    }
}

fn runner(dry_run: bool) -> Arc<dyn CommandRunner> {
    if dry_run {
        tracing::info!("🔍 DRY RUN MODE - tools will not be executed");
        Arc::new(DryRunRunner)
    } else {
        Arc::new(ProcessRunner::new())
    }
}

fn print_summary(summary: &RunSummary) -> i32 {
    if summary.failed == 0 {
        println!(
            "✅ {} finished: {} image(s) processed",
            summary.pipeline, summary.total
        );
    } else {
        println!(
            "⚠️ {} finished: {} ok, {} failed",
            summary.pipeline, summary.succeeded, summary.failed
        );
    }
    println!("📁 Report saved to: {}", summary.report_path);

    if summary.failed > 0 {
        1
    } else {
        0
    }
}

async fn build_command(args: &BuildArgs, file: TomlConfig, monitor: bool) -> imagenie::Result<i32> {
    let tools = file.tools.clone();
    let settings = args.settings(file)?;

    let storage = LocalStorage::new(settings.output_dir.clone());
    let toolchain = Toolchain::new(runner(args.dry_run), tools);
    let engine =
        ImagenieEngine::new_with_monitoring(BuildPipeline::new(storage, toolchain, settings), monitor);

    let summary = engine.run().await?;
    if summary.failed > 0 {
        let report = engine
            .pipeline()
            .settings()
            .output_dir
            .join(&summary.report_path);
        eprintln!("💡 See {} for the failing step and a suggested fix", report.display());
    }
    Ok(print_summary(&summary))
}

async fn render_command(args: &RenderArgs, mut file: TomlConfig) -> imagenie::Result<i32> {
    args.dockerfile.apply(&mut file);
    let packages = args.dockerfile.packages_path(&file)?;
    let list = PackageList::from_file(&packages, &file.strip)?;

    let out = args.out.clone().unwrap_or_else(|| PathBuf::from("./context"));
    let context = render_context(&out, &file.dockerfile, &list).await?;

    println!("✅ Wrote {}", context.dockerfile.display());
    println!("✅ Wrote {}", context.dockerignore.display());
    println!("✅ Wrote {}", context.requirements.display());
    Ok(0)
}

async fn mirror_command(args: &MirrorArgs, file: TomlConfig, monitor: bool) -> imagenie::Result<i32> {
    let settings = args.settings(&file)?;
    let toolchain = Toolchain::new(runner(args.dry_run), file.tools.clone());
    let hub = DockerHubClient::new(&file.hub.base_url)?
        .with_page_size(file.hub.page_size)
        .with_max_pages(file.hub.max_pages);

    match file.storage.backend {
        StorageBackend::Local => {
            let storage = LocalStorage::new(settings.output_dir.clone());
            run_mirror(storage, toolchain, hub, settings, monitor).await
        }
        #[cfg(feature = "s3")]
        StorageBackend::S3 => {
            let bucket = file
                .storage
                .bucket
                .clone()
                .ok_or_else(|| ImagenieError::MissingConfigError {
                    field: "storage.bucket".to_string(),
                })?;
            let storage = imagenie::adapters::s3::S3Storage::from_env(
                bucket,
                file.storage.prefix.clone().unwrap_or_default(),
                file.storage.region.clone(),
            )
            .await;
            run_mirror(storage, toolchain, hub, settings, monitor).await
        }
        #[cfg(not(feature = "s3"))]
        StorageBackend::S3 => Err(ImagenieError::ConfigError {
            message: "storage.backend = \"s3\" requires building with --features s3".to_string(),
        }),
    }
}

async fn run_mirror<S: Storage>(
    storage: S,
    toolchain: Toolchain,
    hub: DockerHubClient,
    settings: MirrorSettings,
    monitor: bool,
) -> imagenie::Result<i32> {
    let pipeline = MirrorPipeline::new(storage, toolchain, hub, settings)?;
    let engine = ImagenieEngine::new_with_monitoring(pipeline, monitor);
    let summary = engine.run().await?;
    Ok(print_summary(&summary))
}

async fn doctor_command(file: &TomlConfig) -> imagenie::Result<i32> {
    let toolchain = Toolchain::new(Arc::new(ProcessRunner::new()), file.tools.clone());
    let paths = toolchain.paths();
    let tools = [
        paths.docker.as_str(),
        paths.singularity.as_str(),
        paths.skopeo.as_str(),
        paths.trivy.as_str(),
    ];

    let missing = toolchain.check_available(&tools).await;
    if missing.is_empty() {
        println!("✅ All tools available");
        return Ok(0);
    }
    for tool in &missing {
        eprintln!("❌ {} is not usable", tool);
    }
    Ok(1)
}

fn diagnose_command(input: &str) -> anyhow::Result<()> {
    let text = if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(input).with_context(|| format!("failed to read {}", input))?
    };

    let hits = troubleshoot::diagnose(&text);
    if hits.is_empty() {
        println!("🤷 No known failure pattern found");
        return Ok(());
    }
    for symptom in hits {
        println!("🔎 [{}] {}", symptom.id, symptom.title);
        println!("   💡 {}", symptom.remedy);
    }
    Ok(())
}
