pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::TomlConfig;

pub use adapters::{hub::DockerHubClient, runner::ProcessRunner, storage::LocalStorage};
pub use app::pipelines::{BuildPipeline, BuildSettings, MirrorPipeline, MirrorSettings};
pub use core::{engine::ImagenieEngine, toolchain::Toolchain};
pub use utils::error::{ImagenieError, Result};
