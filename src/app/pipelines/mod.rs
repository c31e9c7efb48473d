pub mod build_pipeline;
pub mod mirror_pipeline;

pub use build_pipeline::{BuildPipeline, BuildSettings};
pub use mirror_pipeline::{MirrorPipeline, MirrorSettings};
