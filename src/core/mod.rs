pub mod dockerfile;
pub mod engine;
pub mod report;
pub mod specifier;
pub mod toolchain;
pub mod troubleshoot;

pub use crate::domain::model::{ImageOutcome, ImageRef, RunReport, ScanVerdict, Stage};
pub use crate::domain::ports::{CommandRunner, Pipeline, Storage, ToolCommand, ToolOutput};
pub use crate::utils::error::Result;
