// Adapters layer: concrete implementations for external systems (processes, Docker Hub, storage).

pub mod hub;
pub mod runner;
#[cfg(feature = "s3")]
pub mod s3;
pub mod storage;
