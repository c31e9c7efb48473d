use crate::core::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub pipeline: String,
    pub report_path: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct ImagenieEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> ImagenieEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(false),
        }
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let name = self.pipeline.name().to_string();
        tracing::info!("🚀 Starting {} pipeline", name);
        self.monitor.log_stats("start");

        tracing::info!("📥 Collecting inputs...");
        let items = self.pipeline.extract().await?;
        tracing::info!("📥 Collected {} items", items.len());
        self.monitor.log_stats("extract");

        tracing::info!("🔧 Processing images...");
        let report = self.pipeline.transform(items).await?;
        let total = report.outcomes.len();
        let succeeded = report.succeeded();
        let failed = report.failed();
        tracing::info!("🔧 Processed {} images ({} ok, {} failed)", total, succeeded, failed);
        self.monitor.log_stats("transform");

        tracing::info!("📤 Publishing results...");
        let report_path = self.pipeline.load(report).await?;
        self.monitor.log_stats("load");
        self.monitor.log_final_stats();

        tracing::info!("📁 Report saved to: {}", report_path);
        Ok(RunSummary {
            pipeline: name,
            report_path,
            total,
            succeeded,
            failed,
        })
    }
}
