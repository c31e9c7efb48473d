use crate::domain::model::{OutcomeRow, RunReport};
use crate::domain::ports::Storage;
use crate::utils::error::{ImagenieError, Result};

pub const REPORT_JSON: &str = "report.json";
pub const REPORT_CSV: &str = "report.csv";

pub fn render_csv(report: &RunReport) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for outcome in &report.outcomes {
        writer.serialize(OutcomeRow::from(outcome))?;
    }
    writer
        .into_inner()
        .map_err(|e| ImagenieError::ProcessingError {
            message: format!("Failed to flush CSV report: {}", e),
        })
}

/// Writes `report.json` and `report.csv`; returns the JSON key.
pub async fn write_report<S: Storage>(storage: &S, report: &RunReport) -> Result<String> {
    let json = serde_json::to_vec_pretty(report)?;
    storage.write_file(REPORT_JSON, &json).await?;

    let csv = render_csv(report)?;
    storage.write_file(REPORT_CSV, &csv).await?;

    tracing::debug!(
        "Report written: {} outcomes, {} failed",
        report.outcomes.len(),
        report.failed()
    );
    Ok(REPORT_JSON.to_string())
}
