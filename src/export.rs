use std::path::{Path, PathBuf};

use log::info;

use crate::acquisition::RunResult;
use crate::error::AcqError;

/// Header row of an exported run.
#[derive(Debug, Clone)]
pub struct ColumnNames {
    pub time: String,
    pub value: String,
    pub derived: String,
}

impl ColumnNames {
    pub fn new(time: &str, value: &str, derived: &str) -> Self {
        Self {
            time: time.to_string(),
            value: value.to_string(),
            derived: derived.to_string(),
        }
    }
}

/// Write a run as `time, value, derived` rows.
///
/// `derived` must hold one value per sample.
pub fn write_run_csv(
    path: impl AsRef<Path>,
    run: &RunResult,
    derived: &[f64],
    columns: &ColumnNames,
) -> Result<PathBuf, AcqError> {
    let path = path.as_ref();
    if derived.len() != run.samples.len() {
        return Err(AcqError::Data(format!(
            "derived column has {} values for {} samples",
            derived.len(),
            run.samples.len()
        )));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| AcqError::io(e, format!("Failed to create {}", parent.display())))?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([&columns.time, &columns.value, &columns.derived])?;
    for (sample, d) in run.samples.iter().zip(derived) {
        writer.write_record([
            sample.elapsed_s.to_string(),
            sample.value.to_string(),
            d.to_string(),
        ])?;
    }
    writer
        .flush()
        .map_err(|e| AcqError::io(e, format!("Failed to flush {}", path.display())))?;

    info!("Wrote {} rows to {}", run.samples.len(), path.display());
    Ok(path.to_path_buf())
}
