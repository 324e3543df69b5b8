//! Execution log file commands.

use std::path::Path;

use crate::adapter::inbound::cli::output;
use crate::error::Result;
use crate::infrastructure::log::{self, LogFormat};

/// Convert a full log into a compacted one.
pub fn execute_compact(source: &Path, destination: &Path) -> Result<()> {
    let records = log::compact(source, destination)?;
    report_conversion(source, destination, records);
    Ok(())
}

/// Convert a compacted log into a full one.
pub fn execute_expand(source: &Path, destination: &Path) -> Result<()> {
    let records = log::expand(source, destination)?;
    report_conversion(source, destination, records);
    Ok(())
}

fn report_conversion(source: &Path, destination: &Path, records: usize) {
    let before = std::fs::metadata(source).map(|m| m.len()).ok();
    let after = std::fs::metadata(destination).map(|m| m.len()).ok();

    output::section("Converted");
    output::field("Source", source.display());
    output::field("Destination", destination.display());
    output::field("Records", records);
    if let (Some(before), Some(after)) = (before, after) {
        output::field("Bytes", format!("{before} -> {after}"));
    }
    output::success("Conversion complete");
}

/// Print the records of a log file.
pub fn execute_cat(path: &Path, limit: Option<usize>) -> Result<()> {
    let format = LogFormat::from_path(path)?;
    let records = log::read_log(path)?;

    for record in records.iter().take(limit.unwrap_or(usize::MAX)) {
        output::record(record);
    }
    tracing::debug!(path = %path.display(), format = ?format, records = records.len(), "Printed log");
    Ok(())
}
