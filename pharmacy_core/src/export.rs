//! CSV export and import.
//!
//! Collections export in their storage schema so that an exported file can
//! be imported again unchanged. Report tables export as plain serialized rows.

use crate::store::{read_records, records_to_csv, write_atomic, Record};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// `<name>_export_<YYYYmmdd_HHMMSS>.csv`
pub fn export_file_name(name: &str, at: DateTime<Utc>) -> String {
    format!("{}_export_{}.csv", name, at.format("%Y%m%d_%H%M%S"))
}

/// Write a collection to `path` in its storage schema
pub fn export_records<T: Record>(path: &Path, records: &[T]) -> Result<usize> {
    let bytes = records_to_csv(records)?;
    write_atomic(path, &bytes)?;
    tracing::info!("Exported {} {} records to {:?}", records.len(), T::ENTITY, path);
    Ok(records.len())
}

/// Write a collection into `dir` under a timestamped file name
pub fn export_records_to_dir<T: Record>(
    dir: &Path,
    name: &str,
    records: &[T],
    at: DateTime<Utc>,
) -> Result<PathBuf> {
    let path = dir.join(export_file_name(name, at));
    export_records(&path, records)?;
    Ok(path)
}

/// Read an exported collection back into typed records
///
/// Columns are matched by header name, so their order does not matter.
pub fn import_records<T: Record>(path: &Path) -> Result<Vec<T>> {
    let records = read_records::<T>(path)?;
    tracing::info!("Read {} {} records for import from {:?}", records.len(), T::ENTITY, path);
    Ok(records)
}

/// Serialize report rows to CSV text
pub fn table_to_csv<R: Serialize>(rows: &[R]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    String::from_utf8(bytes)
        .map_err(|e| crate::Error::Other(format!("CSV output is not UTF-8: {}", e)))
}

/// Write report rows to `path`
pub fn export_table<R: Serialize>(path: &Path, rows: &[R]) -> Result<usize> {
    let text = table_to_csv(rows)?;
    write_atomic(path, text.as_bytes())?;
    tracing::info!("Exported {} report rows to {:?}", rows.len(), path);
    Ok(rows.len())
}
