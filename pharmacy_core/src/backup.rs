//! Timestamped backup archives of the data directory.
//!
//! A backup is a gzip-compressed tar holding every persisted file plus a
//! `backup_metadata.json` and a human-readable `backup_report.txt`. Archives
//! are neither encrypted nor signed, and there is no restore command.

use crate::store::Collections;
use crate::{Error, PrescriptionStatus, Result};
use chrono::{DateTime, NaiveDate, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const METADATA_FILE: &str = "backup_metadata.json";
pub const REPORT_FILE: &str = "backup_report.txt";
const ARCHIVE_EXTENSION: &str = ".tar.gz";

/// Stored inside every archive
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BackupMetadata {
    pub backup_name: String,
    pub created_at: DateTime<Utc>,
    pub app_version: String,
    pub tables: Vec<String>,
    pub record_counts: BTreeMap<String, usize>,
    pub files: Vec<String>,
}

/// An archive found in the backup directory
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct BackupInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Default)]
pub struct StorageInfo {
    pub total_backups: usize,
    pub total_size_bytes: u64,
}

impl StorageInfo {
    pub fn total_size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// `pharmacy_backup_<YYYYmmdd_HHMMSS>`
pub fn default_backup_name(at: DateTime<Utc>) -> String {
    format!("pharmacy_backup_{}", at.format("%Y%m%d_%H%M%S"))
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty()
        || name.contains(['/', '\\'])
        || name.starts_with('.')
    {
        return Err(Error::Validation(format!("invalid backup name '{}'", name)));
    }
    Ok(())
}

pub fn archive_path(backup_dir: &Path, name: &str) -> PathBuf {
    backup_dir.join(format!("{}{}", name, ARCHIVE_EXTENSION))
}

/// Bundle `files` (those that exist) into a new archive in `backup_dir`
///
/// Fails with `DuplicateId` rather than overwrite an existing archive.
pub fn create_backup(
    backup_dir: &Path,
    name: &str,
    files: &[PathBuf],
    collections: &Collections,
    created_at: DateTime<Utc>,
) -> Result<(BackupInfo, BackupMetadata)> {
    validate_name(name)?;
    std::fs::create_dir_all(backup_dir)?;
    let path = archive_path(backup_dir, name);
    if path.exists() {
        return Err(Error::duplicate("Backup", name));
    }

    let included: Vec<&PathBuf> = files.iter().filter(|p| p.is_file()).collect();
    let file_names: Vec<String> = included
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();

    let mut record_counts = BTreeMap::new();
    record_counts.insert("customers".to_string(), collections.customers.len());
    record_counts.insert("medicines".to_string(), collections.medicines.len());
    record_counts.insert("prescriptions".to_string(), collections.prescriptions.len());
    record_counts.insert("refill_reminders".to_string(), collections.reminders.len());

    let metadata = BackupMetadata {
        backup_name: name.to_string(),
        created_at,
        app_version: env!("CARGO_PKG_VERSION").into(),
        tables: record_counts.keys().cloned().collect(),
        record_counts,
        files: file_names.clone(),
    };
    let report = render_report(&metadata, collections, created_at.date_naive());

    let temp = NamedTempFile::new_in(backup_dir)?;
    {
        let gz = GzEncoder::new(temp.as_file(), Compression::default());
        let mut tar = tar::Builder::new(gz);

        for (path, file_name) in included.iter().zip(&file_names) {
            tar.append_path_with_name(path, file_name)?;
        }

        let mtime = u64::try_from(created_at.timestamp()).unwrap_or(0);
        append_bytes(&mut tar, METADATA_FILE, &serde_json::to_vec_pretty(&metadata)?, mtime)?;
        append_bytes(&mut tar, REPORT_FILE, report.as_bytes(), mtime)?;

        tar.into_inner()?.finish()?;
    }
    temp.as_file().sync_all()?;
    persist_archive(temp, &path, name)?;

    let info = backup_info(&path)?;
    tracing::info!(
        files = metadata.files.len(),
        size_bytes = info.size_bytes,
        "Backup created at {:?}",
        path
    );
    Ok((info, metadata))
}

/// Move the finished archive into place; a concurrent writer of the same name wins
fn persist_archive(temp: NamedTempFile, path: &Path, name: &str) -> Result<()> {
    match temp.persist_noclobber(path) {
        Ok(_) => Ok(()),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(Error::duplicate("Backup", name))
        }
        Err(e) => Err(Error::Io(e.error)),
    }
}

fn append_bytes<W: Write>(
    tar: &mut tar::Builder<W>,
    name: &str,
    data: &[u8],
    mtime: u64,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    tar.append_data(&mut header, name, data)?;
    Ok(())
}

fn backup_info(path: &Path) -> Result<BackupInfo> {
    let meta = std::fs::metadata(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(BackupInfo {
        name: file_name
            .strip_suffix(ARCHIVE_EXTENSION)
            .unwrap_or(&file_name)
            .to_string(),
        path: path.to_path_buf(),
        size_bytes: meta.len(),
        modified: meta.modified().map(DateTime::<Utc>::from)?,
    })
}

/// Archives in `backup_dir`, newest first
pub fn list_backups(backup_dir: &Path) -> Result<Vec<BackupInfo>> {
    if !backup_dir.exists() {
        return Ok(Vec::new());
    }
    let mut backups = Vec::new();
    for entry in std::fs::read_dir(backup_dir)? {
        let path = entry?.path();
        let is_archive = path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(ARCHIVE_EXTENSION))
            .unwrap_or(false);
        if is_archive && path.is_file() {
            backups.push(backup_info(&path)?);
        }
    }
    backups.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
    Ok(backups)
}

/// Metadata stored in an archive, if it has any
pub fn read_metadata(archive: &Path) -> Result<Option<BackupMetadata>> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    for entry in tar.entries()? {
        let mut entry = entry?;
        if entry.path()?.as_ref() == Path::new(METADATA_FILE) {
            let mut contents = String::new();
            entry.read_to_string(&mut contents)?;
            return Ok(Some(serde_json::from_str(&contents)?));
        }
    }
    Ok(None)
}

/// Names of the entries in an archive
pub fn archive_entries(archive: &Path) -> Result<Vec<String>> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    let mut names = Vec::new();
    for entry in tar.entries()? {
        names.push(entry?.path()?.to_string_lossy().into_owned());
    }
    Ok(names)
}

/// Remove an archive; `false` if it was already gone
pub fn delete_backup(archive: &Path) -> Result<bool> {
    if !archive.exists() {
        return Ok(false);
    }
    std::fs::remove_file(archive)?;
    tracing::info!("Deleted backup {:?}", archive);
    Ok(true)
}

pub fn storage_info(backup_dir: &Path) -> Result<StorageInfo> {
    let backups = list_backups(backup_dir)?;
    Ok(StorageInfo {
        total_backups: backups.len(),
        total_size_bytes: backups.iter().map(|b| b.size_bytes).sum(),
    })
}

fn render_report(metadata: &BackupMetadata, data: &Collections, today: NaiveDate) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "PHARMACY MANAGEMENT SYSTEM - BACKUP REPORT");
    let _ = writeln!(out, "{}", "=".repeat(50));
    let _ = writeln!(out);
    let _ = writeln!(out, "Backup Name: {}", metadata.backup_name);
    let _ = writeln!(out, "Created: {}", metadata.created_at.to_rfc3339());
    let _ = writeln!(out, "Tables Included: {}", metadata.tables.len());
    let _ = writeln!(out);
    let _ = writeln!(out, "DATA SUMMARY:");
    let _ = writeln!(out, "{}", "-".repeat(20));
    for (table, count) in &metadata.record_counts {
        let _ = writeln!(out, "{}: {} records", table, count);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "SYSTEM STATUS AT BACKUP:");
    let _ = writeln!(out, "{}", "-".repeat(30));

    let low: Vec<_> = data
        .medicines
        .iter()
        .filter(|m| m.stock_quantity <= m.reorder_level)
        .collect();
    let _ = writeln!(out, "Low Stock Medicines: {}", low.len());
    for med in &low {
        let _ = writeln!(out, "  - {}: {} units", med.name, med.stock_quantity);
    }

    let expiring: Vec<_> = data
        .medicines
        .iter()
        .filter(|m| m.days_until_expiry(today) <= 30)
        .collect();
    let _ = writeln!(out);
    let _ = writeln!(out, "Medicines Expiring Soon: {}", expiring.len());
    for med in &expiring {
        let _ = writeln!(out, "  - {}: Expires {}", med.name, med.expiry_date);
    }

    if !data.prescriptions.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Prescription Status:");
        for status in [
            PrescriptionStatus::Pending,
            PrescriptionStatus::PartiallyFilled,
            PrescriptionStatus::Completed,
            PrescriptionStatus::Cancelled,
        ] {
            let count = data.prescriptions.iter().filter(|p| p.status == status).count();
            if count > 0 {
                let _ = writeln!(out, "  - {:?}: {}", status, count);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Medicine;
    use chrono::TimeZone;

    fn collections() -> Collections {
        Collections {
            medicines: vec![Medicine {
                id: "MED-1".into(),
                name: "Paracetamol".into(),
                category: "Analgesic".into(),
                manufacturer: None,
                supplier: None,
                barcode: None,
                cost_price: 1.0,
                selling_price: 2.0,
                stock_quantity: 3,
                reorder_level: 10,
                expiry_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                description: None,
                date_added: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            }],
            ..Default::default()
        }
    }

    fn created_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_default_name() {
        assert_eq!(default_backup_name(created_at()), "pharmacy_backup_20240102_030405");
    }

    #[test]
    fn test_create_and_inspect_backup() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data_file = temp_dir.path().join("medicines.csv");
        std::fs::write(&data_file, "id,name\n").unwrap();
        let missing = temp_dir.path().join("customers.csv");
        let backup_dir = temp_dir.path().join("backups");

        let (info, metadata) = create_backup(
            &backup_dir,
            "nightly",
            &[data_file, missing],
            &collections(),
            created_at(),
        )
        .unwrap();

        assert_eq!(info.name, "nightly");
        assert!(info.path.ends_with("nightly.tar.gz"));
        assert_eq!(metadata.files, vec!["medicines.csv".to_string()]);
        assert_eq!(metadata.record_counts["medicines"], 1);

        let entries = archive_entries(&info.path).unwrap();
        assert_eq!(entries, vec!["medicines.csv", METADATA_FILE, REPORT_FILE]);

        let stored = read_metadata(&info.path).unwrap().unwrap();
        assert_eq!(stored, metadata);
    }

    #[test]
    fn test_report_lists_alerts() {
        let report = render_report(
            &BackupMetadata {
                backup_name: "b".into(),
                created_at: created_at(),
                app_version: "0".into(),
                tables: vec![],
                record_counts: BTreeMap::new(),
                files: vec![],
            },
            &collections(),
            created_at().date_naive(),
        );
        assert!(report.contains("Low Stock Medicines: 1"));
        assert!(report.contains("  - Paracetamol: Expires 2024-01-15"));
    }

    #[test]
    fn test_existing_backup_not_overwritten() {
        let temp_dir = tempfile::tempdir().unwrap();
        create_backup(temp_dir.path(), "same", &[], &Collections::default(), created_at()).unwrap();
        let err = create_backup(temp_dir.path(), "same", &[], &Collections::default(), created_at())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateId { .. }));
    }

    #[test]
    fn test_archive_appearing_mid_backup_is_kept() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = archive_path(temp_dir.path(), "race");
        std::fs::write(&path, b"first writer").unwrap();

        let mut late = NamedTempFile::new_in(temp_dir.path()).unwrap();
        late.write_all(b"second writer").unwrap();
        let err = persist_archive(late, &path, "race").unwrap_err();

        assert!(matches!(err, Error::DuplicateId { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), b"first writer");
    }

    #[test]
    fn test_invalid_names_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        for name in ["", "../escape", ".hidden"] {
            assert!(matches!(
                create_backup(temp_dir.path(), name, &[], &Collections::default(), created_at()),
                Err(Error::Validation(_))
            ));
        }
    }

    #[test]
    fn test_list_storage_and_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        create_backup(dir, "one", &[], &Collections::default(), created_at()).unwrap();
        create_backup(dir, "two", &[], &Collections::default(), created_at()).unwrap();
        std::fs::write(dir.join("notes.txt"), "not a backup").unwrap();

        let backups = list_backups(dir).unwrap();
        assert_eq!(backups.len(), 2);

        let storage = storage_info(dir).unwrap();
        assert_eq!(storage.total_backups, 2);
        assert!(storage.total_size_bytes > 0);

        assert!(delete_backup(&archive_path(dir, "one")).unwrap());
        assert!(!delete_backup(&archive_path(dir, "one")).unwrap());
        assert_eq!(list_backups(dir).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_dir_lists_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(list_backups(&temp_dir.path().join("nope")).unwrap().is_empty());
    }
}
