//! Barcode lookup and scan tracking.
//!
//! Barcodes resolve through a keyed table built once from reference data
//! (`barcodes.json` when present, otherwise the built-in codes), falling back
//! to the `barcode` column of the medicine itself. Every successful scan is
//! appended to a JSON-lines log under an exclusive file lock.

use crate::{Medicine, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

static DEFAULT_CODES: Lazy<BTreeMap<String, String>> = Lazy::new(|| {
    [
        ("PARA001", "Paracetamol"),
        ("AMOX002", "Amoxicillin"),
        ("IBUP003", "Ibuprofen"),
        ("CETI004", "Cetirizine"),
        ("OMEP005", "Omeprazole"),
    ]
    .into_iter()
    .map(|(code, name)| (code.to_string(), name.to_string()))
    .collect()
});

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Barcode → medicine name mapping
#[derive(Clone, Debug, Default)]
pub struct BarcodeTable {
    codes: HashMap<String, String>,
}

impl BarcodeTable {
    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        let codes = map
            .into_iter()
            .map(|(code, name)| (normalize_code(&code), name.trim().to_string()))
            .collect();
        Self { codes }
    }

    pub fn builtin() -> Self {
        Self::from_map(DEFAULT_CODES.clone())
    }

    /// Load `path` (a JSON object of code → name) if present, else the built-in codes
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::builtin());
        }
        let contents = std::fs::read_to_string(path)?;
        let map: BTreeMap<String, String> = serde_json::from_str(&contents)?;
        tracing::info!("Loaded {} barcodes from {:?}", map.len(), path);
        Ok(Self::from_map(map))
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn medicine_name(&self, code: &str) -> Option<&str> {
        self.codes.get(&normalize_code(code)).map(String::as_str)
    }

    /// Resolve a barcode against the inventory
    ///
    /// A medicine's own `barcode` column wins over the reference table.
    pub fn resolve<'a>(&self, code: &str, medicines: &'a [Medicine]) -> Option<&'a Medicine> {
        let key = normalize_code(code);
        if key.is_empty() {
            return None;
        }
        if let Some(found) = medicines
            .iter()
            .find(|m| m.barcode.as_deref().map(normalize_code).as_deref() == Some(key.as_str()))
        {
            return Some(found);
        }
        let name = self.codes.get(&key)?;
        medicines.iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }
}

/// One recorded scan
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScanRecord {
    pub id: Uuid,
    pub barcode: String,
    pub medicine_id: String,
    pub medicine_name: String,
    pub quantity: u32,
    pub scanned_at: DateTime<Utc>,
}

impl ScanRecord {
    pub fn new(barcode: &str, medicine: &Medicine, quantity: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            barcode: normalize_code(barcode),
            medicine_id: medicine.id.clone(),
            medicine_name: medicine.name.clone(),
            quantity,
            scanned_at: Utc::now(),
        }
    }
}

/// JSON-lines scan log with file locking
pub struct ScanLog {
    path: PathBuf,
}

impl ScanLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &ScanRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(record)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);
        file.sync_data()?;

        file.unlock()?;
        tracing::debug!("Recorded scan {} of {}", record.id, record.barcode);
        Ok(())
    }

    /// Read every scan; malformed lines are skipped with a warning
    pub fn read_all(&self) -> Result<Vec<ScanRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        file.lock_shared()?;

        let reader = BufReader::new(&file);
        let mut records = Vec::new();
        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ScanRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Failed to parse scan at line {}: {}", line_num + 1, e);
                }
            }
        }

        file.unlock()?;
        Ok(records)
    }
}

/// Aggregate view of the scan log
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ScanAnalytics {
    pub total_scans: usize,
    pub unique_medicines: usize,
    pub total_quantity: u64,
    /// Medicine name and scan count, most scanned first
    pub most_scanned: Vec<(String, usize)>,
    pub last_scan: Option<DateTime<Utc>>,
}

pub fn scan_analytics(records: &[ScanRecord]) -> ScanAnalytics {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.medicine_name.as_str()).or_default() += 1;
    }
    let mut most_scanned: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    // Stable sort keeps names alphabetical within equal counts
    most_scanned.sort_by(|a, b| b.1.cmp(&a.1));

    ScanAnalytics {
        total_scans: records.len(),
        unique_medicines: most_scanned.len(),
        total_quantity: records.iter().map(|r| u64::from(r.quantity)).sum(),
        most_scanned,
        last_scan: records.iter().map(|r| r.scanned_at).max(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn medicine(id: &str, name: &str, barcode: Option<&str>) -> Medicine {
        Medicine {
            id: id.into(),
            name: name.into(),
            category: "General".into(),
            manufacturer: None,
            supplier: None,
            barcode: barcode.map(String::from),
            cost_price: 1.0,
            selling_price: 2.0,
            stock_quantity: 100,
            reorder_level: 10,
            expiry_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            description: None,
            date_added: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        }
    }

    #[test]
    fn test_builtin_lookup_is_case_insensitive() {
        let table = BarcodeTable::builtin();
        assert_eq!(table.len(), 5);
        assert_eq!(table.medicine_name("para001"), Some("Paracetamol"));
        assert_eq!(table.medicine_name(" AMOX002 "), Some("Amoxicillin"));
        assert_eq!(table.medicine_name("NOPE"), None);
    }

    #[test]
    fn test_resolve_prefers_medicine_barcode() {
        let table = BarcodeTable::builtin();
        let medicines = vec![
            medicine("MED-1", "Paracetamol", None),
            medicine("MED-2", "Paracetamol Forte", Some("para001")),
        ];
        assert_eq!(table.resolve("PARA001", &medicines).unwrap().id, "MED-2");
    }

    #[test]
    fn test_resolve_through_reference_table() {
        let table = BarcodeTable::builtin();
        let medicines = vec![medicine("MED-1", "ibuprofen", None)];
        assert_eq!(table.resolve("IBUP003", &medicines).unwrap().id, "MED-1");
        assert!(table.resolve("CETI004", &medicines).is_none());
        assert!(table.resolve("", &medicines).is_none());
    }

    #[test]
    fn test_custom_barcode_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("barcodes.json");
        std::fs::write(&path, r#"{"abc123": "Aspirin"}"#).unwrap();

        let table = BarcodeTable::load_or_default(&path).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.medicine_name("ABC123"), Some("Aspirin"));
    }

    #[test]
    fn test_scan_log_append_and_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log = ScanLog::new(temp_dir.path().join("scans.jsonl"));
        let med = medicine("MED-1", "Paracetamol", None);

        log.append(&ScanRecord::new("para001", &med, 2)).unwrap();
        log.append(&ScanRecord::new("PARA001", &med, 3)).unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].barcode, "PARA001");
    }

    #[test]
    fn test_scan_log_skips_corrupt_lines() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("scans.jsonl");
        let log = ScanLog::new(&path);
        let med = medicine("MED-1", "Paracetamol", None);
        log.append(&ScanRecord::new("PARA001", &med, 1)).unwrap();

        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("{ not json }\n");
        std::fs::write(&path, contents).unwrap();

        assert_eq!(log.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_scan_analytics() {
        let para = medicine("MED-1", "Paracetamol", None);
        let ibu = medicine("MED-2", "Ibuprofen", None);
        let records = vec![
            ScanRecord::new("PARA001", &para, 1),
            ScanRecord::new("IBUP003", &ibu, 4),
            ScanRecord::new("PARA001", &para, 2),
        ];

        let analytics = scan_analytics(&records);
        assert_eq!(analytics.total_scans, 3);
        assert_eq!(analytics.unique_medicines, 2);
        assert_eq!(analytics.total_quantity, 7);
        assert_eq!(analytics.most_scanned[0], ("Paracetamol".to_string(), 2));
        assert!(analytics.last_scan.is_some());
    }

    #[test]
    fn test_empty_analytics() {
        assert_eq!(scan_analytics(&[]), ScanAnalytics::default());
    }
}
