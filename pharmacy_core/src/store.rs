//! CSV record store with atomic saves and file locking.
//!
//! Each entity collection lives in its own CSV file with a fixed column
//! schema. Rows are deserialized into typed records and validated on load;
//! a row that fails is reported as a schema error, never dropped. Saves
//! rewrite the whole collection through a temp file that replaces the
//! original, so readers never observe a half-written file.

use crate::types::LIST_SEPARATOR;
use crate::{Customer, Error, Medicine, Prescription, RefillReminder, Result};
use chrono::NaiveDate;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;

/// Name of the advisory lock file in the data directory
pub const LOCK_FILE: &str = ".pharmacy.lock";

/// A record type persisted as one CSV file
pub trait Record: Clone + Sized {
    /// Human-readable entity name for error messages
    const ENTITY: &'static str;
    /// File name inside the data directory
    const FILE_NAME: &'static str;
    /// Column names, in serialization order
    const HEADERS: &'static [&'static str];
    /// On-disk row shape
    type Row: Serialize + DeserializeOwned;

    fn id(&self) -> &str;
    fn to_row(&self) -> Self::Row;
    fn from_row(row: Self::Row) -> std::result::Result<Self, String>;
}

impl Record for Medicine {
    const ENTITY: &'static str = "Medicine";
    const FILE_NAME: &'static str = "medicines.csv";
    const HEADERS: &'static [&'static str] = &[
        "id", "name", "category", "manufacturer", "supplier", "barcode", "cost_price",
        "selling_price", "stock_quantity", "reorder_level", "expiry_date", "description",
        "date_added",
    ];
    type Row = Medicine;

    fn id(&self) -> &str {
        &self.id
    }

    fn to_row(&self) -> Self::Row {
        self.clone()
    }

    fn from_row(row: Self::Row) -> std::result::Result<Self, String> {
        row.validate()?;
        Ok(row)
    }
}

impl Record for Prescription {
    const ENTITY: &'static str = "Prescription";
    const FILE_NAME: &'static str = "prescriptions.csv";
    const HEADERS: &'static [&'static str] = &[
        "id", "customer_id", "medicine_id", "quantity", "dosage", "instructions", "doctor",
        "date_issued", "status", "total_cost", "source", "created_at",
    ];
    type Row = Prescription;

    fn id(&self) -> &str {
        &self.id
    }

    fn to_row(&self) -> Self::Row {
        self.clone()
    }

    fn from_row(row: Self::Row) -> std::result::Result<Self, String> {
        row.validate()?;
        Ok(row)
    }
}

impl Record for RefillReminder {
    const ENTITY: &'static str = "RefillReminder";
    const FILE_NAME: &'static str = "refill_reminders.csv";
    const HEADERS: &'static [&'static str] = &[
        "id", "customer_id", "medicine_id", "interval_days", "last_fill_date", "state",
        "dosage", "quantity_per_refill", "notes", "created_at",
    ];
    type Row = RefillReminder;

    fn id(&self) -> &str {
        &self.id
    }

    fn to_row(&self) -> Self::Row {
        self.clone()
    }

    fn from_row(row: Self::Row) -> std::result::Result<Self, String> {
        row.validate()?;
        Ok(row)
    }
}

/// CSV row format for customers (list columns flattened)
#[derive(Debug, Serialize, Deserialize)]
pub struct CustomerRow {
    id: String,
    name: String,
    phone: Option<String>,
    email: Option<String>,
    address: Option<String>,
    gender: Option<String>,
    date_of_birth: Option<NaiveDate>,
    allergies: String,
    conditions: String,
    emergency_contact: Option<String>,
    date_registered: NaiveDate,
}

fn join_list(items: &[String]) -> String {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(&LIST_SEPARATOR.to_string())
}

fn split_list(field: &str) -> Vec<String> {
    field
        .split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Record for Customer {
    const ENTITY: &'static str = "Customer";
    const FILE_NAME: &'static str = "customers.csv";
    const HEADERS: &'static [&'static str] = &[
        "id", "name", "phone", "email", "address", "gender", "date_of_birth", "allergies",
        "conditions", "emergency_contact", "date_registered",
    ];
    type Row = CustomerRow;

    fn id(&self) -> &str {
        &self.id
    }

    fn to_row(&self) -> Self::Row {
        CustomerRow {
            id: self.id.clone(),
            name: self.name.clone(),
            phone: self.phone.clone(),
            email: self.email.clone(),
            address: self.address.clone(),
            gender: self.gender.clone(),
            date_of_birth: self.date_of_birth,
            allergies: join_list(&self.allergies),
            conditions: join_list(&self.conditions),
            emergency_contact: self.emergency_contact.clone(),
            date_registered: self.date_registered,
        }
    }

    fn from_row(row: Self::Row) -> std::result::Result<Self, String> {
        let customer = Customer {
            id: row.id,
            name: row.name,
            phone: row.phone,
            email: row.email,
            address: row.address,
            gender: row.gender,
            date_of_birth: row.date_of_birth,
            allergies: split_list(&row.allergies),
            conditions: split_list(&row.conditions),
            emergency_contact: row.emergency_contact,
            date_registered: row.date_registered,
        };
        customer.validate()?;
        Ok(customer)
    }
}

/// Read typed records from a CSV file
///
/// A missing file is an empty collection. Any row that fails to parse or
/// validate, or repeats an earlier id, aborts the load with `Error::Schema`.
pub fn read_records<T: Record>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        tracing::debug!("No {} file at {:?}", T::ENTITY, path);
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    // Acquire shared lock for reading
    file.lock_shared()?;
    let parsed = parse_records::<T>(&file, path);
    file.unlock()?;

    let records = parsed?;
    tracing::debug!("Read {} {} records from {:?}", records.len(), T::ENTITY, path);
    Ok(records)
}

fn parse_records<T: Record>(file: &File, path: &Path) -> Result<Vec<T>> {
    let schema_error = |line: u64, message: String| Error::Schema {
        file: path.to_path_buf(),
        line,
        message,
    };

    let mut reader = csv::Reader::from_reader(file);
    let headers = reader.headers()?.clone();
    let mut records: Vec<T> = Vec::new();
    let mut seen = HashSet::new();

    for result in reader.records() {
        let raw = result.map_err(|e| {
            let line = e.position().map(|p| p.line()).unwrap_or(0);
            schema_error(line, e.to_string())
        })?;
        let line = raw.position().map(|p| p.line()).unwrap_or(0);

        let record = raw
            .deserialize::<T::Row>(Some(&headers))
            .map_err(|e| e.to_string())
            .and_then(T::from_row)
            .map_err(|message| schema_error(line, message))?;

        if !seen.insert(record.id().to_string()) {
            return Err(schema_error(
                line,
                format!("duplicate {} id '{}'", T::ENTITY, record.id()),
            ));
        }
        records.push(record);
    }

    Ok(records)
}

/// Serialize records to CSV in memory (header row always present)
pub fn records_to_csv<T: Record>(records: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record.to_row())?;
    }
    // Empty collections still carry their column header
    if records.is_empty() {
        writer.write_record(T::HEADERS)?;
    }
    writer
        .into_inner()
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
}

/// Atomically replace `path` with `contents`
///
/// Writes a temp file in the same directory, syncs it, then renames it over
/// the original.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "record path missing parent")
    })?;
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    temp.as_file().lock_exclusive()?;
    {
        use std::io::Write;
        let mut writer = std::io::BufWriter::new(temp.as_file());
        writer.write_all(contents)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.as_file().unlock()?;

    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Write a full collection atomically
pub fn write_records<T: Record>(path: &Path, records: &[T]) -> Result<()> {
    let bytes = records_to_csv(records)?;
    write_atomic(path, &bytes)?;
    tracing::debug!("Saved {} {} records to {:?}", records.len(), T::ENTITY, path);
    Ok(())
}

/// Cheap change detector for a file: modification time and length
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
    exists: bool,
}

impl Fingerprint {
    pub fn of(path: &Path) -> Self {
        match std::fs::metadata(path) {
            Ok(meta) => Self {
                modified: meta.modified().ok(),
                len: meta.len(),
                exists: true,
            },
            Err(_) => Self::default(),
        }
    }
}

/// All four record collections held in memory
#[derive(Clone, Debug, Default)]
pub struct Collections {
    pub customers: Vec<Customer>,
    pub medicines: Vec<Medicine>,
    pub prescriptions: Vec<Prescription>,
    pub reminders: Vec<RefillReminder>,
}

/// Location of the persisted files
#[derive(Clone, Debug)]
pub struct RecordStore {
    data_dir: PathBuf,
}

impl RecordStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path_for<T: Record>(&self) -> PathBuf {
        self.data_dir.join(T::FILE_NAME)
    }

    /// Every record file, in a fixed order
    pub fn record_files(&self) -> Vec<PathBuf> {
        vec![
            self.path_for::<Customer>(),
            self.path_for::<Medicine>(),
            self.path_for::<Prescription>(),
            self.path_for::<RefillReminder>(),
        ]
    }

    pub fn load<T: Record>(&self) -> Result<Vec<T>> {
        read_records(&self.path_for::<T>())
    }

    pub fn save<T: Record>(&self, records: &[T]) -> Result<()> {
        write_records(&self.path_for::<T>(), records)
    }

    pub fn load_all(&self) -> Result<Collections> {
        let collections = Collections {
            customers: self.load()?,
            medicines: self.load()?,
            prescriptions: self.load()?,
            reminders: self.load()?,
        };
        tracing::info!(
            customers = collections.customers.len(),
            medicines = collections.medicines.len(),
            prescriptions = collections.prescriptions.len(),
            reminders = collections.reminders.len(),
            "Loaded records from {:?}",
            self.data_dir
        );
        Ok(collections)
    }

    /// Create header-only files for any collection that does not exist yet
    pub fn initialize(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        self.init_file::<Customer>()?;
        self.init_file::<Medicine>()?;
        self.init_file::<Prescription>()?;
        self.init_file::<RefillReminder>()?;
        Ok(())
    }

    fn init_file<T: Record>(&self) -> Result<()> {
        let path = self.path_for::<T>();
        if !path.exists() {
            write_records::<T>(&path, &[])?;
            tracing::info!("Initialized {:?}", path);
        }
        Ok(())
    }

    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.record_files().iter().map(|p| Fingerprint::of(p)).collect()
    }

    /// Take the exclusive advisory lock for a read-modify-write cycle
    pub fn lock(&self) -> Result<StoreLock> {
        std::fs::create_dir_all(&self.data_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(self.data_dir.join(LOCK_FILE))?;
        file.lock_exclusive()?;
        Ok(StoreLock { file })
    }
}

/// Held for the duration of a mutation; released on drop
pub struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release store lock: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn customer(id: &str) -> Customer {
        Customer {
            id: id.into(),
            name: "Grace Hopper".into(),
            phone: Some("555-123-4567".into()),
            email: Some("grace@example.org".into()),
            address: Some("1 Navy Way, Arlington".into()),
            gender: None,
            date_of_birth: NaiveDate::from_ymd_opt(1950, 12, 9),
            allergies: vec!["Penicillin".into(), "Sulfa".into()],
            conditions: vec!["Hypertension".into()],
            emergency_contact: None,
            date_registered: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        }
    }

    fn reminder(id: &str) -> RefillReminder {
        RefillReminder {
            id: id.into(),
            customer_id: "CUS-1".into(),
            medicine_id: "MED-1".into(),
            interval_days: 30,
            last_fill_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            state: crate::ReminderState::Pending,
            dosage: Some("500mg".into()),
            quantity_per_refill: 30,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_customer_list_columns_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(temp_dir.path());

        let customers = vec![customer("CUS-1"), customer("CUS-2")];
        store.save(&customers).unwrap();

        let loaded: Vec<Customer> = store.load().unwrap();
        assert_eq!(loaded, customers);

        let raw = std::fs::read_to_string(store.path_for::<Customer>()).unwrap();
        assert!(raw.contains("Penicillin;Sulfa"));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(temp_dir.path());
        let loaded: Vec<Medicine> = store.load().unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_initialize_writes_headers() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(temp_dir.path());
        store.initialize().unwrap();

        let raw = std::fs::read_to_string(store.path_for::<RefillReminder>()).unwrap();
        assert!(raw.starts_with("id,customer_id,medicine_id,interval_days"));
        let loaded: Vec<RefillReminder> = store.load().unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_header_matches_serialized_columns() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(temp_dir.path());
        store.save(&[reminder("RR-1")]).unwrap();

        let raw = std::fs::read_to_string(store.path_for::<RefillReminder>()).unwrap();
        let first_line = raw.lines().next().unwrap();
        assert_eq!(first_line, RefillReminder::HEADERS.join(","));
    }

    #[test]
    fn test_invalid_row_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(temp_dir.path());
        store.save(&[reminder("RR-1")]).unwrap();

        // Zero interval fails validation
        let path = store.path_for::<RefillReminder>();
        let raw = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, raw.replace(",30,2024-01-01,", ",0,2024-01-01,")).unwrap();

        let err = store.load::<RefillReminder>().unwrap_err();
        match err {
            Error::Schema { line, .. } => assert_eq!(line, 2),
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_unparseable_row_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(temp_dir.path());
        store.save(&[reminder("RR-1")]).unwrap();

        let path = store.path_for::<RefillReminder>();
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("RR-2,CUS-1,MED-1,thirty,2024-01-01,pending,,30,,2024-01-01T00:00:00Z\n");
        std::fs::write(&path, raw).unwrap();

        assert!(matches!(
            store.load::<RefillReminder>(),
            Err(Error::Schema { .. })
        ));
    }

    #[test]
    fn test_duplicate_ids_on_disk_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(temp_dir.path());
        store.save(&[reminder("RR-1"), reminder("RR-1")]).unwrap();

        assert!(matches!(
            store.load::<RefillReminder>(),
            Err(Error::Schema { .. })
        ));
    }

    #[test]
    fn test_atomic_save_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(temp_dir.path());
        store.save(&[customer("CUS-1")]).unwrap();
        store.save(&[customer("CUS-1"), customer("CUS-2")]).unwrap();

        let extras: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "customers.csv")
            .collect();
        assert!(
            extras.is_empty(),
            "Expected only customers.csv, found extras: {:?}",
            extras
        );
    }

    #[test]
    fn test_fingerprint_changes_on_save() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(temp_dir.path());
        let before = store.fingerprints();
        store.save(&[customer("CUS-1")]).unwrap();
        assert_ne!(before, store.fingerprints());
    }
}
