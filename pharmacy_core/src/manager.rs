//! The data manager: the only code path that mutates persisted records.
//!
//! A `DataManager` is an explicit handle on one data directory. It loads every
//! collection at open, reloads them when the files change underneath it, and
//! runs each mutation as refresh + modify + atomic save while holding the
//! store lock. Mutations work on a copy of the collections, so a rejected
//! request leaves both memory and disk untouched.

use crate::backup::{self, BackupInfo, BackupMetadata};
use crate::barcode::{scan_analytics, BarcodeTable, ScanAnalytics, ScanLog, ScanRecord};
use crate::export;
use crate::interactions::{InteractionTable, SafetyReport, Warning};
use crate::reminders::{self, ScheduledReminder};
use crate::reports;
use crate::store::{Collections, Fingerprint, Record, RecordStore};
use crate::{
    generate_id, Customer, Error, Medicine, NewPrescription, Prescription, PrescriptionSource,
    PrescriptionStatus, RefillReminder, ReminderState, Result,
};
use chrono::{DateTime, Local, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const INTERACTIONS_FILE: &str = "interactions.json";
pub const BARCODES_FILE: &str = "barcodes.json";
pub const SCAN_LOG_FILE: &str = "scanned_medicines.jsonl";

/// One of the four persisted collections
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionKind {
    Customers,
    Medicines,
    Prescriptions,
    Reminders,
}

impl CollectionKind {
    pub fn name(&self) -> &'static str {
        match self {
            CollectionKind::Customers => "customers",
            CollectionKind::Medicines => "medicines",
            CollectionKind::Prescriptions => "prescriptions",
            CollectionKind::Reminders => "refill_reminders",
        }
    }
}

/// A newly created prescription and the safety warnings about its medicine
#[derive(Clone, Debug)]
pub struct CreatedPrescription {
    pub prescription: Prescription,
    pub warnings: Vec<Warning>,
}

/// Outcome of a scan-driven dispense
///
/// `logged` is false when the prescription was saved but the scan log could
/// not be appended to.
#[derive(Clone, Debug)]
pub struct ScannedPrescription {
    pub scan: ScanRecord,
    pub created: CreatedPrescription,
    pub logged: bool,
}

/// Which collections a mutation changed
#[derive(Clone, Copy, Debug, Default)]
struct Touched {
    customers: bool,
    medicines: bool,
    prescriptions: bool,
    reminders: bool,
}

impl Touched {
    const CUSTOMERS: Self = Self {
        customers: true,
        medicines: false,
        prescriptions: false,
        reminders: false,
    };
    const MEDICINES: Self = Self {
        customers: false,
        medicines: true,
        prescriptions: false,
        reminders: false,
    };
    const PRESCRIPTIONS: Self = Self {
        customers: false,
        medicines: false,
        prescriptions: true,
        reminders: false,
    };
    const DISPENSE: Self = Self {
        customers: false,
        medicines: true,
        prescriptions: true,
        reminders: false,
    };
    const REMINDERS: Self = Self {
        customers: false,
        medicines: false,
        prescriptions: false,
        reminders: true,
    };
}

pub struct DataManager {
    store: RecordStore,
    data: Collections,
    fingerprints: Vec<Fingerprint>,
    interactions: Arc<InteractionTable>,
    barcodes: BarcodeTable,
    scan_log: ScanLog,
    due_window_days: i64,
}

impl DataManager {
    /// Open (and if needed initialize) a data directory
    ///
    /// Any storage or schema error while loading is returned; nothing is
    /// served from a partially loaded store.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = RecordStore::new(data_dir);
        {
            let _lock = store.lock()?;
            store.initialize()?;
        }
        // Fingerprint first: a write that lands during the load forces a reload later
        let fingerprints = store.fingerprints();
        let data = store.load_all()?;

        let dir = store.data_dir();
        let interactions = Arc::new(InteractionTable::load_or_default(&dir.join(INTERACTIONS_FILE))?);
        let barcodes = BarcodeTable::load_or_default(&dir.join(BARCODES_FILE))?;
        let scan_log = ScanLog::new(dir.join(SCAN_LOG_FILE));

        Ok(Self {
            store,
            data,
            fingerprints,
            interactions,
            barcodes,
            scan_log,
            due_window_days: reminders::DEFAULT_DUE_WINDOW_DAYS,
        })
    }

    /// Days before the due date a reminder counts as due
    pub fn with_due_window(mut self, days: i64) -> Self {
        self.due_window_days = days;
        self
    }

    pub fn data_dir(&self) -> &Path {
        self.store.data_dir()
    }

    pub fn collections(&self) -> &Collections {
        &self.data
    }

    pub fn interactions(&self) -> &InteractionTable {
        &self.interactions
    }

    pub fn barcodes(&self) -> &BarcodeTable {
        &self.barcodes
    }

    pub fn scan_log(&self) -> &ScanLog {
        &self.scan_log
    }

    /// Reload every collection if any record file changed on disk
    pub fn refresh_if_changed(&mut self) -> Result<bool> {
        let current = self.store.fingerprints();
        if current == self.fingerprints {
            return Ok(false);
        }
        tracing::info!("Record files changed on disk, reloading");
        self.data = self.store.load_all()?;
        self.fingerprints = current;
        Ok(true)
    }

    fn mutate<R>(
        &mut self,
        op: impl FnOnce(&mut Collections) -> Result<(R, Touched)>,
    ) -> Result<R> {
        let _lock = self.store.lock()?;
        self.refresh_if_changed()?;

        let mut next = self.data.clone();
        let (result, touched) = op(&mut next)?;

        if touched.customers {
            self.store.save(&next.customers)?;
        }
        if touched.medicines {
            self.store.save(&next.medicines)?;
        }
        if touched.prescriptions {
            self.store.save(&next.prescriptions)?;
        }
        if touched.reminders {
            self.store.save(&next.reminders)?;
        }

        self.data = next;
        self.fingerprints = self.store.fingerprints();
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Customers
    // ------------------------------------------------------------------

    pub fn customers(&self) -> &[Customer] {
        &self.data.customers
    }

    pub fn customer(&self, id: &str) -> Result<&Customer> {
        find(&self.data.customers, id)
    }

    pub fn create_customer(&mut self, customer: Customer) -> Result<Customer> {
        let customer = with_generated_id(normalize_customer(customer), "CUS");
        self.mutate(|data| {
            insert_customer(data, customer.clone())?;
            Ok((customer, Touched::CUSTOMERS))
        })
        .map(|c| {
            tracing::info!(id = %c.id, "Created customer");
            c
        })
    }

    pub fn update_customer(&mut self, customer: Customer) -> Result<Customer> {
        let customer = normalize_customer(customer);
        self.mutate(|data| {
            let idx = index_of(&data.customers, &customer.id)?;
            customer.validate().map_err(Error::Validation)?;
            data.customers[idx] = customer.clone();
            Ok((customer, Touched::CUSTOMERS))
        })
    }

    /// Fails while any active prescription or reminder references the customer
    pub fn delete_customer(&mut self, id: &str) -> Result<Customer> {
        self.mutate(|data| {
            let idx = index_of(&data.customers, id)?;
            let prescriptions = data
                .prescriptions
                .iter()
                .filter(|p| p.customer_id == id && p.status.is_active())
                .count();
            let reminders = data
                .reminders
                .iter()
                .filter(|r| r.customer_id == id && r.state.is_active())
                .count();
            block_if_referenced(Customer::ENTITY, id, prescriptions, reminders)?;
            Ok((data.customers.remove(idx), Touched::CUSTOMERS))
        })
    }

    /// Prescriptions of a customer, newest first
    pub fn customer_prescription_history(&self, customer_id: &str) -> Vec<&Prescription> {
        let mut history: Vec<&Prescription> = self
            .data
            .prescriptions
            .iter()
            .filter(|p| p.customer_id == customer_id)
            .collect();
        history.sort_by(|a, b| {
            b.date_issued
                .cmp(&a.date_issued)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        history
    }

    // ------------------------------------------------------------------
    // Medicines
    // ------------------------------------------------------------------

    pub fn medicines(&self) -> &[Medicine] {
        &self.data.medicines
    }

    pub fn medicine(&self, id: &str) -> Result<&Medicine> {
        find(&self.data.medicines, id)
    }

    pub fn create_medicine(&mut self, medicine: Medicine) -> Result<Medicine> {
        let medicine = with_generated_id(normalize_medicine(medicine), "MED");
        self.mutate(|data| {
            insert_medicine(data, medicine.clone())?;
            Ok((medicine, Touched::MEDICINES))
        })
        .map(|m| {
            tracing::info!(id = %m.id, name = %m.name, "Created medicine");
            m
        })
    }

    pub fn update_medicine(&mut self, medicine: Medicine) -> Result<Medicine> {
        let medicine = normalize_medicine(medicine);
        self.mutate(|data| {
            let idx = index_of(&data.medicines, &medicine.id)?;
            medicine.validate().map_err(Error::Validation)?;
            ensure_barcode_free(&data.medicines, &medicine)?;
            data.medicines[idx] = medicine.clone();
            Ok((medicine, Touched::MEDICINES))
        })
    }

    pub fn delete_medicine(&mut self, id: &str) -> Result<Medicine> {
        self.mutate(|data| {
            let idx = index_of(&data.medicines, id)?;
            let prescriptions = data
                .prescriptions
                .iter()
                .filter(|p| p.medicine_id == id && p.status.is_active())
                .count();
            let reminders = data
                .reminders
                .iter()
                .filter(|r| r.medicine_id == id && r.state.is_active())
                .count();
            block_if_referenced(Medicine::ENTITY, id, prescriptions, reminders)?;
            Ok((data.medicines.remove(idx), Touched::MEDICINES))
        })
    }

    /// Add (positive) or remove (negative) units of stock
    pub fn adjust_stock(&mut self, id: &str, delta: i64) -> Result<Medicine> {
        self.mutate(|data| {
            let idx = index_of(&data.medicines, id)?;
            let medicine = &mut data.medicines[idx];
            let current = medicine.stock_quantity;
            let updated = u32::try_from(i64::from(current) + delta).map_err(|_| {
                Error::Validation(format!(
                    "cannot adjust stock of {} by {}: {} in stock",
                    medicine.name, delta, current
                ))
            })?;
            medicine.stock_quantity = updated;
            tracing::info!(id, delta, stock = updated, "Adjusted stock");
            Ok((medicine.clone(), Touched::MEDICINES))
        })
    }

    pub fn set_stock(&mut self, id: &str, quantity: u32) -> Result<Medicine> {
        self.mutate(|data| {
            let idx = index_of(&data.medicines, id)?;
            data.medicines[idx].stock_quantity = quantity;
            Ok((data.medicines[idx].clone(), Touched::MEDICINES))
        })
    }

    /// Case-insensitive exact name match
    pub fn find_medicine_by_name(&self, name: &str) -> Option<&Medicine> {
        let name = name.trim();
        self.data
            .medicines
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
    }

    /// At or below the reorder level
    pub fn low_stock_medicines(&self) -> Vec<&Medicine> {
        self.data
            .medicines
            .iter()
            .filter(|m| m.stock_quantity <= m.reorder_level)
            .collect()
    }

    /// Expiring on or before `today + days`, already expired included; soonest first
    pub fn expiring_medicines(&self, today: NaiveDate, days: i64) -> Result<Vec<&Medicine>> {
        let cutoff = reminders::look_ahead(today, days)?;
        let mut expiring: Vec<&Medicine> = self
            .data
            .medicines
            .iter()
            .filter(|m| m.expiry_date <= cutoff)
            .collect();
        expiring.sort_by_key(|m| m.expiry_date);
        Ok(expiring)
    }

    // ------------------------------------------------------------------
    // Prescriptions
    // ------------------------------------------------------------------

    pub fn prescriptions(&self) -> &[Prescription] {
        &self.data.prescriptions
    }

    pub fn prescription(&self, id: &str) -> Result<&Prescription> {
        find(&self.data.prescriptions, id)
    }

    /// Dispense a prescription: validates references and stock, deducts the
    /// quantity from stock, and reports safety warnings about the medicine
    ///
    /// Warnings never block creation.
    pub fn create_prescription(&mut self, new: NewPrescription) -> Result<CreatedPrescription> {
        self.dispense(new, PrescriptionSource::Manual)
    }

    fn dispense(
        &mut self,
        new: NewPrescription,
        source: PrescriptionSource,
    ) -> Result<CreatedPrescription> {
        let now = Utc::now();
        let today = Local::now().date_naive();
        let interactions = Arc::clone(&self.interactions);
        let (prescription, warnings) = self.mutate(|data| {
            let prescription = insert_new_prescription(data, new, source, now, today)?;
            let warnings = prescription_warnings(
                data,
                &interactions,
                &prescription.customer_id,
                &prescription.medicine_id,
                prescription.date_issued,
            )?;
            Ok(((prescription, warnings), Touched::DISPENSE))
        })?;

        for warning in &warnings {
            tracing::warn!(
                prescription = %prescription.id,
                severity = ?warning.severity,
                "{}",
                warning.description
            );
        }
        tracing::info!(
            id = %prescription.id,
            total_cost = prescription.total_cost,
            "Created prescription"
        );
        Ok(CreatedPrescription {
            prescription,
            warnings,
        })
    }

    /// Resolve a barcode, dispense the matching medicine, and log the scan
    ///
    /// Once the prescription is saved the call succeeds; a failed log append
    /// only clears `logged`.
    pub fn create_prescription_from_scan(
        &mut self,
        barcode: &str,
        mut new: NewPrescription,
    ) -> Result<ScannedPrescription> {
        self.refresh_if_changed()?;
        let medicine = self.lookup_barcode(barcode)?.clone();
        new.medicine_id = medicine.id.clone();
        let quantity = new.quantity;

        let created = self.dispense(new, PrescriptionSource::Scan)?;
        let scan = ScanRecord::new(barcode, &medicine, quantity);
        let logged = match self.scan_log.append(&scan) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    prescription = %created.prescription.id,
                    "Scan of {} not recorded in {:?}: {}",
                    scan.barcode,
                    self.scan_log.path(),
                    e
                );
                false
            }
        };
        Ok(ScannedPrescription {
            scan,
            created,
            logged,
        })
    }

    /// Warnings involving `medicine_id` for this customer, as of `on`
    ///
    /// Considers the medicines of the customer's active prescriptions and
    /// their allergies, conditions and age.
    pub fn check_prescription_safety(
        &self,
        customer_id: &str,
        medicine_id: &str,
        on: NaiveDate,
    ) -> Result<Vec<Warning>> {
        prescription_warnings(&self.data, &self.interactions, customer_id, medicine_id, on)
    }

    /// Full safety check of a medicine list, optionally against a customer
    /// profile (whose active prescriptions are added to the list)
    pub fn check_safety(
        &self,
        medicine_names: &[String],
        customer_id: Option<&str>,
        on: NaiveDate,
    ) -> Result<SafetyReport> {
        let no_profile: &[String] = &[];
        let Some(customer_id) = customer_id else {
            return Ok(self
                .interactions
                .assess(medicine_names, no_profile, no_profile, None));
        };

        let customer = self.customer(customer_id)?;
        let mut names: Vec<&str> = medicine_names.iter().map(String::as_str).collect();
        names.extend(active_medicine_names(&self.data, customer_id));
        Ok(self.interactions.assess(
            &names,
            &customer.allergies,
            &customer.conditions,
            customer.age_on(on),
        ))
    }


    /// Move an active prescription to a new status
    pub fn update_prescription_status(
        &mut self,
        id: &str,
        status: PrescriptionStatus,
    ) -> Result<Prescription> {
        self.mutate(|data| {
            let idx = index_of(&data.prescriptions, id)?;
            let prescription = &mut data.prescriptions[idx];
            if !prescription.status.is_active() && prescription.status != status {
                return Err(Error::Validation(format!(
                    "prescription {} is already {:?}",
                    id, prescription.status
                )));
            }
            prescription.status = status;
            Ok((prescription.clone(), Touched::PRESCRIPTIONS))
        })
    }

    /// Only completed or cancelled prescriptions can be removed
    pub fn delete_prescription(&mut self, id: &str) -> Result<Prescription> {
        self.mutate(|data| {
            let idx = index_of(&data.prescriptions, id)?;
            if data.prescriptions[idx].status.is_active() {
                return Err(Error::Validation(format!(
                    "prescription {} is still active; complete or cancel it first",
                    id
                )));
            }
            Ok((data.prescriptions.remove(idx), Touched::PRESCRIPTIONS))
        })
    }

    // ------------------------------------------------------------------
    // Refill reminders
    // ------------------------------------------------------------------

    pub fn reminders(&self) -> &[RefillReminder] {
        &self.data.reminders
    }

    pub fn reminder(&self, id: &str) -> Result<&RefillReminder> {
        find(&self.data.reminders, id)
    }

    pub fn create_reminder(&mut self, reminder: RefillReminder) -> Result<RefillReminder> {
        let reminder = with_generated_id(normalize_reminder(reminder), "RR");
        self.mutate(|data| {
            insert_reminder(data, reminder.clone())?;
            Ok((reminder, Touched::REMINDERS))
        })
    }

    pub fn update_reminder(&mut self, reminder: RefillReminder) -> Result<RefillReminder> {
        let reminder = normalize_reminder(reminder);
        self.mutate(|data| {
            let idx = index_of(&data.reminders, &reminder.id)?;
            check_reminder(data, &reminder)?;
            data.reminders[idx] = reminder.clone();
            Ok((reminder, Touched::REMINDERS))
        })
    }

    pub fn delete_reminder(&mut self, id: &str) -> Result<RefillReminder> {
        self.mutate(|data| {
            let idx = index_of(&data.reminders, id)?;
            Ok((data.reminders.remove(idx), Touched::REMINDERS))
        })
    }

    pub fn mark_reminder_sent(&mut self, id: &str) -> Result<RefillReminder> {
        self.transition_reminder(id, ReminderState::Sent)
    }

    pub fn complete_reminder(&mut self, id: &str) -> Result<RefillReminder> {
        self.transition_reminder(id, ReminderState::Completed)
    }

    pub fn cancel_reminder(&mut self, id: &str) -> Result<RefillReminder> {
        self.transition_reminder(id, ReminderState::Cancelled)
    }

    fn transition_reminder(&mut self, id: &str, state: ReminderState) -> Result<RefillReminder> {
        self.mutate(|data| {
            let idx = index_of(&data.reminders, id)?;
            let reminder = &mut data.reminders[idx];
            if !reminder.state.is_active() {
                return Err(Error::Validation(format!(
                    "reminder {} is already {:?}",
                    id, reminder.state
                )));
            }
            reminder.state = state;
            Ok((reminder.clone(), Touched::REMINDERS))
        })
    }

    /// Every reminder with its computed schedule, soonest due first
    pub fn scheduled_reminders(&self, today: NaiveDate) -> Vec<ScheduledReminder> {
        let mut scheduled: Vec<ScheduledReminder> = self
            .data
            .reminders
            .iter()
            .map(|r| ScheduledReminder::evaluate(r, today, self.due_window_days))
            .collect();
        scheduled.sort_by(|a, b| {
            a.due_date
                .cmp(&b.due_date)
                .then_with(|| a.reminder.id.cmp(&b.reminder.id))
        });
        scheduled
    }

    /// Active reminders due within `days_ahead` of `today` (overdue included)
    pub fn due_refills(&self, today: NaiveDate, days_ahead: i64) -> Result<Vec<ScheduledReminder>> {
        reminders::due_within(&self.data.reminders, today, days_ahead, self.due_window_days)
    }

    // ------------------------------------------------------------------
    // Barcodes
    // ------------------------------------------------------------------

    pub fn lookup_barcode(&self, barcode: &str) -> Result<&Medicine> {
        self.barcodes
            .resolve(barcode, &self.data.medicines)
            .ok_or_else(|| Error::not_found("Barcode", barcode.trim()))
    }

    pub fn scan_analytics(&self) -> Result<ScanAnalytics> {
        Ok(scan_analytics(&self.scan_log.read_all()?))
    }

    // ------------------------------------------------------------------
    // Import / export / backup
    // ------------------------------------------------------------------

    /// Write a collection to CSV in its storage schema
    pub fn export(&self, kind: CollectionKind, path: &Path) -> Result<usize> {
        match kind {
            CollectionKind::Customers => export::export_records(path, &self.data.customers),
            CollectionKind::Medicines => export::export_records(path, &self.data.medicines),
            CollectionKind::Prescriptions => {
                export::export_records(path, &self.data.prescriptions)
            }
            CollectionKind::Reminders => export::export_records(path, &self.data.reminders),
        }
    }

    /// Write the prescriptions issued within `[start, end]` to CSV
    pub fn export_prescriptions_in_period(
        &self,
        path: &Path,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<usize> {
        if start > end {
            return Err(Error::Validation(format!(
                "period start {} is after end {}",
                start, end
            )));
        }
        let selected = reports::prescriptions_in_period(&self.data.prescriptions, start, end);
        export::export_records(path, &selected)
    }

    /// Add every record of a CSV file to a collection
    ///
    /// Records get the same checks as `create_*`. Imported prescriptions are
    /// historical and leave stock untouched. One bad record rejects the file.
    pub fn import(&mut self, kind: CollectionKind, path: &Path) -> Result<usize> {
        let count = match kind {
            CollectionKind::Customers => {
                let records: Vec<Customer> = export::import_records(path)?;
                self.mutate(|data| {
                    let count = records.len();
                    for record in records {
                        insert_customer(data, normalize_customer(record))?;
                    }
                    Ok((count, Touched::CUSTOMERS))
                })?
            }
            CollectionKind::Medicines => {
                let records: Vec<Medicine> = export::import_records(path)?;
                self.mutate(|data| {
                    let count = records.len();
                    for record in records {
                        insert_medicine(data, normalize_medicine(record))?;
                    }
                    Ok((count, Touched::MEDICINES))
                })?
            }
            CollectionKind::Prescriptions => {
                let records: Vec<Prescription> = export::import_records(path)?;
                self.mutate(|data| {
                    let count = records.len();
                    for record in records {
                        insert_prescription(data, record)?;
                    }
                    Ok((count, Touched::PRESCRIPTIONS))
                })?
            }
            CollectionKind::Reminders => {
                let records: Vec<RefillReminder> = export::import_records(path)?;
                self.mutate(|data| {
                    let count = records.len();
                    for record in records {
                        insert_reminder(data, normalize_reminder(record))?;
                    }
                    Ok((count, Touched::REMINDERS))
                })?
            }
        };
        tracing::info!("Imported {} {} from {:?}", count, kind.name(), path);
        Ok(count)
    }

    /// Archive every persisted file into `backup_dir`
    pub fn create_backup(
        &mut self,
        backup_dir: &Path,
        name: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(BackupInfo, BackupMetadata)> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| backup::default_backup_name(at));

        let _lock = self.store.lock()?;
        self.refresh_if_changed()?;

        let mut files = self.store.record_files();
        files.extend(
            [INTERACTIONS_FILE, BARCODES_FILE, SCAN_LOG_FILE]
                .iter()
                .map(|f| self.data_dir().join(f)),
        );
        backup::create_backup(backup_dir, &name, &files, &self.data, at)
    }
}

// ============================================================================
// Collection helpers
// ============================================================================

fn index_of<T: Record>(items: &[T], id: &str) -> Result<usize> {
    items
        .iter()
        .position(|r| r.id() == id)
        .ok_or_else(|| Error::not_found(T::ENTITY, id))
}

fn find<'a, T: Record>(items: &'a [T], id: &str) -> Result<&'a T> {
    items
        .iter()
        .find(|r| r.id() == id)
        .ok_or_else(|| Error::not_found(T::ENTITY, id))
}

fn active_medicine_names<'a>(data: &'a Collections, customer_id: &str) -> Vec<&'a str> {
    data.prescriptions
        .iter()
        .filter(|p| p.customer_id == customer_id && p.status.is_active())
        .filter_map(|p| find(&data.medicines, &p.medicine_id).ok())
        .map(|m| m.name.as_str())
        .collect()
}

fn prescription_warnings(
    data: &Collections,
    interactions: &InteractionTable,
    customer_id: &str,
    medicine_id: &str,
    on: NaiveDate,
) -> Result<Vec<Warning>> {
    let customer = find(&data.customers, customer_id)?;
    let medicine = find(&data.medicines, medicine_id)?;

    let mut names = active_medicine_names(data, customer_id);
    names.push(medicine.name.as_str());

    Ok(interactions
        .check(
            &names,
            &customer.allergies,
            &customer.conditions,
            customer.age_on(on),
        )
        .into_iter()
        .filter(|w| w.involves(&medicine.name))
        .collect())
}

fn ensure_unique<T: Record>(items: &[T], id: &str) -> Result<()> {
    if items.iter().any(|r| r.id() == id) {
        return Err(Error::duplicate(T::ENTITY, id));
    }
    Ok(())
}

fn block_if_referenced(
    entity: &'static str,
    id: &str,
    prescriptions: usize,
    reminders: usize,
) -> Result<()> {
    if prescriptions == 0 && reminders == 0 {
        return Ok(());
    }
    Err(Error::ReferentialIntegrity {
        entity,
        id: id.to_string(),
        reason: format!(
            "referenced by {} active prescription(s) and {} active reminder(s)",
            prescriptions, reminders
        ),
    })
}

fn ensure_barcode_free(medicines: &[Medicine], medicine: &Medicine) -> Result<()> {
    let Some(code) = medicine.barcode.as_deref() else {
        return Ok(());
    };
    let taken = medicines.iter().any(|m| {
        m.id != medicine.id
            && m.barcode
                .as_deref()
                .is_some_and(|other| other.eq_ignore_ascii_case(code))
    });
    if taken {
        return Err(Error::duplicate("Barcode", code));
    }
    Ok(())
}

fn insert_customer(data: &mut Collections, customer: Customer) -> Result<()> {
    customer.validate().map_err(Error::Validation)?;
    ensure_unique(&data.customers, &customer.id)?;
    data.customers.push(customer);
    Ok(())
}

fn insert_medicine(data: &mut Collections, medicine: Medicine) -> Result<()> {
    medicine.validate().map_err(Error::Validation)?;
    ensure_unique(&data.medicines, &medicine.id)?;
    ensure_barcode_free(&data.medicines, &medicine)?;
    data.medicines.push(medicine);
    Ok(())
}

fn check_reminder(data: &Collections, reminder: &RefillReminder) -> Result<()> {
    reminder.validate().map_err(Error::Validation)?;
    find(&data.customers, &reminder.customer_id)?;
    find(&data.medicines, &reminder.medicine_id)?;
    Ok(())
}

fn insert_reminder(data: &mut Collections, reminder: RefillReminder) -> Result<()> {
    check_reminder(data, &reminder)?;
    ensure_unique(&data.reminders, &reminder.id)?;
    data.reminders.push(reminder);
    Ok(())
}

/// Existing prescription record (import): references checked, stock untouched
fn insert_prescription(data: &mut Collections, prescription: Prescription) -> Result<()> {
    prescription.validate().map_err(Error::Validation)?;
    find(&data.customers, &prescription.customer_id)?;
    find(&data.medicines, &prescription.medicine_id)?;
    ensure_unique(&data.prescriptions, &prescription.id)?;
    data.prescriptions.push(prescription);
    Ok(())
}

fn insert_new_prescription(
    data: &mut Collections,
    new: NewPrescription,
    source: PrescriptionSource,
    now: DateTime<Utc>,
    today: NaiveDate,
) -> Result<Prescription> {
    if new.quantity == 0 {
        return Err(Error::Validation("quantity must be greater than 0".into()));
    }
    find(&data.customers, &new.customer_id)?;
    let idx = index_of(&data.medicines, &new.medicine_id)?;

    let id = clean(new.id).unwrap_or_else(|| generate_id("RX"));
    ensure_unique(&data.prescriptions, &id)?;

    let medicine = &mut data.medicines[idx];
    if new.quantity > medicine.stock_quantity {
        return Err(Error::Validation(format!(
            "insufficient stock for {}: requested {}, available {}",
            medicine.name, new.quantity, medicine.stock_quantity
        )));
    }

    let prescription = Prescription {
        id,
        customer_id: new.customer_id,
        medicine_id: new.medicine_id,
        quantity: new.quantity,
        dosage: clean(new.dosage),
        instructions: clean(new.instructions),
        doctor: new.doctor.trim().to_string(),
        date_issued: new.date_issued.unwrap_or(today),
        status: PrescriptionStatus::Pending,
        total_cost: medicine.selling_price * f64::from(new.quantity),
        source,
        created_at: now,
    };
    prescription.validate().map_err(Error::Validation)?;

    medicine.stock_quantity -= new.quantity;
    data.prescriptions.push(prescription.clone());
    Ok(prescription)
}

// ============================================================================
// Input normalization
// ============================================================================

/// Trimmed, with blank values treated as absent
fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

trait GeneratedId {
    fn id_mut(&mut self) -> &mut String;
}

impl GeneratedId for Customer {
    fn id_mut(&mut self) -> &mut String {
        &mut self.id
    }
}

impl GeneratedId for Medicine {
    fn id_mut(&mut self) -> &mut String {
        &mut self.id
    }
}

impl GeneratedId for RefillReminder {
    fn id_mut(&mut self) -> &mut String {
        &mut self.id
    }
}

fn with_generated_id<T: GeneratedId>(mut record: T, prefix: &str) -> T {
    if record.id_mut().is_empty() {
        *record.id_mut() = generate_id(prefix);
    }
    record
}

fn normalize_customer(mut c: Customer) -> Customer {
    c.id = c.id.trim().to_string();
    c.name = c.name.trim().to_string();
    c.phone = clean(c.phone);
    c.email = clean(c.email);
    c.address = clean(c.address);
    c.gender = clean(c.gender);
    c.emergency_contact = clean(c.emergency_contact);
    c.allergies = clean_list(c.allergies);
    c.conditions = clean_list(c.conditions);
    c
}

fn normalize_medicine(mut m: Medicine) -> Medicine {
    m.id = m.id.trim().to_string();
    m.name = m.name.trim().to_string();
    m.category = m.category.trim().to_string();
    m.manufacturer = clean(m.manufacturer);
    m.supplier = clean(m.supplier);
    m.barcode = clean(m.barcode);
    m.description = clean(m.description);
    m
}

fn normalize_reminder(mut r: RefillReminder) -> RefillReminder {
    r.id = r.id.trim().to_string();
    r.customer_id = r.customer_id.trim().to_string();
    r.medicine_id = r.medicine_id.trim().to_string();
    r.dosage = clean(r.dosage);
    r.notes = clean(r.notes);
    r
}
