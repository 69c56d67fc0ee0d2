use chrono::{Local, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pharmacy_core::backup;
use pharmacy_core::export;
use pharmacy_core::reminders;
use pharmacy_core::reports;
use pharmacy_core::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "pharmacy")]
#[command(about = "Pharmacy inventory, prescription and refill manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// More diagnostics on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the medicine inventory
    #[command(subcommand)]
    Medicine(MedicineCommand),

    /// Manage customers
    #[command(subcommand)]
    Customer(CustomerCommand),

    /// Dispense and track prescriptions
    #[command(subcommand)]
    Prescription(PrescriptionCommand),

    /// Manage refill reminders
    #[command(subcommand)]
    Reminder(ReminderCommand),

    /// Barcode lookup and scan-based dispensing
    #[command(subcommand)]
    Scan(ScanCommand),

    /// Check medicines for interactions, optionally against a customer profile
    Check {
        /// Medicine names
        #[arg(required = true)]
        medicines: Vec<String>,

        /// Include this customer's allergies, conditions, age and active prescriptions
        #[arg(long)]
        customer: Option<String>,
    },

    /// Print or export a report
    Report {
        #[arg(value_enum)]
        kind: ReportKind,

        /// Period start for the compliance report (default: 30 days ago)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Period end for the compliance report (default: today)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Write the report table to this CSV file instead of printing it
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Export a collection to CSV
    Export {
        #[arg(value_enum)]
        collection: CollectionArg,

        /// Output file (default: timestamped file in the current directory)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Prescriptions issued on or after this date
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Prescriptions issued on or before this date
        #[arg(long)]
        end: Option<NaiveDate>,
    },

    /// Import a collection from CSV (all records or none)
    Import {
        #[arg(value_enum)]
        collection: CollectionArg,

        file: PathBuf,
    },

    /// Create and manage backup archives
    #[command(subcommand)]
    Backup(BackupCommand),
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportKind {
    Inventory,
    Sales,
    Customers,
    Reminders,
    Compliance,
}

#[derive(Clone, Copy, ValueEnum)]
enum CollectionArg {
    Customers,
    Medicines,
    Prescriptions,
    Reminders,
}

impl From<CollectionArg> for CollectionKind {
    fn from(arg: CollectionArg) -> Self {
        match arg {
            CollectionArg::Customers => CollectionKind::Customers,
            CollectionArg::Medicines => CollectionKind::Medicines,
            CollectionArg::Prescriptions => CollectionKind::Prescriptions,
            CollectionArg::Reminders => CollectionKind::Reminders,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    PartiallyFilled,
    Completed,
    Cancelled,
}

impl From<StatusArg> for PrescriptionStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => PrescriptionStatus::Pending,
            StatusArg::PartiallyFilled => PrescriptionStatus::PartiallyFilled,
            StatusArg::Completed => PrescriptionStatus::Completed,
            StatusArg::Cancelled => PrescriptionStatus::Cancelled,
        }
    }
}

// ============================================================================
// Medicine commands
// ============================================================================

#[derive(Subcommand)]
enum MedicineCommand {
    /// Add a medicine
    Add(MedicineAdd),
    /// Show one medicine
    Show { id: String },
    /// List medicines
    List {
        /// Only medicines at or below their reorder level
        #[arg(long)]
        low_stock: bool,

        /// Only medicines expiring within this many days (expired included)
        #[arg(long)]
        expiring: Option<i64>,
    },
    /// Update fields of a medicine
    Update(MedicineUpdate),
    /// Delete a medicine (blocked while active prescriptions or reminders use it)
    Delete { id: String },
    /// Change stock: --add, --remove or --set
    Stock {
        id: String,

        #[arg(long, conflicts_with_all = ["remove", "set"])]
        add: Option<u32>,

        #[arg(long, conflicts_with = "set")]
        remove: Option<u32>,

        #[arg(long)]
        set: Option<u32>,
    },
    /// Find a medicine by name
    Find { name: String },
}

#[derive(Args)]
struct MedicineAdd {
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    name: String,
    #[arg(long)]
    category: String,
    #[arg(long)]
    cost: f64,
    #[arg(long)]
    price: f64,
    #[arg(long, default_value_t = 0)]
    stock: u32,
    #[arg(long, default_value_t = 10)]
    reorder_level: u32,
    /// Expiry date (YYYY-MM-DD)
    #[arg(long)]
    expiry: NaiveDate,
    #[arg(long)]
    manufacturer: Option<String>,
    #[arg(long)]
    supplier: Option<String>,
    #[arg(long)]
    barcode: Option<String>,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Args)]
struct MedicineUpdate {
    id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    cost: Option<f64>,
    #[arg(long)]
    price: Option<f64>,
    #[arg(long)]
    reorder_level: Option<u32>,
    #[arg(long)]
    expiry: Option<NaiveDate>,
    #[arg(long)]
    manufacturer: Option<String>,
    #[arg(long)]
    supplier: Option<String>,
    #[arg(long)]
    barcode: Option<String>,
    #[arg(long)]
    description: Option<String>,
}

// ============================================================================
// Customer commands
// ============================================================================

#[derive(Subcommand)]
enum CustomerCommand {
    /// Register a customer
    Add(CustomerAdd),
    /// Show one customer with their prescription history
    Show { id: String },
    /// List customers
    List,
    /// Update fields of a customer
    Update(CustomerUpdate),
    /// Delete a customer (blocked while active prescriptions or reminders exist)
    Delete { id: String },
}

#[derive(Args)]
struct CustomerAdd {
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    name: String,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    gender: Option<String>,
    /// Date of birth (YYYY-MM-DD)
    #[arg(long)]
    dob: Option<NaiveDate>,
    /// Known allergy (repeatable)
    #[arg(long = "allergy")]
    allergies: Vec<String>,
    /// Medical condition (repeatable)
    #[arg(long = "condition")]
    conditions: Vec<String>,
    #[arg(long)]
    emergency_contact: Option<String>,
}

#[derive(Args)]
struct CustomerUpdate {
    id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    gender: Option<String>,
    #[arg(long)]
    dob: Option<NaiveDate>,
    /// Replace the allergy list (repeatable)
    #[arg(long = "allergy")]
    allergies: Vec<String>,
    /// Replace the condition list (repeatable)
    #[arg(long = "condition")]
    conditions: Vec<String>,
    #[arg(long)]
    emergency_contact: Option<String>,
}

// ============================================================================
// Prescription commands
// ============================================================================

#[derive(Subcommand)]
enum PrescriptionCommand {
    /// Dispense a prescription (deducts stock, reports safety warnings)
    Add(PrescriptionAdd),
    /// Show one prescription
    Show { id: String },
    /// List prescriptions
    List {
        #[arg(long)]
        customer: Option<String>,
    },
    /// Change the status of an active prescription
    Status {
        id: String,
        #[arg(value_enum)]
        status: StatusArg,
    },
    /// Delete a completed or cancelled prescription
    Delete { id: String },
}

#[derive(Args)]
struct PrescriptionAdd {
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    customer: String,
    #[arg(long)]
    medicine: String,
    #[arg(long)]
    quantity: u32,
    #[arg(long)]
    doctor: String,
    #[arg(long)]
    dosage: Option<String>,
    #[arg(long)]
    instructions: Option<String>,
    /// Date issued (default: today)
    #[arg(long)]
    date: Option<NaiveDate>,
}

// ============================================================================
// Reminder commands
// ============================================================================

#[derive(Subcommand)]
enum ReminderCommand {
    /// Create a refill reminder
    Add(ReminderAdd),
    /// Show one reminder with its schedule
    Show { id: String },
    /// List every reminder with its schedule
    List,
    /// Update fields of a reminder
    Update(ReminderUpdate),
    /// Delete a reminder
    Delete { id: String },
    /// Active reminders due soon (overdue included)
    Due {
        /// Look-ahead in days (default from config)
        #[arg(long)]
        days: Option<i64>,
    },
    /// Mark a reminder as sent
    Sent { id: String },
    /// Mark a reminder as completed
    Complete { id: String },
    /// Cancel a reminder
    Cancel { id: String },
}

#[derive(Args)]
struct ReminderAdd {
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    customer: String,
    #[arg(long)]
    medicine: String,
    /// Days between refills
    #[arg(long)]
    interval: u32,
    /// Date of the last fill (default: today)
    #[arg(long)]
    last_fill: Option<NaiveDate>,
    #[arg(long, default_value_t = 30)]
    quantity: u32,
    #[arg(long)]
    dosage: Option<String>,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Args)]
struct ReminderUpdate {
    id: String,
    #[arg(long)]
    interval: Option<u32>,
    #[arg(long)]
    last_fill: Option<NaiveDate>,
    #[arg(long)]
    quantity: Option<u32>,
    #[arg(long)]
    dosage: Option<String>,
    #[arg(long)]
    notes: Option<String>,
}

// ============================================================================
// Scan and backup commands
// ============================================================================

#[derive(Subcommand)]
enum ScanCommand {
    /// Look up the medicine for a barcode
    Lookup { barcode: String },
    /// Dispense the scanned medicine as a prescription
    Dispense {
        barcode: String,
        #[arg(long)]
        customer: String,
        #[arg(long, default_value_t = 1)]
        quantity: u32,
        #[arg(long)]
        doctor: String,
        #[arg(long)]
        dosage: Option<String>,
        #[arg(long)]
        instructions: Option<String>,
    },
    /// Summarize the scan log
    Stats,
}

#[derive(Subcommand)]
enum BackupCommand {
    /// Archive the data directory
    Create {
        /// Archive name (default: pharmacy_backup_<timestamp>)
        #[arg(long)]
        name: Option<String>,
    },
    /// List archives, newest first
    List,
    /// Show the metadata stored in an archive
    Info { name: String },
    /// Delete an archive
    Delete { name: String },
    /// Total size of all archives
    Storage,
}

// ============================================================================
// Entry point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();
    pharmacy_core::logging::init(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    // Determine data directory
    let config = Config::load()?;
    let data_dir = cli
        .data_dir
        .unwrap_or_else(|| config.data.data_dir.clone());
    tracing::debug!("Using data directory {:?}", data_dir);

    let mut dm = DataManager::open(&data_dir)?.with_due_window(config.reminders.due_window_days);
    let today = Local::now().date_naive();

    match cli.command {
        Commands::Medicine(cmd) => cmd_medicine(&mut dm, cmd, today, &config),
        Commands::Customer(cmd) => cmd_customer(&mut dm, cmd),
        Commands::Prescription(cmd) => cmd_prescription(&mut dm, cmd),
        Commands::Reminder(cmd) => cmd_reminder(&mut dm, cmd, today, &config),
        Commands::Scan(cmd) => cmd_scan(&mut dm, cmd),
        Commands::Check { medicines, customer } => {
            let report = dm.check_safety(&medicines, customer.as_deref(), today)?;
            display_safety_report(&report);
            Ok(())
        }
        Commands::Report {
            kind,
            start,
            end,
            output,
        } => cmd_report(&dm, kind, start, end, output, today, &config),
        Commands::Export {
            collection,
            output,
            start,
            end,
        } => {
            let kind = CollectionKind::from(collection);
            let path = output
                .unwrap_or_else(|| PathBuf::from(export::export_file_name(kind.name(), Utc::now())));
            let count = match (kind, start.is_some() || end.is_some()) {
                (_, false) => dm.export(kind, &path)?,
                (CollectionKind::Prescriptions, true) => dm.export_prescriptions_in_period(
                    &path,
                    start.unwrap_or(NaiveDate::MIN),
                    end.unwrap_or(NaiveDate::MAX),
                )?,
                (_, true) => {
                    return Err(Error::Validation(
                        "--start/--end only apply to prescriptions".into(),
                    ))
                }
            };
            println!("✓ Exported {} {} to {}", count, kind.name(), path.display());
            Ok(())
        }
        Commands::Import { collection, file } => {
            let kind = CollectionKind::from(collection);
            let count = dm.import(kind, &file)?;
            println!("✓ Imported {} {} from {}", count, kind.name(), file.display());
            Ok(())
        }
        Commands::Backup(cmd) => {
            let backup_dir = config.data.backup_dir_for(&data_dir);
            cmd_backup(&mut dm, cmd, &backup_dir)
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn cmd_medicine(
    dm: &mut DataManager,
    cmd: MedicineCommand,
    today: NaiveDate,
    config: &Config,
) -> Result<()> {
    match cmd {
        MedicineCommand::Add(args) => {
            let medicine = dm.create_medicine(Medicine {
                id: args.id.unwrap_or_default(),
                name: args.name,
                category: args.category,
                manufacturer: args.manufacturer,
                supplier: args.supplier,
                barcode: args.barcode,
                cost_price: args.cost,
                selling_price: args.price,
                stock_quantity: args.stock,
                reorder_level: args.reorder_level,
                expiry_date: args.expiry,
                description: args.description,
                date_added: today,
            })?;
            println!("✓ Added medicine {} ({})", medicine.name, medicine.id);
        }
        MedicineCommand::Show { id } => {
            display_medicine(dm.medicine(&id)?, today, config.inventory.expiry_warning_days);
        }
        MedicineCommand::List {
            low_stock,
            expiring,
        } => {
            let medicines: Vec<&Medicine> = match (low_stock, expiring) {
                (true, _) => dm.low_stock_medicines(),
                (false, Some(days)) => dm.expiring_medicines(today, days)?,
                (false, None) => dm.medicines().iter().collect(),
            };
            if medicines.is_empty() {
                println!("No medicines found.");
            }
            for m in medicines {
                println!(
                    "{:<14} {:<24} {:<16} stock {:>5} ({:<12}) expires {}",
                    m.id,
                    m.name,
                    m.category,
                    m.stock_quantity,
                    m.stock_status().label(),
                    m.expiry_date
                );
            }
        }
        MedicineCommand::Update(args) => {
            let mut medicine = dm.medicine(&args.id)?.clone();
            if let Some(name) = args.name {
                medicine.name = name;
            }
            if let Some(category) = args.category {
                medicine.category = category;
            }
            if let Some(cost) = args.cost {
                medicine.cost_price = cost;
            }
            if let Some(price) = args.price {
                medicine.selling_price = price;
            }
            if let Some(level) = args.reorder_level {
                medicine.reorder_level = level;
            }
            if let Some(expiry) = args.expiry {
                medicine.expiry_date = expiry;
            }
            if args.manufacturer.is_some() {
                medicine.manufacturer = args.manufacturer;
            }
            if args.supplier.is_some() {
                medicine.supplier = args.supplier;
            }
            if args.barcode.is_some() {
                medicine.barcode = args.barcode;
            }
            if args.description.is_some() {
                medicine.description = args.description;
            }
            let medicine = dm.update_medicine(medicine)?;
            println!("✓ Updated medicine {}", medicine.id);
        }
        MedicineCommand::Delete { id } => {
            let medicine = dm.delete_medicine(&id)?;
            println!("✓ Deleted medicine {} ({})", medicine.name, medicine.id);
        }
        MedicineCommand::Stock {
            id,
            add,
            remove,
            set,
        } => {
            let medicine = match (add, remove, set) {
                (Some(n), _, _) => dm.adjust_stock(&id, i64::from(n))?,
                (_, Some(n), _) => dm.adjust_stock(&id, -i64::from(n))?,
                (_, _, Some(n)) => dm.set_stock(&id, n)?,
                _ => {
                    return Err(Error::Validation(
                        "one of --add, --remove or --set is required".into(),
                    ))
                }
            };
            println!(
                "✓ {} stock is now {} ({})",
                medicine.name,
                medicine.stock_quantity,
                medicine.stock_status().label()
            );
        }
        MedicineCommand::Find { name } => match dm.find_medicine_by_name(&name) {
            Some(m) => display_medicine(m, today, config.inventory.expiry_warning_days),
            None => println!("No medicine named '{}'.", name),
        },
    }
    Ok(())
}

fn cmd_customer(dm: &mut DataManager, cmd: CustomerCommand) -> Result<()> {
    match cmd {
        CustomerCommand::Add(args) => {
            let customer = dm.create_customer(Customer {
                id: args.id.unwrap_or_default(),
                name: args.name,
                phone: args.phone,
                email: args.email,
                address: args.address,
                gender: args.gender,
                date_of_birth: args.dob,
                allergies: args.allergies,
                conditions: args.conditions,
                emergency_contact: args.emergency_contact,
                date_registered: Local::now().date_naive(),
            })?;
            println!("✓ Added customer {} ({})", customer.name, customer.id);
        }
        CustomerCommand::Show { id } => {
            let c = dm.customer(&id)?;
            println!("{} ({})", c.name, c.id);
            if let Some(phone) = &c.phone {
                println!("  Phone: {}", phone);
            }
            if let Some(email) = &c.email {
                println!("  Email: {}", email);
            }
            if let Some(dob) = c.date_of_birth {
                println!("  Born: {}", dob);
            }
            if !c.allergies.is_empty() {
                println!("  Allergies: {}", c.allergies.join(", "));
            }
            if !c.conditions.is_empty() {
                println!("  Conditions: {}", c.conditions.join(", "));
            }
            let history = dm.customer_prescription_history(&id);
            println!("  Prescriptions: {}", history.len());
            for p in history {
                display_prescription_line(dm, p);
            }
        }
        CustomerCommand::List => {
            if dm.customers().is_empty() {
                println!("No customers found.");
            }
            for c in dm.customers() {
                println!(
                    "{:<14} {:<24} {}",
                    c.id,
                    c.name,
                    c.phone.as_deref().unwrap_or("-")
                );
            }
        }
        CustomerCommand::Update(args) => {
            let mut customer = dm.customer(&args.id)?.clone();
            if let Some(name) = args.name {
                customer.name = name;
            }
            if args.phone.is_some() {
                customer.phone = args.phone;
            }
            if args.email.is_some() {
                customer.email = args.email;
            }
            if args.address.is_some() {
                customer.address = args.address;
            }
            if args.gender.is_some() {
                customer.gender = args.gender;
            }
            if args.dob.is_some() {
                customer.date_of_birth = args.dob;
            }
            if !args.allergies.is_empty() {
                customer.allergies = args.allergies;
            }
            if !args.conditions.is_empty() {
                customer.conditions = args.conditions;
            }
            if args.emergency_contact.is_some() {
                customer.emergency_contact = args.emergency_contact;
            }
            let customer = dm.update_customer(customer)?;
            println!("✓ Updated customer {}", customer.id);
        }
        CustomerCommand::Delete { id } => {
            let customer = dm.delete_customer(&id)?;
            println!("✓ Deleted customer {} ({})", customer.name, customer.id);
        }
    }
    Ok(())
}

fn cmd_prescription(dm: &mut DataManager, cmd: PrescriptionCommand) -> Result<()> {
    match cmd {
        PrescriptionCommand::Add(args) => {
            let created = dm.create_prescription(NewPrescription {
                id: args.id,
                customer_id: args.customer,
                medicine_id: args.medicine,
                quantity: args.quantity,
                doctor: args.doctor,
                dosage: args.dosage,
                instructions: args.instructions,
                date_issued: args.date,
            })?;
            display_created(&created);
        }
        PrescriptionCommand::Show { id } => {
            let p = dm.prescription(&id)?;
            display_prescription_line(dm, p);
            println!("  Doctor: {}", p.doctor);
            if let Some(dosage) = &p.dosage {
                println!("  Dosage: {}", dosage);
            }
            if let Some(instructions) = &p.instructions {
                println!("  Instructions: {}", instructions);
            }
            println!("  Source: {:?}", p.source);
        }
        PrescriptionCommand::List { customer } => {
            let prescriptions: Vec<&Prescription> = match customer {
                Some(id) => dm.customer_prescription_history(&id),
                None => dm.prescriptions().iter().collect(),
            };
            if prescriptions.is_empty() {
                println!("No prescriptions found.");
            }
            for p in prescriptions {
                display_prescription_line(dm, p);
            }
        }
        PrescriptionCommand::Status { id, status } => {
            let p = dm.update_prescription_status(&id, status.into())?;
            println!("✓ Prescription {} is now {:?}", p.id, p.status);
        }
        PrescriptionCommand::Delete { id } => {
            let p = dm.delete_prescription(&id)?;
            println!("✓ Deleted prescription {}", p.id);
        }
    }
    Ok(())
}

fn cmd_reminder(
    dm: &mut DataManager,
    cmd: ReminderCommand,
    today: NaiveDate,
    config: &Config,
) -> Result<()> {
    let window = config.reminders.due_window_days;
    match cmd {
        ReminderCommand::Add(args) => {
            let reminder = dm.create_reminder(RefillReminder {
                id: args.id.unwrap_or_default(),
                customer_id: args.customer,
                medicine_id: args.medicine,
                interval_days: args.interval,
                last_fill_date: args.last_fill.unwrap_or(today),
                state: ReminderState::Pending,
                dosage: args.dosage,
                quantity_per_refill: args.quantity,
                notes: args.notes,
                created_at: Utc::now(),
            })?;
            println!(
                "✓ Added reminder {} (next refill due {})",
                reminder.id,
                reminder.due_date()
            );
        }
        ReminderCommand::Show { id } => {
            let scheduled = ScheduledReminder::evaluate(dm.reminder(&id)?, today, window);
            display_scheduled(dm, &scheduled);
        }
        ReminderCommand::List => {
            let scheduled = dm.scheduled_reminders(today);
            if scheduled.is_empty() {
                println!("No reminders found.");
            }
            for s in &scheduled {
                display_scheduled(dm, s);
            }
        }
        ReminderCommand::Update(args) => {
            let mut reminder = dm.reminder(&args.id)?.clone();
            if let Some(interval) = args.interval {
                reminder.interval_days = interval;
            }
            if let Some(last_fill) = args.last_fill {
                reminder.last_fill_date = last_fill;
            }
            if let Some(quantity) = args.quantity {
                reminder.quantity_per_refill = quantity;
            }
            if args.dosage.is_some() {
                reminder.dosage = args.dosage;
            }
            if args.notes.is_some() {
                reminder.notes = args.notes;
            }
            let reminder = dm.update_reminder(reminder)?;
            println!("✓ Updated reminder {}", reminder.id);
        }
        ReminderCommand::Delete { id } => {
            let reminder = dm.delete_reminder(&id)?;
            println!("✓ Deleted reminder {}", reminder.id);
        }
        ReminderCommand::Due { days } => {
            let days = days.unwrap_or(config.reminders.due_soon_days);
            let due = dm.due_refills(today, days)?;
            if due.is_empty() {
                println!("No refills due in the next {} days.", days);
            }
            for s in &due {
                display_scheduled(dm, s);
            }
        }
        ReminderCommand::Sent { id } => {
            let r = dm.mark_reminder_sent(&id)?;
            println!("✓ Reminder {} marked as sent", r.id);
        }
        ReminderCommand::Complete { id } => {
            let r = dm.complete_reminder(&id)?;
            println!("✓ Reminder {} completed", r.id);
        }
        ReminderCommand::Cancel { id } => {
            let r = dm.cancel_reminder(&id)?;
            println!("✓ Reminder {} cancelled", r.id);
        }
    }
    Ok(())
}

fn cmd_scan(dm: &mut DataManager, cmd: ScanCommand) -> Result<()> {
    match cmd {
        ScanCommand::Lookup { barcode } => {
            let m = dm.lookup_barcode(&barcode)?;
            println!(
                "{} → {} ({}), {} in stock at {:.2}",
                barcode.trim(),
                m.name,
                m.id,
                m.stock_quantity,
                m.selling_price
            );
        }
        ScanCommand::Dispense {
            barcode,
            customer,
            quantity,
            doctor,
            dosage,
            instructions,
        } => {
            let scanned = dm.create_prescription_from_scan(
                &barcode,
                NewPrescription {
                    customer_id: customer,
                    quantity,
                    doctor,
                    dosage,
                    instructions,
                    ..Default::default()
                },
            )?;
            println!(
                "✓ Scanned {} ({})",
                scanned.scan.medicine_name, scanned.scan.barcode
            );
            display_created(&scanned.created);
            if !scanned.logged {
                println!("⚠ The prescription was saved but the scan log could not be updated.");
            }
        }
        ScanCommand::Stats => {
            let stats = dm.scan_analytics()?;
            println!("Total scans: {}", stats.total_scans);
            println!("Unique medicines: {}", stats.unique_medicines);
            println!("Units dispensed: {}", stats.total_quantity);
            if let Some(last) = stats.last_scan {
                println!("Last scan: {}", last.format("%Y-%m-%d %H:%M:%S"));
            }
            for (name, count) in stats.most_scanned.iter().take(5) {
                println!("  {:<24} {}", name, count);
            }
        }
    }
    Ok(())
}

fn cmd_report(
    dm: &DataManager,
    kind: ReportKind,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    output: Option<PathBuf>,
    today: NaiveDate,
    config: &Config,
) -> Result<()> {
    let data = dm.collections();
    match kind {
        ReportKind::Inventory => {
            let rows = reports::inventory_rows(&data.medicines, &data.prescriptions, today);
            if let Some(path) = output {
                return write_table(&path, &rows);
            }
            let s = reports::inventory_summary(
                &data.medicines,
                today,
                config.inventory.expiry_warning_days,
            );
            println!("INVENTORY SUMMARY");
            println!("  Items: {} ({} units)", s.total_items, s.total_units);
            println!("  Stock value: {:.2} (cost {:.2})", s.stock_value, s.stock_cost);
            println!("  Potential profit: {:.2}", s.potential_profit);
            println!("  Out of stock: {}", s.out_of_stock);
            println!("  Low stock: {}", s.low_stock);
            println!("  Expired: {}", s.expired);
            println!(
                "  Expiring within {} days: {}",
                config.inventory.expiry_warning_days, s.expiring_soon
            );
            for c in &s.categories {
                println!(
                    "  {:<20} {:>4} items {:>7} units {:>10.2}",
                    c.category, c.items, c.units, c.stock_value
                );
            }
            let reorder: Vec<_> = rows.iter().filter(|r| r.reorder_suggestion > 0).collect();
            if !reorder.is_empty() {
                println!("REORDER");
                for r in reorder {
                    println!("  {:<24} order {}", r.name, r.reorder_suggestion);
                }
            }
        }
        ReportKind::Sales => {
            let rows = reports::sales_by_medicine(&data.prescriptions, &data.medicines);
            if let Some(path) = output {
                return write_table(&path, &rows);
            }
            let m = reports::prescription_metrics(&data.prescriptions);
            println!("SALES");
            println!(
                "  Prescriptions: {} (completed {}, pending {}, cancelled {})",
                m.total, m.completed, m.pending, m.cancelled
            );
            println!("  Completion rate: {:.1}%", m.completion_rate);
            println!("  Revenue: {:.2} (average {:.2})", m.revenue, m.average_value);
            for r in &rows {
                println!(
                    "  {:<24} {:>4} units {:>10.2} revenue {:>10.2} profit",
                    r.medicine_name, r.units, r.revenue, r.profit
                );
            }
        }
        ReportKind::Customers => {
            let rows = reports::customer_spending(&data.prescriptions, &data.customers);
            if let Some(path) = output {
                return write_table(&path, &rows);
            }
            println!("CUSTOMER SPENDING");
            for r in &rows {
                println!(
                    "  {:<24} {:>4} prescriptions {:>10.2}",
                    r.customer_name, r.prescriptions, r.total_spent
                );
            }
        }
        ReportKind::Reminders => {
            let a = reports::reminder_analytics(
                &data.reminders,
                &data.medicines,
                today,
                config.reminders.due_window_days,
            );
            if let Some(path) = output {
                let rows: Vec<ReminderRow> = dm
                    .scheduled_reminders(today)
                    .iter()
                    .map(ReminderRow::from)
                    .collect();
                return write_table(&path, &rows);
            }
            println!("REFILL REMINDERS");
            println!("  Total: {} (active {})", a.total, a.active);
            println!("  Due: {}  Overdue: {}", a.due, a.overdue);
            println!(
                "  Completed: {} ({:.1}%)  Cancelled: {}",
                a.completed, a.completion_rate, a.cancelled
            );
            for (name, count) in &a.top_medicines {
                println!("  {:<24} {}", name, count);
            }
        }
        ReportKind::Compliance => {
            let end = end.unwrap_or(today);
            let start = match start {
                Some(start) => start,
                None => reminders::look_ahead(end, -30)?,
            };
            if start > end {
                return Err(Error::Validation(format!(
                    "report start {} is after end {}",
                    start, end
                )));
            }
            let report = reports::compliance_report(
                &data.prescriptions,
                &data.medicines,
                &data.customers,
                start,
                end,
                today,
                Utc::now(),
            );
            let text = report.render();
            match output {
                Some(path) => {
                    std::fs::write(&path, text)?;
                    println!("✓ Wrote compliance report to {}", path.display());
                }
                None => print!("{}", text),
            }
        }
    }
    Ok(())
}

/// Flat CSV row for the reminder schedule
#[derive(serde::Serialize)]
struct ReminderRow {
    id: String,
    customer_id: String,
    medicine_id: String,
    due_date: NaiveDate,
    days_until_due: i64,
    status: &'static str,
}

impl From<&ScheduledReminder> for ReminderRow {
    fn from(s: &ScheduledReminder) -> Self {
        Self {
            id: s.reminder.id.clone(),
            customer_id: s.reminder.customer_id.clone(),
            medicine_id: s.reminder.medicine_id.clone(),
            due_date: s.due_date,
            days_until_due: s.days_until_due,
            status: s.status.label(),
        }
    }
}

fn write_table<R: serde::Serialize>(path: &Path, rows: &[R]) -> Result<()> {
    let count = export::export_table(path, rows)?;
    println!("✓ Wrote {} rows to {}", count, path.display());
    Ok(())
}

fn cmd_backup(dm: &mut DataManager, cmd: BackupCommand, backup_dir: &Path) -> Result<()> {
    match cmd {
        BackupCommand::Create { name } => {
            let (info, metadata) = dm.create_backup(backup_dir, name.as_deref(), Utc::now())?;
            println!("✓ Created backup {}", info.name);
            println!("  Path: {}", info.path.display());
            println!("  Files: {}", metadata.files.join(", "));
        }
        BackupCommand::List => {
            let backups = backup::list_backups(backup_dir)?;
            if backups.is_empty() {
                println!("No backups found.");
            }
            for b in backups {
                println!(
                    "{:<40} {:>10} bytes  {}",
                    b.name,
                    b.size_bytes,
                    b.modified.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        BackupCommand::Info { name } => {
            let path = backup::archive_path(backup_dir, &name);
            if !path.exists() {
                return Err(Error::NotFound {
                    entity: "Backup",
                    id: name,
                });
            }
            match backup::read_metadata(&path)? {
                Some(meta) => {
                    println!("{}", meta.backup_name);
                    println!("  Created: {}", meta.created_at.format("%Y-%m-%d %H:%M:%S"));
                    println!("  Version: {}", meta.app_version);
                    for (table, count) in &meta.record_counts {
                        println!("  {:<20} {} records", table, count);
                    }
                    println!("  Files: {}", meta.files.join(", "));
                }
                None => println!("{} has no metadata.", name),
            }
        }
        BackupCommand::Delete { name } => {
            if backup::delete_backup(&backup::archive_path(backup_dir, &name))? {
                println!("✓ Deleted backup {}", name);
            } else {
                return Err(Error::NotFound {
                    entity: "Backup",
                    id: name,
                });
            }
        }
        BackupCommand::Storage => {
            let storage = backup::storage_info(backup_dir)?;
            println!("Backups: {}", storage.total_backups);
            println!("Total size: {:.2} MB", storage.total_size_mb());
            println!("Location: {}", backup_dir.display());
        }
    }
    Ok(())
}

// ============================================================================
// Display
// ============================================================================

fn display_medicine(m: &Medicine, today: NaiveDate, expiry_warning_days: i64) {
    println!("{} ({})", m.name, m.id);
    println!("  Category: {}", m.category);
    if let Some(manufacturer) = &m.manufacturer {
        println!("  Manufacturer: {}", manufacturer);
    }
    if let Some(barcode) = &m.barcode {
        println!("  Barcode: {}", barcode);
    }
    println!(
        "  Stock: {} (reorder at {}, {})",
        m.stock_quantity,
        m.reorder_level,
        m.stock_status().label()
    );
    println!("  Price: {:.2} (cost {:.2})", m.selling_price, m.cost_price);
    if let Some(margin) = m.profit_margin() {
        println!("  Margin: {:.1}%", margin * 100.0);
    }
    let days = m.days_until_expiry(today);
    if days < 0 {
        println!("  Expiry: {} (EXPIRED)", m.expiry_date);
    } else if days <= expiry_warning_days {
        println!("  Expiry: {} (in {} days)", m.expiry_date, days);
    } else {
        println!("  Expiry: {}", m.expiry_date);
    }
}

fn display_prescription_line(dm: &DataManager, p: &Prescription) {
    let medicine = dm
        .medicine(&p.medicine_id)
        .map(|m| m.name.as_str())
        .unwrap_or("(deleted)");
    println!(
        "{:<14} {} {:<24} x{:<4} {:>9.2} {:?}",
        p.id, p.date_issued, medicine, p.quantity, p.total_cost, p.status
    );
}

fn display_created(created: &CreatedPrescription) {
    let p = &created.prescription;
    println!(
        "✓ Created prescription {} ({} units, total {:.2})",
        p.id, p.quantity, p.total_cost
    );
    if !created.warnings.is_empty() {
        println!();
        for w in &created.warnings {
            display_warning(w);
        }
    }
}

fn display_scheduled(dm: &DataManager, s: &ScheduledReminder) {
    let customer = dm
        .customer(&s.reminder.customer_id)
        .map(|c| c.name.as_str())
        .unwrap_or("(deleted)");
    let medicine = dm
        .medicine(&s.reminder.medicine_id)
        .map(|m| m.name.as_str())
        .unwrap_or("(deleted)");
    println!(
        "{:<14} {:<20} {:<20} due {} ({:>4} days) {}",
        s.reminder.id,
        customer,
        medicine,
        s.due_date,
        s.days_until_due,
        s.status.label()
    );
}

fn display_warning(w: &Warning) {
    println!(
        "  ⚠ [{}] {}: {}",
        w.severity.label().to_uppercase(),
        w.kind.label(),
        w.description
    );
    println!("    → {}", w.recommendation);
}

fn display_safety_report(report: &SafetyReport) {
    if report.warnings.is_empty() {
        println!("✓ No interactions found.");
        return;
    }
    println!(
        "{} warning(s), {} high risk",
        report.total_warnings, report.high_risk_count
    );
    for w in &report.warnings {
        display_warning(w);
    }
    if !report.is_safe {
        println!();
        println!("High-risk combination: consult the prescriber before dispensing.");
    }
}
