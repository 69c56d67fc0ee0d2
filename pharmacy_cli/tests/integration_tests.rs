//! Integration tests for the pharmacy binary.
//!
//! These tests verify end-to-end behavior including:
//! - Record creation and persistence across invocations
//! - Referential integrity and error reporting
//! - Interaction warnings on dispensing
//! - Export/import, reports and backups

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a test data directory
fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Helper to get the path to the CLI binary
fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("pharmacy"))
}

fn run(data_dir: &Path, args: &[&str]) -> assert_cmd::assert::Assert {
    cli().arg("--data-dir").arg(data_dir).args(args).assert()
}

/// Two medicines with a known high-severity interaction and one customer
fn seed(data_dir: &Path) {
    run(
        data_dir,
        &[
            "medicine", "add", "--id", "MED-WAR", "--name", "Warfarin", "--category",
            "Anticoagulant", "--cost", "4.00", "--price", "9.50", "--stock", "50", "--expiry",
            "2030-01-01",
        ],
    )
    .success();
    run(
        data_dir,
        &[
            "medicine", "add", "--id", "MED-ASP", "--name", "Aspirin", "--category", "Analgesic",
            "--cost", "0.50", "--price", "1.25", "--stock", "200", "--expiry", "2030-01-01",
        ],
    )
    .success();
    run(
        data_dir,
        &[
            "customer", "add", "--id", "CUS-1", "--name", "Grace Hopper", "--phone",
            "555-123-4567", "--dob", "1950-12-09", "--allergy", "Sulfa",
        ],
    )
    .success();
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Pharmacy inventory, prescription and refill manager",
        ));
}

#[test]
fn test_first_run_creates_record_files() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    run(data_dir, &["medicine", "list"])
        .success()
        .stdout(predicate::str::contains("No medicines found"));

    for file in [
        "customers.csv",
        "medicines.csv",
        "prescriptions.csv",
        "refill_reminders.csv",
    ] {
        let content = fs::read_to_string(data_dir.join(file)).unwrap();
        assert!(content.starts_with("id,"), "{} has no header", file);
    }
}

#[test]
fn test_records_persist_between_runs() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    seed(data_dir);

    run(data_dir, &["medicine", "show", "MED-WAR"])
        .success()
        .stdout(predicate::str::contains("Warfarin"))
        .stdout(predicate::str::contains("Stock: 50"));

    run(data_dir, &["customer", "list"])
        .success()
        .stdout(predicate::str::contains("Grace Hopper"));
}

#[test]
fn test_prescription_reports_interaction_and_deducts_stock() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    seed(data_dir);

    run(
        data_dir,
        &[
            "prescription", "add", "--id", "RX-1", "--customer", "CUS-1", "--medicine", "MED-WAR",
            "--quantity", "10", "--doctor", "Dr. Adams",
        ],
    )
    .success()
    .stdout(predicate::str::contains("Created prescription RX-1"));

    run(
        data_dir,
        &[
            "prescription", "add", "--id", "RX-2", "--customer", "CUS-1", "--medicine", "MED-ASP",
            "--quantity", "5", "--doctor", "Dr. Adams",
        ],
    )
    .success()
    .stdout(predicate::str::contains("[HIGH]"))
    .stdout(predicate::str::contains("bleeding"));

    run(data_dir, &["medicine", "show", "MED-WAR"])
        .success()
        .stdout(predicate::str::contains("Stock: 40"));

    let csv = fs::read_to_string(data_dir.join("prescriptions.csv")).unwrap();
    assert_eq!(csv.lines().count(), 3);
}

#[test]
fn test_prescription_for_unknown_customer_fails() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    seed(data_dir);

    run(
        data_dir,
        &[
            "prescription", "add", "--customer", "CUS-404", "--medicine", "MED-WAR", "--quantity",
            "1", "--doctor", "Dr. Adams",
        ],
    )
    .failure()
    .stderr(predicate::str::contains("Customer 'CUS-404' not found"));

    let csv = fs::read_to_string(data_dir.join("prescriptions.csv")).unwrap();
    assert_eq!(csv.lines().count(), 1, "Only the header should remain");
}

#[test]
fn test_quantity_above_stock_rejected() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    seed(data_dir);

    run(
        data_dir,
        &[
            "prescription", "add", "--customer", "CUS-1", "--medicine", "MED-WAR", "--quantity",
            "51", "--doctor", "Dr. Adams",
        ],
    )
    .failure()
    .stderr(predicate::str::contains("insufficient stock"));
}

#[test]
fn test_delete_customer_with_active_reminder_fails() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    seed(data_dir);

    run(
        data_dir,
        &[
            "reminder", "add", "--id", "RR-1", "--customer", "CUS-1", "--medicine", "MED-WAR",
            "--interval", "30", "--last-fill", "2024-01-01",
        ],
    )
    .success()
    .stdout(predicate::str::contains("due 2024-01-31"));

    run(data_dir, &["customer", "delete", "CUS-1"])
        .failure()
        .stderr(predicate::str::contains("Cannot delete Customer 'CUS-1'"));

    run(data_dir, &["reminder", "cancel", "RR-1"]).success();
    run(data_dir, &["customer", "delete", "CUS-1"]).success();
    run(data_dir, &["customer", "show", "CUS-1"])
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_duplicate_id_rejected() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    seed(data_dir);

    run(data_dir, &["customer", "add", "--id", "CUS-1", "--name", "Someone Else"])
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_invalid_email_rejected() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    run(data_dir, &["customer", "add", "--name", "Ada", "--email", "ada-at-example"])
        .failure()
        .stderr(predicate::str::contains("Validation error"));
}

#[test]
fn test_overdue_reminder_listed_as_due() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    seed(data_dir);

    run(
        data_dir,
        &[
            "reminder", "add", "--id", "RR-OLD", "--customer", "CUS-1", "--medicine", "MED-ASP",
            "--interval", "30", "--last-fill", "2020-01-01",
        ],
    )
    .success();

    run(data_dir, &["reminder", "due"])
        .success()
        .stdout(predicate::str::contains("RR-OLD"))
        .stdout(predicate::str::contains("overdue"));
}

#[test]
fn test_check_command_is_order_independent() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    let forward = cli()
        .arg("--data-dir")
        .arg(data_dir)
        .args(["check", "Warfarin", "Aspirin"])
        .output()
        .unwrap();
    let backward = cli()
        .arg("--data-dir")
        .arg(data_dir)
        .args(["check", "aspirin", "WARFARIN"])
        .output()
        .unwrap();

    assert!(forward.status.success());
    assert_eq!(forward.stdout, backward.stdout);
    assert!(String::from_utf8_lossy(&forward.stdout).contains("1 high risk"));
}

#[test]
fn test_scan_dispense_logs_scan() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    seed(data_dir);
    run(
        data_dir,
        &[
            "medicine", "add", "--id", "MED-PAR", "--name", "Paracetamol", "--category",
            "Analgesic", "--cost", "0.20", "--price", "0.80", "--stock", "100", "--expiry",
            "2030-01-01",
        ],
    )
    .success();

    run(data_dir, &["scan", "lookup", "PARA001"])
        .success()
        .stdout(predicate::str::contains("MED-PAR"));

    run(
        data_dir,
        &[
            "scan", "dispense", "PARA001", "--customer", "CUS-1", "--quantity", "2", "--doctor",
            "Dr. Adams",
        ],
    )
    .success()
    .stdout(predicate::str::contains("Scanned Paracetamol"));

    let log = fs::read_to_string(data_dir.join("scanned_medicines.jsonl")).unwrap();
    assert_eq!(log.lines().count(), 1);
    assert!(log.contains("\"medicine_id\":\"MED-PAR\""));

    run(data_dir, &["scan", "stats"])
        .success()
        .stdout(predicate::str::contains("Total scans: 1"));
}

#[test]
fn test_scan_dispense_with_unwritable_log_still_succeeds() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    seed(data_dir);
    run(
        data_dir,
        &[
            "medicine", "add", "--id", "MED-PAR", "--name", "Paracetamol", "--category",
            "Analgesic", "--cost", "0.20", "--price", "0.80", "--stock", "100", "--expiry",
            "2030-01-01",
        ],
    )
    .success();
    fs::create_dir(data_dir.join("scanned_medicines.jsonl")).unwrap();

    run(
        data_dir,
        &[
            "scan", "dispense", "PARA001", "--customer", "CUS-1", "--quantity", "2", "--doctor",
            "Dr. Adams",
        ],
    )
    .success()
    .stdout(predicate::str::contains("Created prescription"))
    .stdout(predicate::str::contains("scan log could not be updated"));

    // Retrying is not needed: the dispense happened exactly once
    run(data_dir, &["medicine", "show", "MED-PAR"])
        .success()
        .stdout(predicate::str::contains("Stock: 98"));
}

#[test]
fn test_export_import_roundtrip() {
    let source = setup_test_dir();
    let target = setup_test_dir();
    let exports = setup_test_dir();
    seed(source.path());

    let medicines_csv = exports.path().join("medicines.csv");
    run(
        source.path(),
        &["export", "medicines", "--output", medicines_csv.to_str().unwrap()],
    )
    .success()
    .stdout(predicate::str::contains("Exported 2 medicines"));

    run(
        target.path(),
        &["import", "medicines", medicines_csv.to_str().unwrap()],
    )
    .success()
    .stdout(predicate::str::contains("Imported 2 medicines"));

    assert_eq!(
        fs::read_to_string(source.path().join("medicines.csv")).unwrap(),
        fs::read_to_string(target.path().join("medicines.csv")).unwrap()
    );

    // Importing the same file again would duplicate every id
    run(
        target.path(),
        &["import", "medicines", medicines_csv.to_str().unwrap()],
    )
    .failure()
    .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_prescription_export_by_date_range() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    seed(data_dir);
    for (id, date) in [("RX-JAN", "2024-01-10"), ("RX-MAR", "2024-03-10")] {
        run(
            data_dir,
            &[
                "prescription", "add", "--id", id, "--customer", "CUS-1", "--medicine", "MED-ASP",
                "--quantity", "1", "--doctor", "Dr. Adams", "--date", date,
            ],
        )
        .success();
    }

    let out = data_dir.join("march.csv");
    run(
        data_dir,
        &[
            "export", "prescriptions", "--start", "2024-03-01", "--end", "2024-03-31",
            "--output", out.to_str().unwrap(),
        ],
    )
    .success()
    .stdout(predicate::str::contains("Exported 1 prescriptions"));
    let content = fs::read_to_string(&out).unwrap();
    assert!(content.contains("RX-MAR"));
    assert!(!content.contains("RX-JAN"));

    run(data_dir, &["export", "customers", "--start", "2024-03-01"])
        .failure()
        .stderr(predicate::str::contains("only apply to prescriptions"));
}

#[test]
fn test_reports() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    seed(data_dir);
    run(
        data_dir,
        &[
            "prescription", "add", "--id", "RX-1", "--customer", "CUS-1", "--medicine", "MED-ASP",
            "--quantity", "4", "--doctor", "Dr. Adams",
        ],
    )
    .success();
    run(data_dir, &["prescription", "status", "RX-1", "completed"]).success();

    run(data_dir, &["report", "inventory"])
        .success()
        .stdout(predicate::str::contains("Items: 2"));

    run(data_dir, &["report", "sales"])
        .success()
        .stdout(predicate::str::contains("Revenue: 5.00"));

    run(data_dir, &["report", "compliance"])
        .success()
        .stdout(predicate::str::contains("PHARMACY COMPLIANCE REPORT"));

    let out = data_dir.join("inventory.csv");
    run(
        data_dir,
        &["report", "inventory", "--output", out.to_str().unwrap()],
    )
    .success();
    let csv = fs::read_to_string(&out).unwrap();
    assert!(csv.starts_with("id,name,category"));
    assert_eq!(csv.lines().count(), 3);
}

#[test]
fn test_backup_lifecycle() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    seed(data_dir);

    run(data_dir, &["backup", "create", "--name", "nightly"])
        .success()
        .stdout(predicate::str::contains("Created backup nightly"));
    assert!(data_dir.join("backups/nightly.tar.gz").exists());

    run(data_dir, &["backup", "list"])
        .success()
        .stdout(predicate::str::contains("nightly"));

    run(data_dir, &["backup", "info", "nightly"])
        .success()
        .stdout(predicate::str::contains("medicines"))
        .stdout(predicate::str::contains("2 records"));

    run(data_dir, &["backup", "storage"])
        .success()
        .stdout(predicate::str::contains("Backups: 1"));

    run(data_dir, &["backup", "delete", "nightly"]).success();
    run(data_dir, &["backup", "info", "nightly"])
        .failure()
        .stderr(predicate::str::contains("not found"));
}
