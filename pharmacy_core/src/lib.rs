#![forbid(unsafe_code)]

//! Core domain model and business logic for the pharmacy record manager.
//!
//! This crate provides:
//! - Domain types (medicines, customers, prescriptions, refill reminders)
//! - Persistence (typed CSV collections, scan log, backups)
//! - The data manager that mediates every mutation
//! - Interaction checking, reminder scheduling and reports

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod store;
pub mod interactions;
pub mod reminders;
pub mod reports;
pub mod export;
pub mod barcode;
pub mod backup;
pub mod manager;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use interactions::{default_table, InteractionTable, SafetyReport, Severity, Warning};
pub use reminders::{ScheduleStatus, ScheduledReminder};
pub use manager::{CollectionKind, CreatedPrescription, DataManager, ScannedPrescription};
