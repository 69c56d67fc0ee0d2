//! Core domain types for the pharmacy record manager.
//!
//! This module defines the persisted entities and their derived fields:
//! - Medicines (inventory) and stock classification
//! - Customers and their clinical profile
//! - Prescriptions and their lifecycle
//! - Refill reminders

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

/// Generate a fresh identifier with a readable prefix (e.g. `MED-1A2B3C4D`)
pub fn generate_id(prefix: &str) -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, raw[..8].to_uppercase())
}

/// Basic email shape check
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

/// Accepts 10-digit numbers, or 11 digits with a leading country code 1
pub fn is_valid_phone(phone: &str) -> bool {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.len() == 10 || (digits.len() == 11 && digits.starts_with('1'))
}

/// Separator of list-valued CSV columns (allergies, conditions)
pub const LIST_SEPARATOR: char = ';';

fn require(field: &str, value: &str) -> std::result::Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{} is required", field))
    } else {
        Ok(())
    }
}

// ============================================================================
// Medicines
// ============================================================================

/// Stock level relative to the reorder level
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    OutOfStock,
    Low,
    Good,
    High,
}

impl StockStatus {
    pub fn classify(stock_quantity: u32, reorder_level: u32) -> Self {
        if stock_quantity == 0 {
            StockStatus::OutOfStock
        } else if stock_quantity <= reorder_level {
            StockStatus::Low
        } else if stock_quantity <= reorder_level.saturating_mul(2) {
            StockStatus::Good
        } else {
            StockStatus::High
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StockStatus::OutOfStock => "Out of Stock",
            StockStatus::Low => "Low Stock",
            StockStatus::Good => "Good Stock",
            StockStatus::High => "High Stock",
        }
    }
}

/// An inventory item
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Medicine {
    pub id: String,
    pub name: String,
    pub category: String,
    pub manufacturer: Option<String>,
    pub supplier: Option<String>,
    pub barcode: Option<String>,
    pub cost_price: f64,
    pub selling_price: f64,
    pub stock_quantity: u32,
    pub reorder_level: u32,
    pub expiry_date: NaiveDate,
    pub description: Option<String>,
    pub date_added: NaiveDate,
}

impl Medicine {
    pub fn validate(&self) -> std::result::Result<(), String> {
        require("id", &self.id)?;
        require("name", &self.name)?;
        require("category", &self.category)?;
        if !self.cost_price.is_finite() || self.cost_price < 0.0 {
            return Err(format!("cost price must be >= 0, got {}", self.cost_price));
        }
        if !self.selling_price.is_finite() || self.selling_price < 0.0 {
            return Err(format!(
                "selling price must be >= 0, got {}",
                self.selling_price
            ));
        }
        Ok(())
    }

    pub fn stock_status(&self) -> StockStatus {
        StockStatus::classify(self.stock_quantity, self.reorder_level)
    }

    /// Negative once the expiry date has passed
    pub fn days_until_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry_date - today).num_days()
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date < today
    }

    /// `(selling - cost) / selling`; `None` when the selling price is not positive
    pub fn profit_margin(&self) -> Option<f64> {
        if self.selling_price > 0.0 {
            Some((self.selling_price - self.cost_price) / self.selling_price)
        } else {
            None
        }
    }

    /// Stock valued at selling price
    pub fn stock_value(&self) -> f64 {
        f64::from(self.stock_quantity) * self.selling_price
    }

    /// Stock valued at cost price
    pub fn stock_cost(&self) -> f64 {
        f64::from(self.stock_quantity) * self.cost_price
    }
}

// ============================================================================
// Customers
// ============================================================================

/// A registered customer (patient)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub gender: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub allergies: Vec<String>,
    pub conditions: Vec<String>,
    pub emergency_contact: Option<String>,
    pub date_registered: NaiveDate,
}

impl Customer {
    pub fn validate(&self) -> std::result::Result<(), String> {
        require("id", &self.id)?;
        require("name", &self.name)?;
        if let Some(email) = self.email.as_deref() {
            if !is_valid_email(email) {
                return Err(format!("invalid email address '{}'", email));
            }
        }
        if let Some(phone) = self.phone.as_deref() {
            if !is_valid_phone(phone) {
                return Err(format!("invalid phone number '{}'", phone));
            }
        }
        list_items("allergy", &self.allergies)?;
        list_items("condition", &self.conditions)?;
        Ok(())
    }

    /// Age in whole years on `today`; `None` without a date of birth
    pub fn age_on(&self, today: NaiveDate) -> Option<u32> {
        let dob = self.date_of_birth?;
        let mut years = today.year() - dob.year();
        if (today.month(), today.day()) < (dob.month(), dob.day()) {
            years -= 1;
        }
        u32::try_from(years).ok()
    }
}

/// List entries share one CSV column, so none may contain the separator
fn list_items(kind: &str, items: &[String]) -> std::result::Result<(), String> {
    match items.iter().find(|item| item.contains(LIST_SEPARATOR)) {
        Some(item) => Err(format!(
            "{} '{}' must not contain '{}'",
            kind, item, LIST_SEPARATOR
        )),
        None => Ok(()),
    }
}

// ============================================================================
// Prescriptions
// ============================================================================

/// Prescription lifecycle
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Pending,
    PartiallyFilled,
    Completed,
    Cancelled,
}

impl PrescriptionStatus {
    /// Pending or partially filled prescriptions still hold their references
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PrescriptionStatus::Pending | PrescriptionStatus::PartiallyFilled
        )
    }
}

/// How the prescription was entered
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionSource {
    Manual,
    Scan,
}

/// A dispensed prescription
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub id: String,
    pub customer_id: String,
    pub medicine_id: String,
    pub quantity: u32,
    pub dosage: Option<String>,
    pub instructions: Option<String>,
    pub doctor: String,
    pub date_issued: NaiveDate,
    pub status: PrescriptionStatus,
    pub total_cost: f64,
    pub source: PrescriptionSource,
    pub created_at: DateTime<Utc>,
}

impl Prescription {
    pub fn validate(&self) -> std::result::Result<(), String> {
        require("id", &self.id)?;
        require("customer_id", &self.customer_id)?;
        require("medicine_id", &self.medicine_id)?;
        require("doctor", &self.doctor)?;
        if self.quantity == 0 {
            return Err("quantity must be greater than 0".into());
        }
        if !self.total_cost.is_finite() || self.total_cost < 0.0 {
            return Err(format!("total cost must be >= 0, got {}", self.total_cost));
        }
        Ok(())
    }
}

/// Caller-supplied fields for a new prescription
///
/// Status, cost and creation time are filled in by the data manager.
#[derive(Clone, Debug, Default)]
pub struct NewPrescription {
    pub id: Option<String>,
    pub customer_id: String,
    pub medicine_id: String,
    pub quantity: u32,
    pub doctor: String,
    pub dosage: Option<String>,
    pub instructions: Option<String>,
    pub date_issued: Option<NaiveDate>,
}

// ============================================================================
// Refill reminders
// ============================================================================

/// Persisted reminder state; the due/overdue status is computed on read
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReminderState {
    Pending,
    Sent,
    Completed,
    Cancelled,
}

impl ReminderState {
    pub fn is_active(&self) -> bool {
        matches!(self, ReminderState::Pending | ReminderState::Sent)
    }
}

/// A recurring refill reminder
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefillReminder {
    pub id: String,
    pub customer_id: String,
    pub medicine_id: String,
    pub interval_days: u32,
    pub last_fill_date: NaiveDate,
    pub state: ReminderState,
    pub dosage: Option<String>,
    pub quantity_per_refill: u32,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RefillReminder {
    pub fn validate(&self) -> std::result::Result<(), String> {
        require("id", &self.id)?;
        require("customer_id", &self.customer_id)?;
        require("medicine_id", &self.medicine_id)?;
        if !(1..=crate::reminders::MAX_INTERVAL_DAYS).contains(&self.interval_days) {
            return Err(format!(
                "refill interval must be between 1 and {} days",
                crate::reminders::MAX_INTERVAL_DAYS
            ));
        }
        Ok(())
    }

    pub fn due_date(&self) -> NaiveDate {
        crate::reminders::due_date(self.last_fill_date, self.interval_days)
    }
}
