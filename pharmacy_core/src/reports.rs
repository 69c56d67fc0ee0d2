//! Summary reports over the record collections.
//!
//! Everything here is a pure function of the collections passed in; nothing
//! is cached or persisted. Row types derive `Serialize` so they can go
//! straight to `export::export_table`.

use crate::reminders::{ScheduleStatus, ScheduledReminder};
use crate::{
    Customer, Medicine, Prescription, PrescriptionStatus, RefillReminder, ReminderState,
    StockStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

/// `(selling - cost) / selling`, undefined when the selling price is not positive
pub fn profit_margin(medicine: &Medicine) -> Option<f64> {
    medicine.profit_margin()
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

// ============================================================================
// Inventory
// ============================================================================

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CategorySummary {
    pub category: String,
    pub items: usize,
    pub units: u64,
    pub stock_value: f64,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct InventorySummary {
    pub total_items: usize,
    pub total_units: u64,
    pub stock_value: f64,
    pub stock_cost: f64,
    pub potential_profit: f64,
    pub out_of_stock: usize,
    pub low_stock: usize,
    pub expired: usize,
    pub expiring_soon: usize,
    pub categories: Vec<CategorySummary>,
}

/// Inventory totals; `expiring_soon` counts unexpired items within `expiry_days`
pub fn inventory_summary(
    medicines: &[Medicine],
    today: NaiveDate,
    expiry_days: i64,
) -> InventorySummary {
    let mut categories: BTreeMap<&str, CategorySummary> = BTreeMap::new();
    for med in medicines {
        let entry = categories
            .entry(med.category.as_str())
            .or_insert_with(|| CategorySummary {
                category: med.category.clone(),
                items: 0,
                units: 0,
                stock_value: 0.0,
            });
        entry.items += 1;
        entry.units += u64::from(med.stock_quantity);
        entry.stock_value += med.stock_value();
    }

    let stock_value: f64 = medicines.iter().map(Medicine::stock_value).sum();
    let stock_cost: f64 = medicines.iter().map(Medicine::stock_cost).sum();

    InventorySummary {
        total_items: medicines.len(),
        total_units: medicines.iter().map(|m| u64::from(m.stock_quantity)).sum(),
        stock_value,
        stock_cost,
        potential_profit: stock_value - stock_cost,
        out_of_stock: medicines
            .iter()
            .filter(|m| m.stock_status() == StockStatus::OutOfStock)
            .count(),
        low_stock: medicines
            .iter()
            .filter(|m| m.stock_quantity <= m.reorder_level)
            .count(),
        expired: medicines.iter().filter(|m| m.is_expired(today)).count(),
        expiring_soon: medicines
            .iter()
            .filter(|m| {
                let days = m.days_until_expiry(today);
                (0..=expiry_days).contains(&days)
            })
            .count(),
        categories: categories.into_values().collect(),
    }
}

/// One line of the inventory report
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct InventoryRow {
    pub id: String,
    pub name: String,
    pub category: String,
    pub stock_quantity: u32,
    pub reorder_level: u32,
    pub stock_status: &'static str,
    pub days_until_expiry: i64,
    pub selling_price: f64,
    pub profit_margin: Option<f64>,
    pub reorder_suggestion: u32,
}

/// Days of dispensing history behind the average daily usage
pub const USAGE_WINDOW_DAYS: i64 = 30;

/// Average units per day per medicine id, over prescriptions issued in the
/// last `USAGE_WINDOW_DAYS` days up to `today`. Cancelled ones are ignored.
pub fn average_daily_usage(prescriptions: &[Prescription], today: NaiveDate) -> HashMap<String, f64> {
    let mut units: HashMap<String, u64> = HashMap::new();
    for p in prescriptions {
        let age = (today - p.date_issued).num_days();
        if p.status != PrescriptionStatus::Cancelled && (0..USAGE_WINDOW_DAYS).contains(&age) {
            *units.entry(p.medicine_id.clone()).or_default() += u64::from(p.quantity);
        }
    }
    units
        .into_iter()
        .map(|(id, total)| (id, total as f64 / USAGE_WINDOW_DAYS as f64))
        .collect()
}

pub fn inventory_rows(
    medicines: &[Medicine],
    prescriptions: &[Prescription],
    today: NaiveDate,
) -> Vec<InventoryRow> {
    let usage = average_daily_usage(prescriptions, today);
    medicines
        .iter()
        .map(|m| InventoryRow {
            id: m.id.clone(),
            name: m.name.clone(),
            category: m.category.clone(),
            stock_quantity: m.stock_quantity,
            reorder_level: m.reorder_level,
            stock_status: m.stock_status().label(),
            days_until_expiry: m.days_until_expiry(today),
            selling_price: m.selling_price,
            profit_margin: m.profit_margin(),
            reorder_suggestion: reorder_suggestion(
                m.stock_quantity,
                m.reorder_level,
                usage.get(&m.id).copied(),
            ),
        })
        .collect()
}

/// Units to order for an item at or below its reorder level
///
/// Targets three times the reorder level, or thirty days of average daily
/// usage when that is larger, and never less than the reorder level itself.
pub fn reorder_suggestion(stock: u32, reorder_level: u32, avg_daily_usage: Option<f64>) -> u32 {
    if stock > reorder_level {
        return 0;
    }
    let mut suggested = reorder_level.saturating_mul(3).saturating_sub(stock);
    if let Some(usage) = avg_daily_usage.filter(|u| u.is_finite() && *u > 0.0) {
        let monthly = (usage * 30.0).ceil().min(f64::from(u32::MAX)) as u32;
        suggested = suggested.max(monthly);
    }
    suggested.max(reorder_level)
}

// ============================================================================
// Prescriptions and sales
// ============================================================================

#[derive(Clone, Debug, Serialize, PartialEq, Default)]
pub struct PrescriptionMetrics {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub partially_filled: usize,
    pub cancelled: usize,
    /// Percent of all prescriptions that are completed
    pub completion_rate: f64,
    /// Sum of completed prescription totals
    pub revenue: f64,
    pub average_value: f64,
}

pub fn prescription_metrics(prescriptions: &[Prescription]) -> PrescriptionMetrics {
    let count = |status: PrescriptionStatus| prescriptions.iter().filter(|p| p.status == status).count();
    let completed = count(PrescriptionStatus::Completed);
    let revenue: f64 = prescriptions
        .iter()
        .filter(|p| p.status == PrescriptionStatus::Completed)
        .map(|p| p.total_cost)
        .sum();

    PrescriptionMetrics {
        total: prescriptions.len(),
        completed,
        pending: count(PrescriptionStatus::Pending),
        partially_filled: count(PrescriptionStatus::PartiallyFilled),
        cancelled: count(PrescriptionStatus::Cancelled),
        completion_rate: percentage(completed, prescriptions.len()),
        revenue,
        average_value: if completed == 0 {
            0.0
        } else {
            revenue / completed as f64
        },
    }
}

/// Prescriptions issued within `[start, end]`
pub fn prescriptions_in_period(
    prescriptions: &[Prescription],
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<Prescription> {
    prescriptions
        .iter()
        .filter(|p| p.date_issued >= start && p.date_issued <= end)
        .cloned()
        .collect()
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct MedicineSales {
    pub medicine_id: String,
    pub medicine_name: String,
    pub prescriptions: usize,
    pub units: u64,
    pub revenue: f64,
    /// Revenue minus units at the current cost price
    pub profit: f64,
}

/// Completed sales per medicine, highest revenue first
pub fn sales_by_medicine(prescriptions: &[Prescription], medicines: &[Medicine]) -> Vec<MedicineSales> {
    let by_id: HashMap<&str, &Medicine> = medicines.iter().map(|m| (m.id.as_str(), m)).collect();
    let mut sales: BTreeMap<&str, MedicineSales> = BTreeMap::new();

    for p in prescriptions
        .iter()
        .filter(|p| p.status == PrescriptionStatus::Completed)
    {
        let medicine = by_id.get(p.medicine_id.as_str());
        let entry = sales.entry(p.medicine_id.as_str()).or_insert_with(|| MedicineSales {
            medicine_id: p.medicine_id.clone(),
            medicine_name: medicine
                .map(|m| m.name.clone())
                .unwrap_or_else(|| "(deleted)".into()),
            prescriptions: 0,
            units: 0,
            revenue: 0.0,
            profit: 0.0,
        });
        let cost = medicine.map(|m| m.cost_price).unwrap_or(0.0) * f64::from(p.quantity);
        entry.prescriptions += 1;
        entry.units += u64::from(p.quantity);
        entry.revenue += p.total_cost;
        entry.profit += p.total_cost - cost;
    }

    let mut rows: Vec<MedicineSales> = sales.into_values().collect();
    rows.sort_by(|a, b| b.revenue.total_cmp(&a.revenue));
    rows
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CustomerSpending {
    pub customer_id: String,
    pub customer_name: String,
    pub prescriptions: usize,
    pub total_spent: f64,
}

/// Completed spend per customer, highest first
pub fn customer_spending(prescriptions: &[Prescription], customers: &[Customer]) -> Vec<CustomerSpending> {
    let names: HashMap<&str, &str> = customers
        .iter()
        .map(|c| (c.id.as_str(), c.name.as_str()))
        .collect();
    let mut spending: BTreeMap<&str, CustomerSpending> = BTreeMap::new();

    for p in prescriptions
        .iter()
        .filter(|p| p.status == PrescriptionStatus::Completed)
    {
        let entry = spending
            .entry(p.customer_id.as_str())
            .or_insert_with(|| CustomerSpending {
                customer_id: p.customer_id.clone(),
                customer_name: names
                    .get(p.customer_id.as_str())
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "(deleted)".into()),
                prescriptions: 0,
                total_spent: 0.0,
            });
        entry.prescriptions += 1;
        entry.total_spent += p.total_cost;
    }

    let mut rows: Vec<CustomerSpending> = spending.into_values().collect();
    rows.sort_by(|a, b| b.total_spent.total_cmp(&a.total_spent));
    rows
}

// ============================================================================
// Reminders
// ============================================================================

#[derive(Clone, Debug, Serialize, PartialEq, Default)]
pub struct ReminderAnalytics {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub due: usize,
    pub overdue: usize,
    pub completion_rate: f64,
    /// Medicine name and reminder count, most reminded first (top 10)
    pub top_medicines: Vec<(String, usize)>,
}

pub fn reminder_analytics(
    reminders: &[RefillReminder],
    medicines: &[Medicine],
    today: NaiveDate,
    window_days: i64,
) -> ReminderAnalytics {
    let names: HashMap<&str, &str> = medicines
        .iter()
        .map(|m| (m.id.as_str(), m.name.as_str()))
        .collect();
    let statuses: Vec<ScheduleStatus> = reminders
        .iter()
        .map(|r| ScheduledReminder::evaluate(r, today, window_days).status)
        .collect();

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for r in reminders {
        let name = names.get(r.medicine_id.as_str()).copied().unwrap_or("(deleted)");
        *counts.entry(name).or_default() += 1;
    }
    let mut top_medicines: Vec<(String, usize)> =
        counts.into_iter().map(|(n, c)| (n.to_string(), c)).collect();
    top_medicines.sort_by(|a, b| b.1.cmp(&a.1));
    top_medicines.truncate(10);

    let completed = reminders
        .iter()
        .filter(|r| r.state == ReminderState::Completed)
        .count();

    ReminderAnalytics {
        total: reminders.len(),
        active: reminders.iter().filter(|r| r.state.is_active()).count(),
        completed,
        cancelled: reminders
            .iter()
            .filter(|r| r.state == ReminderState::Cancelled)
            .count(),
        due: statuses.iter().filter(|s| **s == ScheduleStatus::Due).count(),
        overdue: statuses.iter().filter(|s| **s == ScheduleStatus::Overdue).count(),
        completion_rate: percentage(completed, reminders.len()),
        top_medicines,
    }
}

// ============================================================================
// Compliance
// ============================================================================

/// Regulatory summary for a reporting period
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ComplianceReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub prescriptions: PrescriptionMetrics,
    pub total_medicines: usize,
    pub low_stock: usize,
    pub out_of_stock: usize,
    pub expired: usize,
    pub expiring_within_30_days: usize,
    pub total_customers: usize,
    pub active_customers: usize,
}

pub fn compliance_report(
    prescriptions: &[Prescription],
    medicines: &[Medicine],
    customers: &[Customer],
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
    generated_at: DateTime<Utc>,
) -> ComplianceReport {
    let period = prescriptions_in_period(prescriptions, start, end);
    let inventory = inventory_summary(medicines, today, 30);
    let mut active: Vec<&str> = period.iter().map(|p| p.customer_id.as_str()).collect();
    active.sort_unstable();
    active.dedup();

    ComplianceReport {
        start,
        end,
        generated_at,
        prescriptions: prescription_metrics(&period),
        total_medicines: inventory.total_items,
        low_stock: inventory.low_stock,
        out_of_stock: inventory.out_of_stock,
        expired: inventory.expired,
        expiring_within_30_days: inventory.expiring_soon,
        total_customers: customers.len(),
        active_customers: active.len(),
    }
}

impl ComplianceReport {
    /// Plain-text rendering for printing or saving
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "PHARMACY COMPLIANCE REPORT");
        let _ = writeln!(out, "{}", "=".repeat(50));
        let _ = writeln!(out, "Report Period: {} to {}", self.start, self.end);
        let _ = writeln!(out, "Generated: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out);

        let _ = writeln!(out, "PRESCRIPTION ACTIVITY SUMMARY");
        let _ = writeln!(out, "{}", "-".repeat(30));
        let p = &self.prescriptions;
        if p.total == 0 {
            let _ = writeln!(out, "No prescriptions found for this period");
        } else {
            let _ = writeln!(out, "Total Prescriptions: {}", p.total);
            let _ = writeln!(out, "Completed: {}", p.completed);
            let _ = writeln!(out, "Pending: {}", p.pending);
            let _ = writeln!(out, "Cancelled: {}", p.cancelled);
            let _ = writeln!(out, "Completion Rate: {:.1}%", p.completion_rate);
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "INVENTORY COMPLIANCE");
        let _ = writeln!(out, "{}", "-".repeat(20));
        let _ = writeln!(out, "Total Medicines in Inventory: {}", self.total_medicines);
        let _ = writeln!(out, "Low Stock Items: {}", self.low_stock);
        let _ = writeln!(out, "Out of Stock Items: {}", self.out_of_stock);
        let _ = writeln!(out, "Expired Medicines: {}", self.expired);
        let _ = writeln!(out, "Expiring within 30 days: {}", self.expiring_within_30_days);
        if self.expired > 0 {
            let _ = writeln!(out, "COMPLIANCE ALERT: Expired medicines detected");
        }
        if self.out_of_stock > 0 {
            let _ = writeln!(out, "COMPLIANCE ALERT: Out of stock medicines detected");
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "CUSTOMER ACTIVITY");
        let _ = writeln!(out, "{}", "-".repeat(17));
        let _ = writeln!(out, "Total Registered Customers: {}", self.total_customers);
        let _ = writeln!(out, "Active Customers (Period): {}", self.active_customers);
        let _ = writeln!(out);
        let _ = writeln!(out, "END OF REPORT");
        out
    }
}
