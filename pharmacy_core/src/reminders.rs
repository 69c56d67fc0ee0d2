//! Refill reminder scheduling.
//!
//! Nothing here runs on a timer: the due date and the due/overdue status are
//! pure functions of the stored last-fill date, interval and state, evaluated
//! every time a reminder is read.

use crate::{Error, RefillReminder, ReminderState, Result};
use chrono::{Duration, NaiveDate};
use serde::Serialize;

/// Days before the due date during which a reminder counts as due
pub const DEFAULT_DUE_WINDOW_DAYS: i64 = 3;

/// Longest accepted refill interval (ten years)
pub const MAX_INTERVAL_DAYS: u32 = 3650;

/// Computed reminder status
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    Due,
    Overdue,
    Completed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Due => "due",
            ScheduleStatus::Overdue => "overdue",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }
}

/// `date` moved by `days`; `None` when the result leaves the calendar range
pub fn shift_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    Duration::try_days(days).and_then(|delta| date.checked_add_signed(delta))
}

/// Cutoff date for a look-ahead query
pub fn look_ahead(today: NaiveDate, days: i64) -> Result<NaiveDate> {
    shift_days(today, days)
        .ok_or_else(|| Error::Validation(format!("look-ahead of {} days is out of range", days)))
}

/// Next refill date: last fill plus the interval
///
/// Saturates at the last representable date.
pub fn due_date(last_fill: NaiveDate, interval_days: u32) -> NaiveDate {
    shift_days(last_fill, i64::from(interval_days)).unwrap_or(NaiveDate::MAX)
}

/// Negative when the due date has passed
pub fn days_until_due(due_date: NaiveDate, today: NaiveDate) -> i64 {
    (due_date - today).num_days()
}

/// Status with the default three-day due window
pub fn status(due_date: NaiveDate, today: NaiveDate, state: ReminderState) -> ScheduleStatus {
    status_with_window(due_date, today, state, DEFAULT_DUE_WINDOW_DAYS)
}

/// Status for a reminder given its stored state
///
/// Sent reminders keep counting towards due/overdue until completed.
pub fn status_with_window(
    due_date: NaiveDate,
    today: NaiveDate,
    state: ReminderState,
    window_days: i64,
) -> ScheduleStatus {
    match state {
        ReminderState::Completed => return ScheduleStatus::Completed,
        ReminderState::Cancelled => return ScheduleStatus::Cancelled,
        ReminderState::Pending | ReminderState::Sent => {}
    }

    let remaining = days_until_due(due_date, today);
    if remaining < 0 {
        ScheduleStatus::Overdue
    } else if remaining <= window_days {
        ScheduleStatus::Due
    } else {
        ScheduleStatus::Pending
    }
}

/// A reminder together with its computed schedule
#[derive(Clone, Debug, Serialize)]
pub struct ScheduledReminder {
    pub reminder: RefillReminder,
    pub due_date: NaiveDate,
    pub days_until_due: i64,
    pub status: ScheduleStatus,
}

impl ScheduledReminder {
    pub fn evaluate(reminder: &RefillReminder, today: NaiveDate, window_days: i64) -> Self {
        let due = reminder.due_date();
        Self {
            reminder: reminder.clone(),
            due_date: due,
            days_until_due: days_until_due(due, today),
            status: status_with_window(due, today, reminder.state, window_days),
        }
    }
}

/// Active reminders due on or before `today + days_ahead`, soonest first
pub fn due_within(
    reminders: &[RefillReminder],
    today: NaiveDate,
    days_ahead: i64,
    window_days: i64,
) -> Result<Vec<ScheduledReminder>> {
    let cutoff = look_ahead(today, days_ahead)?;
    let mut due: Vec<ScheduledReminder> = reminders
        .iter()
        .filter(|r| r.state.is_active() && r.due_date() <= cutoff)
        .map(|r| ScheduledReminder::evaluate(r, today, window_days))
        .collect();
    due.sort_by(|a, b| {
        a.due_date
            .cmp(&b.due_date)
            .then_with(|| a.reminder.id.cmp(&b.reminder.id))
    });
    Ok(due)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn reminder(id: &str, last_fill: NaiveDate, interval: u32, state: ReminderState) -> RefillReminder {
        RefillReminder {
            id: id.into(),
            customer_id: "CUS-1".into(),
            medicine_id: "MED-1".into(),
            interval_days: interval,
            last_fill_date: last_fill,
            state,
            dosage: None,
            quantity_per_refill: 30,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_due_date_adds_interval() {
        assert_eq!(due_date(date(2024, 1, 1), 30), date(2024, 1, 31));
        assert_eq!(due_date(date(2024, 2, 15), 30), date(2024, 3, 16));
    }

    #[test]
    fn test_status_windows() {
        let due = date(2024, 1, 31);
        assert_eq!(status(due, date(2024, 1, 20), ReminderState::Pending), ScheduleStatus::Pending);
        assert_eq!(status(due, date(2024, 1, 28), ReminderState::Pending), ScheduleStatus::Due);
        assert_eq!(status(due, date(2024, 1, 31), ReminderState::Sent), ScheduleStatus::Due);
        assert_eq!(status(due, date(2024, 2, 1), ReminderState::Sent), ScheduleStatus::Overdue);
    }

    #[test]
    fn test_terminal_states_override_dates() {
        let due = date(2024, 1, 31);
        assert_eq!(status(due, date(2024, 3, 1), ReminderState::Completed), ScheduleStatus::Completed);
        assert_eq!(status(due, date(2024, 3, 1), ReminderState::Cancelled), ScheduleStatus::Cancelled);
    }

    #[test]
    fn test_due_within_filters_and_sorts() {
        let today = date(2024, 3, 1);
        let reminders = vec![
            reminder("late", date(2024, 1, 1), 30, ReminderState::Pending),
            reminder("soon", date(2024, 2, 5), 30, ReminderState::Sent),
            reminder("far", date(2024, 2, 25), 30, ReminderState::Pending),
            reminder("done", date(2024, 1, 1), 30, ReminderState::Completed),
        ];

        let due = due_within(&reminders, today, 7, DEFAULT_DUE_WINDOW_DAYS).unwrap();
        let ids: Vec<_> = due.iter().map(|s| s.reminder.id.as_str()).collect();
        assert_eq!(ids, vec!["late", "soon"]);
        assert_eq!(due[0].status, ScheduleStatus::Overdue);
        // 2024 is a leap year: Feb 5 + 30 days = Mar 6
        assert_eq!(due[1].days_until_due, 5);
        assert_eq!(due[1].status, ScheduleStatus::Pending);
    }

    #[test]
    fn test_due_date_saturates_at_calendar_end() {
        let late = NaiveDate::MAX - Duration::days(5);
        assert_eq!(due_date(late, 30), NaiveDate::MAX);
        assert_eq!(shift_days(date(2024, 1, 1), i64::MAX), None);
        assert_eq!(shift_days(date(2024, 3, 1), -1), Some(date(2024, 2, 29)));
    }

    #[test]
    fn test_huge_look_ahead_is_rejected() {
        let reminders = vec![reminder("r", date(2024, 1, 1), 30, ReminderState::Pending)];
        let err = due_within(&reminders, date(2024, 1, 1), 999_999_999, 3).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(look_ahead(date(2024, 1, 1), i64::MIN).is_err());
    }
}
