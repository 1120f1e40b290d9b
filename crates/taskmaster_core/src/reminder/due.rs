//! Due-today and cooldown evaluation for a single task.
//!
//! Due dates are compared at calendar-day granularity in the offset of the
//! `now` value passed in; any time-of-day component is discarded.

use crate::model::Task;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::macros::format_description;
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Where a task stands with respect to reminder dispatch at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderState {
    Completed,
    NoDueDate,
    InvalidDueDate,
    NotDue,
    CoolingDown { last_sent: OffsetDateTime },
    Eligible,
}

impl ReminderState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::NoDueDate => "no due date",
            Self::InvalidDueDate => "invalid due date",
            Self::NotDue => "not due",
            Self::CoolingDown { .. } => "cooling down",
            Self::Eligible => "eligible",
        }
    }

    pub fn is_due_today(&self) -> bool {
        matches!(self, Self::CoolingDown { .. } | Self::Eligible)
    }
}

pub fn evaluate(task: &Task, now: OffsetDateTime, cooldown: Duration) -> ReminderState {
    if task.is_completed() {
        return ReminderState::Completed;
    }

    if task.due_date.trim().is_empty() {
        return ReminderState::NoDueDate;
    }

    let due = match parse_due_date(&task.due_date, now.offset()) {
        Some(date) => date,
        None => return ReminderState::InvalidDueDate,
    };

    if due != now.date() {
        return ReminderState::NotDue;
    }

    match cooling_down_since(task.last_reminder_sent.as_deref(), now, cooldown) {
        Some(last_sent) => ReminderState::CoolingDown { last_sent },
        None => ReminderState::Eligible,
    }
}

/// Returns the last dispatch time when it falls inside the cooldown window.
///
/// A ledger value that does not parse is treated as absent.
pub fn cooling_down_since(
    last_reminder_sent: Option<&str>,
    now: OffsetDateTime,
    cooldown: Duration,
) -> Option<OffsetDateTime> {
    let last_sent = OffsetDateTime::parse(last_reminder_sent?.trim(), &Rfc3339).ok()?;
    (now - last_sent < cooldown).then_some(last_sent)
}

/// Resolve a stored due date to a calendar day in `offset`.
pub fn parse_due_date(raw: &str, offset: UtcOffset) -> Option<Date> {
    let trimmed = raw.trim();

    if is_strict_date(trimmed) {
        return strict_date(trimmed);
    }

    if let Ok(instant) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Some(instant.to_offset(offset).date());
    }
    if let Ok(instant) = OffsetDateTime::parse(trimmed, &Rfc2822) {
        return Some(instant.to_offset(offset).date());
    }

    parse_local_datetime(trimmed)
        .map(|local| local.date())
        .or_else(|| parse_local_date(trimmed))
}

fn is_strict_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(index, byte)| match index {
            4 | 7 => *byte == b'-',
            _ => byte.is_ascii_digit(),
        })
}

fn strict_date(value: &str) -> Option<Date> {
    let year = value[0..4].parse::<i32>().ok()?;
    let month = value[5..7].parse::<u8>().ok()?;
    let day = value[8..10].parse::<u8>().ok()?;
    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

fn parse_local_datetime(value: &str) -> Option<PrimitiveDateTime> {
    let formats = [
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]"),
    ];
    formats
        .iter()
        .find_map(|format| PrimitiveDateTime::parse(value, *format).ok())
}

fn parse_local_date(value: &str) -> Option<Date> {
    let formats = [
        format_description!("[year]/[month padding:none]/[day padding:none]"),
        format_description!("[month padding:none]/[day padding:none]/[year]"),
        format_description!(
            "[month repr:long case_sensitive:false] [day padding:none], [year]"
        ),
        format_description!(
            "[month repr:short case_sensitive:false] [day padding:none], [year]"
        ),
    ];
    formats
        .iter()
        .find_map(|format| Date::parse(value, *format).ok())
}
