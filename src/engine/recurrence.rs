//! Recurrence expansion: candidate occurrence windows for a recurring parent.
//!
//! Everything here is pure and deterministic. Candidates come back in
//! chronological order; conflict checking and the credit cap are applied by
//! the engine afterwards.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime, Utc,
};

use crate::limits::*;
use crate::model::*;

use super::SchedulingError;

/// What to repeat and until when.
#[derive(Debug, Clone, Copy)]
pub struct RecurrenceSpec<'a> {
    pub pattern: RecurrencePattern,
    pub end_date: NaiveDate,
    pub days: &'a [DayOfWeek],
    pub slots: &'a [RecurrenceSlot],
}

impl<'a> RecurrenceSpec<'a> {
    /// `None` for a non-recurring request.
    pub fn of_request(dto: &'a CreateSession) -> Option<Self> {
        Some(Self {
            pattern: dto.recurrence_pattern?,
            end_date: dto.recurrence_end_date?,
            days: &dto.recurrence_days,
            slots: &dto.recurrence_slots,
        })
    }
}

/// Shift a UTC instant onto the studio-local clock.
pub(super) fn local(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDateTime {
    at.with_timezone(&offset).naive_local()
}

/// Interpret a studio-local wall-clock time as a UTC instant.
pub(super) fn to_utc(naive: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    (naive - Duration::seconds(i64::from(offset.local_minus_utc()))).and_utc()
}

/// Sunday on or before `date`.
fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_sunday()))
}

/// Latest instant an occurrence may start: the end of `end_date` on the local
/// clock, or the package expiry if that comes first.
pub fn ceiling(
    end_date: NaiveDate,
    offset: FixedOffset,
    expiry: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    let day_after = end_date
        .succ_opt()
        .map(|d| to_utc(d.and_time(NaiveTime::MIN), offset) - Duration::nanoseconds(1))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    match expiry {
        Some(exp) if exp < day_after => exp,
        _ => day_after,
    }
}

/// Reject recurrence requests the engine will not expand.
pub fn validate(
    spec: &RecurrenceSpec<'_>,
    parent: &Span,
    offset: FixedOffset,
) -> Result<(), SchedulingError> {
    let start_date = local(parent.start, offset).date();
    if (spec.end_date - start_date).num_days() > MAX_RECURRENCE_HORIZON_DAYS {
        return Err(SchedulingError::LimitExceeded("recurrence horizon too long"));
    }
    if spec.pattern == RecurrencePattern::Variable {
        if spec.slots.is_empty() {
            return Err(SchedulingError::InvalidRecurrence(
                "variable recurrence needs at least one slot",
            ));
        }
        if spec.slots.len() > MAX_VARIABLE_SLOTS {
            return Err(SchedulingError::LimitExceeded("too many recurrence slots"));
        }
    }
    Ok(())
}

/// Candidate windows strictly after `parent.start` and not after `until`,
/// each as long as the parent.
pub fn expand(
    spec: &RecurrenceSpec<'_>,
    parent: &Span,
    until: DateTime<Utc>,
    offset: FixedOffset,
    monthly_limit: u32,
) -> Result<Vec<Span>, SchedulingError> {
    validate(spec, parent, offset)?;
    let starts = match spec.pattern {
        RecurrencePattern::Daily => weekly(parent, &DayOfWeek::ALL, 0, 1, until, offset),
        RecurrencePattern::Weekly => weekly(parent, spec.days, 1, 1, until, offset),
        RecurrencePattern::Biweekly => weekly(parent, spec.days, 2, 2, until, offset),
        RecurrencePattern::Monthly => monthly(parent, monthly_limit, until, offset),
        RecurrencePattern::Variable => variable(parent, spec.slots, until, offset),
    };
    Ok(starts.into_iter().map(|s| parent.shifted_to(s)).collect())
}

/// Walks weeks from the Sunday on or before the parent's date, starting
/// `first_week` weeks in and stepping `every_weeks`.
fn weekly(
    parent: &Span,
    days: &[DayOfWeek],
    first_week: i64,
    every_weeks: i64,
    until: DateTime<Utc>,
    offset: FixedOffset,
) -> Vec<DateTime<Utc>> {
    let first = local(parent.start, offset);
    let mut days: Vec<DayOfWeek> = if days.is_empty() {
        vec![DayOfWeek::of(first.date())]
    } else {
        days.to_vec()
    };
    days.sort();
    days.dedup();

    let last_date = local(until, offset).date();
    let mut week = week_start(first.date()) + Duration::weeks(first_week);
    let mut out = Vec::new();
    while week <= last_date {
        for day in &days {
            let date = week + Duration::days(i64::from(day.index()));
            let at = to_utc(date.and_time(first.time()), offset);
            if at > parent.start && at <= until {
                out.push(at);
            }
        }
        week += Duration::weeks(every_weeks);
    }
    out
}

fn monthly(
    parent: &Span,
    limit: u32,
    until: DateTime<Utc>,
    offset: FixedOffset,
) -> Vec<DateTime<Utc>> {
    let first = local(parent.start, offset);
    let mut out = Vec::new();
    for n in 1..=limit {
        let Some(date) = first.date().checked_add_months(Months::new(n)) else {
            break;
        };
        let at = to_utc(date.and_time(first.time()), offset);
        if at > until {
            break;
        }
        out.push(at);
    }
    out
}

fn variable(
    parent: &Span,
    slots: &[RecurrenceSlot],
    until: DateTime<Utc>,
    offset: FixedOffset,
) -> Vec<DateTime<Utc>> {
    let mut slots = slots.to_vec();
    slots.sort_by_key(|s| (s.day_of_week, s.start_time));
    slots.dedup();

    let last_date = local(until, offset).date();
    let mut week = week_start(local(parent.start, offset).date());
    let mut out = Vec::new();
    while week <= last_date {
        for slot in &slots {
            let date = week + Duration::days(i64::from(slot.day_of_week.index()));
            let at = to_utc(date.and_time(slot.start_time), offset);
            if at > parent.start && at <= until {
                out.push(at);
            }
        }
        week += Duration::weeks(1);
    }
    out
}
