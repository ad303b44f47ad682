//! Pure availability checks: studio opening hours, coach availability rules
//! and the coach's client-gender preference. No I/O; the engine loads the
//! entities and converts the window to the studio-local clock first.

use chrono::{DateTime, FixedOffset};
use ulid::Ulid;

use crate::model::*;

use super::SchedulingError;

/// A session window on the studio-local clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalWindow {
    pub day: DayOfWeek,
    pub start: chrono::NaiveTime,
    pub end: chrono::NaiveTime,
}

impl LocalWindow {
    /// Day and times are taken from the window's start and end independently;
    /// a window crossing local midnight is compared by clock minutes only.
    pub fn of(span: &Span, offset: FixedOffset) -> Self {
        let start: DateTime<FixedOffset> = span.start.with_timezone(&offset);
        let end: DateTime<FixedOffset> = span.end.with_timezone(&offset);
        Self {
            day: DayOfWeek::of(start.date_naive()),
            start: start.time(),
            end: end.time(),
        }
    }
}

pub fn check_studio_hours(
    hours: &OpeningHours,
    window: &LocalWindow,
) -> Result<(), SchedulingError> {
    if hours.is_unrestricted() {
        return Ok(());
    }
    let day = hours
        .for_day(window.day)
        .ok_or(SchedulingError::ClosedDay(window.day))?;
    if !day.contains(window.start, window.end) {
        return Err(SchedulingError::OutsideHours(window.day));
    }
    Ok(())
}

/// First rule for the window's weekday decides. No rules at all means the
/// coach is always available.
pub fn check_coach_rules(coach: &Coach, window: &LocalWindow) -> Result<(), SchedulingError> {
    if coach.availability_rules.is_empty() {
        return Ok(());
    }
    let unavailable = SchedulingError::CoachUnavailable {
        coach_id: coach.id,
        day: window.day,
    };
    let rule = coach
        .availability_rules
        .iter()
        .find(|r| r.day_of_week == window.day)
        .ok_or(unavailable)?;
    if !rule.available {
        return Err(SchedulingError::CoachUnavailable {
            coach_id: coach.id,
            day: window.day,
        });
    }
    if let Some(range) = rule.time_range()
        && !range.contains(window.start, window.end)
    {
        return Err(SchedulingError::OutsideCoachHours {
            coach_id: coach.id,
            day: window.day,
        });
    }
    Ok(())
}

/// A missing client gender passes; `prefer-not-to-say` cannot satisfy a
/// specific preference and fails.
pub fn check_gender(
    coach: &Coach,
    client_id: Ulid,
    gender: Option<Gender>,
) -> Result<(), SchedulingError> {
    let Some(required) = coach.preferred_client_gender.and_then(GenderPreference::required) else {
        return Ok(());
    };
    match gender {
        None => Ok(()),
        Some(g) if g == required => Ok(()),
        Some(_) => Err(SchedulingError::GenderMismatch {
            coach_id: coach.id,
            client_id,
        }),
    }
}

/// Coach passes every availability rule for the window. Used by slot search,
/// where a failing rule just means "this coach cannot take the slot".
pub fn coach_fits(coach: &Coach, window: &LocalWindow) -> bool {
    coach.is_active && check_coach_rules(coach, window).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone, Utc};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(day: DayOfWeek, start: NaiveTime, end: NaiveTime) -> LocalWindow {
        LocalWindow { day, start, end }
    }

    fn weekday_hours() -> OpeningHours {
        let weekday = Some(DayHours::new(t(7, 0), t(21, 0)));
        OpeningHours::default()
            .set(DayOfWeek::Monday, weekday)
            .set(DayOfWeek::Tuesday, weekday)
            .set(DayOfWeek::Wednesday, weekday)
            .set(DayOfWeek::Thursday, weekday)
            .set(DayOfWeek::Friday, weekday)
            .set(DayOfWeek::Saturday, Some(DayHours::new(t(9, 0), t(17, 0))))
            .set(DayOfWeek::Sunday, None)
    }

    fn coach(rules: Vec<AvailabilityRule>, pref: Option<GenderPreference>) -> Coach {
        Coach {
            id: Ulid::new(),
            tenant_id: Ulid::new(),
            name: "Coach".into(),
            is_active: true,
            availability_rules: rules,
            preferred_client_gender: pref,
        }
    }

    fn rule(
        day: DayOfWeek,
        available: bool,
        range: Option<(NaiveTime, NaiveTime)>,
    ) -> AvailabilityRule {
        AvailabilityRule {
            day_of_week: day,
            available,
            start_time: range.map(|r| r.0),
            end_time: range.map(|r| r.1),
        }
    }

    #[test]
    fn local_window_uses_offset() {
        // 2026-01-25 23:30 UTC is already Monday at UTC+1
        let span = Span::new(
            Utc.with_ymd_and_hms(2026, 1, 25, 23, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 26, 0, 30, 0).unwrap(),
        );
        let w = LocalWindow::of(&span, FixedOffset::east_opt(3600).unwrap());
        assert_eq!(w.day, DayOfWeek::Monday);
        assert_eq!(w.start, t(0, 30));
        assert_eq!(w.end, t(1, 30));
    }

    #[test]
    fn empty_hours_allow_anything() {
        let hours = OpeningHours::default();
        assert!(check_studio_hours(&hours, &window(DayOfWeek::Sunday, t(3, 0), t(4, 0))).is_ok());
    }

    #[test]
    fn null_day_is_closed() {
        let sunday = window(DayOfWeek::Sunday, t(10, 0), t(11, 0));
        let err = check_studio_hours(&weekday_hours(), &sunday).unwrap_err();
        assert!(matches!(err, SchedulingError::ClosedDay(DayOfWeek::Sunday)));
    }

    #[test]
    fn absent_day_is_closed() {
        let hours =
            OpeningHours::default().set(DayOfWeek::Monday, Some(DayHours::new(t(7, 0), t(21, 0))));
        assert!(matches!(
            check_studio_hours(&hours, &window(DayOfWeek::Tuesday, t(10, 0), t(11, 0))),
            Err(SchedulingError::ClosedDay(DayOfWeek::Tuesday))
        ));
    }

    #[test]
    fn outside_hours_rejected_boundaries_accepted() {
        let hours = weekday_hours();
        let saturday = window(DayOfWeek::Saturday, t(9, 0), t(17, 0));
        assert!(check_studio_hours(&hours, &saturday).is_ok());
        assert!(matches!(
            check_studio_hours(&hours, &window(DayOfWeek::Saturday, t(16, 30), t(17, 30))),
            Err(SchedulingError::OutsideHours(DayOfWeek::Saturday))
        ));
        assert!(matches!(
            check_studio_hours(&hours, &window(DayOfWeek::Monday, t(6, 30), t(7, 30))),
            Err(SchedulingError::OutsideHours(DayOfWeek::Monday))
        ));
    }

    #[test]
    fn coach_without_rules_is_always_available() {
        let c = coach(vec![], None);
        for day in DayOfWeek::ALL {
            assert!(check_coach_rules(&c, &window(day, t(0, 0), t(23, 0))).is_ok());
        }
    }

    #[test]
    fn coach_rules() {
        let c = coach(
            vec![
                rule(DayOfWeek::Monday, true, Some((t(8, 0), t(12, 0)))),
                rule(DayOfWeek::Tuesday, false, None),
                rule(DayOfWeek::Wednesday, true, None),
            ],
            None,
        );
        assert!(check_coach_rules(&c, &window(DayOfWeek::Monday, t(8, 0), t(9, 0))).is_ok());
        assert!(matches!(
            check_coach_rules(&c, &window(DayOfWeek::Monday, t(11, 30), t(12, 30))),
            Err(SchedulingError::OutsideCoachHours { .. })
        ));
        assert!(matches!(
            check_coach_rules(&c, &window(DayOfWeek::Tuesday, t(9, 0), t(10, 0))),
            Err(SchedulingError::CoachUnavailable { .. })
        ));
        // no rule for the day at all
        assert!(matches!(
            check_coach_rules(&c, &window(DayOfWeek::Friday, t(9, 0), t(10, 0))),
            Err(SchedulingError::CoachUnavailable { .. })
        ));
        // available rule without a time range: whole day
        assert!(check_coach_rules(&c, &window(DayOfWeek::Wednesday, t(5, 0), t(23, 0))).is_ok());
    }

    #[test]
    fn gender_preference() {
        let client = Ulid::new();
        let any = coach(vec![], Some(GenderPreference::Any));
        let none = coach(vec![], None);
        let female = coach(vec![], Some(GenderPreference::Female));

        assert!(check_gender(&any, client, Some(Gender::Male)).is_ok());
        assert!(check_gender(&none, client, Some(Gender::PreferNotToSay)).is_ok());
        assert!(check_gender(&female, client, Some(Gender::Female)).is_ok());
        assert!(matches!(
            check_gender(&female, client, Some(Gender::Male)),
            Err(SchedulingError::GenderMismatch { .. })
        ));
    }

    #[test]
    fn missing_gender_passes_but_prefer_not_to_say_fails() {
        let client = Ulid::new();
        let male = coach(vec![], Some(GenderPreference::Male));
        assert!(check_gender(&male, client, None).is_ok());
        assert!(matches!(
            check_gender(&male, client, Some(Gender::PreferNotToSay)),
            Err(SchedulingError::GenderMismatch { .. })
        ));
    }

    #[test]
    fn inactive_coach_never_fits() {
        let mut c = coach(vec![], None);
        assert!(coach_fits(&c, &window(DayOfWeek::Monday, t(9, 0), t(10, 0))));
        c.is_active = false;
        assert!(!coach_fits(&c, &window(DayOfWeek::Monday, t(9, 0), t(10, 0))));
    }
}
