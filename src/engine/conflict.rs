use std::collections::HashSet;

use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::SchedulingError;
use super::store::Schedule;

/// The resources a prospective session would hold, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub room_id: Ulid,
    pub coach_id: Ulid,
    pub client_id: Option<Ulid>,
    pub ems_device_id: Option<Ulid>,
    pub span: Span,
}

impl Candidate {
    pub fn of_session(s: &Session) -> Self {
        Self {
            room_id: s.room_id,
            coach_id: s.coach_id,
            client_id: s.client_id,
            ems_device_id: s.ems_device_id,
            span: s.span(),
        }
    }

    pub fn with_span(self, span: Span) -> Self {
        Self { span, ..self }
    }
}

pub(crate) fn validate_span(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Span, SchedulingError> {
    let span = Span::try_new(start, end).ok_or(SchedulingError::InvalidTimeRange { start, end })?;
    if span.duration() > chrono::Duration::hours(MAX_SESSION_HOURS) {
        return Err(SchedulingError::LimitExceeded("session too long"));
    }
    Ok(span)
}

/// Collect overlaps of `candidate` against the sessions yielded by
/// `existing`. Cancelled sessions and the `exclude` ids are ignored.
///
/// Each dimension is checked on its own; the earliest overlapping session is
/// reported per dimension, and all dimensions are reported together.
pub fn detect_conflicts<'a>(
    existing: impl IntoIterator<Item = &'a Session>,
    candidate: &Candidate,
    exclude: &[Ulid],
) -> ConflictResult {
    let mut room = None;
    let mut coach = None;
    let mut client = None;
    let mut device = None;

    for s in existing {
        if s.is_cancelled() || exclude.contains(&s.id) || !s.span().overlaps(&candidate.span) {
            continue;
        }
        if room.is_none() && s.room_id == candidate.room_id {
            room = Some(s.id);
        }
        if coach.is_none() && s.coach_id == candidate.coach_id {
            coach = Some(s.id);
        }
        if client.is_none() && candidate.client_id.is_some() && s.client_id == candidate.client_id {
            client = Some(s.id);
        }
        if device.is_none()
            && candidate.ems_device_id.is_some()
            && s.ems_device_id == candidate.ems_device_id
        {
            device = Some(s.id);
        }
    }

    let mut result = ConflictResult::default();
    let found = [
        (ConflictKind::Room, room, "Room is already booked for this time slot"),
        (ConflictKind::Coach, coach, "Coach is already booked for this time slot"),
        (ConflictKind::Client, client, "Client already has a session at this time"),
        (ConflictKind::Device, device, "EMS device is already in use at this time"),
    ];
    for (kind, session_id, message) in found {
        if let Some(session_id) = session_id {
            result.push(Conflict {
                kind,
                session_id,
                message: message.into(),
            });
        }
    }
    result
}

/// Conflicts against the tenant's committed schedule.
pub fn check_against_schedule(
    schedule: &Schedule,
    candidate: &Candidate,
    exclude: &[Ulid],
) -> ConflictResult {
    detect_conflicts(schedule.overlapping(&candidate.span), candidate, exclude)
}

/// Rooms and coaches held by non-cancelled sessions overlapping `span`.
/// Rooms are limited to `studio_id`; coaches are counted tenant-wide since a
/// coach cannot be in two studios at once.
pub fn occupied_resources(
    schedule: &Schedule,
    studio_id: Ulid,
    span: &Span) -> (HashSet<Ulid>, HashSet<Ulid>,
) {
    let mut rooms = HashSet::new();
    let mut coaches = HashSet::new();
    for s in schedule.occupying(span) {
        if s.studio_id == studio_id {
            rooms.insert(s.room_id);
        }
        coaches.insert(s.coach_id);
    }
    (rooms, coaches)
}
