use chrono::{DateTime, Utc};
use thiserror::Error;
use ulid::Ulid;

use crate::directory::DirectoryError;
use crate::ledger::LedgerError;
use crate::model::{ConflictResult, DayOfWeek};

/// Entity kinds for [`SchedulingError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Session,
    Studio,
    Room,
    Coach,
    Client,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Entity::Session => "session",
            Entity::Studio => "studio",
            Entity::Room => "room",
            Entity::Coach => "coach",
            Entity::Client => "client",
        })
    }
}

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: Ulid },
    #[error("{entity} {id} is inactive")]
    InactiveResource { entity: Entity, id: Ulid },
    #[error("studio is closed on {0}")]
    ClosedDay(DayOfWeek),
    #[error("session falls outside studio hours on {0}")]
    OutsideHours(DayOfWeek),
    #[error("coach {coach_id} is not available on {day}")]
    CoachUnavailable { coach_id: Ulid, day: DayOfWeek },
    #[error("session falls outside coach {coach_id}'s hours on {day}")]
    OutsideCoachHours { coach_id: Ulid, day: DayOfWeek },
    #[error("coach {coach_id} does not accept this client's gender")]
    GenderMismatch { coach_id: Ulid, client_id: Ulid },
    #[error("client {0} has no active package")]
    NoActivePackage(Ulid),
    #[error("client {0} has no available session credit")]
    NoAvailableCredit(Ulid),
    #[error("scheduling conflict: {} overlap(s)", .0.conflicts.len())]
    SchedulingConflict(ConflictResult),
    #[error("no rooms available")]
    NoRoomsAvailable,
    #[error("no coaches available")]
    NoCoachesAvailable,
    #[error("coach {0} is already booked")]
    CoachAlreadyBooked(Ulid),
    #[error("invalid time range: {start} .. {end}")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("invalid recurrence: {0}")]
    InvalidRecurrence(&'static str),
    #[error("session {0} is not a group session")]
    NotGroupSession(Ulid),
    #[error("session {0} is full")]
    SessionFull(Ulid),
    #[error("client {client_id} already joined session {session_id}")]
    AlreadyParticipant { session_id: Ulid, client_id: Ulid },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("WAL error: {0}")]
    Wal(String),
}

impl SchedulingError {
    pub(crate) fn not_found(entity: Entity, id: Ulid) -> Self {
        SchedulingError::NotFound { entity, id }
    }

    /// Short label for the `reason` metric dimension.
    pub fn label(&self) -> &'static str {
        match self {
            SchedulingError::NotFound { .. } => "not_found",
            SchedulingError::InactiveResource { .. } => "inactive_resource",
            SchedulingError::ClosedDay(_) => "closed_day",
            SchedulingError::OutsideHours(_) => "outside_hours",
            SchedulingError::CoachUnavailable { .. } => "coach_unavailable",
            SchedulingError::OutsideCoachHours { .. } => "outside_coach_hours",
            SchedulingError::GenderMismatch { .. } => "gender_mismatch",
            SchedulingError::NoActivePackage(_) => "no_active_package",
            SchedulingError::NoAvailableCredit(_) => "no_available_credit",
            SchedulingError::SchedulingConflict(_) => "conflict",
            SchedulingError::NoRoomsAvailable => "no_rooms",
            SchedulingError::NoCoachesAvailable => "no_coaches",
            SchedulingError::CoachAlreadyBooked(_) => "coach_booked",
            SchedulingError::InvalidTimeRange { .. } => "invalid_time_range",
            SchedulingError::InvalidRecurrence(_) => "invalid_recurrence",
            SchedulingError::NotGroupSession(_) => "not_group",
            SchedulingError::SessionFull(_) => "session_full",
            SchedulingError::AlreadyParticipant { .. } => "already_participant",
            SchedulingError::LimitExceeded(_) => "limit",
            SchedulingError::Directory(_) => "directory",
            SchedulingError::Ledger(_) => "ledger",
            SchedulingError::Wal(_) => "wal",
        }
    }
}
