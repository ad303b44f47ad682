use std::time::Instant;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::availability::{LocalWindow, coach_fits};
use super::conflict::{Candidate, check_against_schedule, occupied_resources, validate_span};
use super::recurrence::{self, RecurrenceSpec};
use super::{Engine, Entity, SchedulingError};

impl Engine {
    /// Dry-run conflict check. Nothing is locked beyond the read.
    pub async fn check_conflicts(
        &self,
        tenant_id: Ulid,
        candidate: &Candidate,
        exclude_session_id: Option<Ulid>,
    ) -> Result<ConflictResult, SchedulingError> {
        validate_span(candidate.span.start, candidate.span.end)?;
        let schedule = self.schedule(tenant_id);
        let guard = schedule.read().await;
        let exclude: Vec<Ulid> = exclude_session_id.into_iter().collect();
        Ok(check_against_schedule(&guard, candidate, &exclude))
    }

    /// Expand a recurring request without committing it: the occurrences a
    /// create would accept, and the rejected ones with their conflicts.
    pub async fn validate_recurrence(
        &self,
        tenant_id: Ulid,
        dto: &CreateSession,
    ) -> Result<RecurrencePreview, SchedulingError> {
        validate_span(dto.start_time, dto.end_time)?;
        let spec = RecurrenceSpec::of_request(dto).ok_or(SchedulingError::InvalidRecurrence(
            "a recurrence pattern and end date are required",
        ))?;
        let package = match dto.client_id {
            Some(client_id) => {
                self.collab
                    .ledger
                    .active_package_for_client(tenant_id, client_id)
                    .await?
            }
            None => None,
        };

        let schedule = self.schedule(tenant_id);
        let guard = schedule.read().await;
        let parent = self.draft_session(tenant_id, dto, 1);
        let expansion = self.expand_series(&guard, &parent, &spec, package.as_ref())?;
        Ok(RecurrencePreview {
            occurrences: expansion.accepted.iter().map(Session::span).collect(),
            conflicts: expansion.rejected,
        })
    }

    /// Pick a free room in `studio_id` and a free coach for the window.
    ///
    /// With `preferred_coach_id` the coach is checked rather than chosen.
    /// Rooms and coaches are tried in directory order.
    pub async fn auto_assign_resources(
        &self,
        tenant_id: Ulid,
        studio_id: Ulid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        preferred_coach_id: Option<Ulid>,
    ) -> Result<ResourceAssignment, SchedulingError> {
        let span = validate_span(start, end)?;
        let (rooms, coaches) = futures::try_join!(
            self.collab.rooms.list_rooms(tenant_id, studio_id),
            self.collab.coaches.list_coaches(tenant_id),
        )?;

        let schedule = self.schedule(tenant_id);
        let guard = schedule.read().await;
        let (busy_rooms, busy_coaches) = occupied_resources(&guard, studio_id, &span);
        drop(guard);

        let room_id = rooms
            .iter()
            .find(|r| r.is_active && !busy_rooms.contains(&r.id))
            .map(|r| r.id)
            .ok_or(SchedulingError::NoRoomsAvailable)?;

        let coach_id = match preferred_coach_id {
            Some(id) => {
                let coach = coaches
                    .iter()
                    .find(|c| c.id == id)
                    .ok_or(SchedulingError::not_found(Entity::Coach, id))?;
                if !coach.is_active {
                    return Err(SchedulingError::InactiveResource {
                        entity: Entity::Coach,
                        id,
                    });
                }
                if busy_coaches.contains(&id) {
                    return Err(SchedulingError::CoachAlreadyBooked(id));
                }
                id
            }
            None => coaches
                .iter()
                .find(|c| c.is_active && !busy_coaches.contains(&c.id))
                .map(|c| c.id)
                .ok_or(SchedulingError::NoCoachesAvailable)?,
        };
        Ok(ResourceAssignment { room_id, coach_id })
    }

    /// Fixed-width slots across the studio's hours on `date` (studio-local),
    /// each `available` when some active room and some fitting coach are free
    /// for the whole slot. Slots that already began today are left out.
    pub async fn get_available_slots(
        &self,
        tenant_id: Ulid,
        studio_id: Ulid,
        date: NaiveDate,
        coach_id: Option<Ulid>,
    ) -> Result<Vec<Slot>, SchedulingError> {
        let started = Instant::now();
        let result = self.slots_inner(tenant_id, studio_id, date, coach_id).await;
        observability::record("get_available_slots", started, &result);
        result
    }

    async fn slots_inner(
        &self,
        tenant_id: Ulid,
        studio_id: Ulid,
        date: NaiveDate,
        coach_id: Option<Ulid>,
    ) -> Result<Vec<Slot>, SchedulingError> {
        let (studio, rooms, coaches) = futures::try_join!(
            self.collab.studios.find_studio(tenant_id, studio_id),
            self.collab.rooms.list_rooms(tenant_id, studio_id),
            self.collab.coaches.list_coaches(tenant_id),
        )?;
        let studio = studio.ok_or(SchedulingError::not_found(Entity::Studio, studio_id))?;
        let coaches: Vec<Coach> = match coach_id {
            Some(id) => {
                let coach = coaches
                    .into_iter()
                    .find(|c| c.id == id)
                    .ok_or(SchedulingError::not_found(Entity::Coach, id))?;
                vec![coach]
            }
            None => coaches,
        };

        let offset = self.config.utc_offset;
        let (open, close) = if studio.opening_hours.is_unrestricted() {
            (NaiveTime::MIN, None)
        } else {
            match studio.opening_hours.for_day(DayOfWeek::of(date)) {
                Some(hours) => (hours.open, Some(hours.close)),
                None => return Ok(Vec::new()),
            }
        };
        let day_start = recurrence::to_utc(date.and_time(NaiveTime::MIN), offset);
        let first = recurrence::to_utc(date.and_time(open), offset);
        let last_end = match close {
            Some(close) => recurrence::to_utc(date.and_time(close), offset),
            None => day_start + Duration::days(1),
        };
        let width = Duration::minutes(i64::from(self.config.slot_minutes.max(1)));

        let now = self.now();
        let today = recurrence::local(now, offset).date();

        let schedule = self.schedule(tenant_id);
        let guard = schedule.read().await;
        let mut slots = Vec::new();
        let mut start = first;
        while start + width <= last_end {
            let span = Span::new(start, start + width);
            start += width;
            if date == today && span.start < now {
                continue;
            }
            let window = LocalWindow::of(&span, offset);
            let (busy_rooms, busy_coaches) = occupied_resources(&guard, studio_id, &span);
            let room_free = rooms.iter().any(|r| r.is_active && !busy_rooms.contains(&r.id));
            let coach_free = coaches
                .iter()
                .any(|c| coach_fits(c, &window) && !busy_coaches.contains(&c.id));
            slots.push(Slot {
                time: window.start,
                status: if room_free && coach_free {
                    SlotStatus::Available
                } else {
                    SlotStatus::Full
                },
            });
        }
        Ok(slots)
    }

    // ── Reads ────────────────────────────────────────────────

    pub async fn get_session(&self, tenant_id: Ulid, id: Ulid) -> Result<Session, SchedulingError> {
        let schedule = self.schedule(tenant_id);
        let guard = schedule.read().await;
        guard
            .get(id)
            .cloned()
            .ok_or(SchedulingError::not_found(Entity::Session, id))
    }

    /// Sessions of any status overlapping `window`, chronological.
    pub async fn list_sessions(&self, tenant_id: Ulid, window: &Span) -> Vec<Session> {
        let schedule = self.schedule(tenant_id);
        let guard = schedule.read().await;
        guard.overlapping(window).cloned().collect()
    }

    /// A recurring parent followed by its generated occurrences.
    pub async fn series(
        &self,
        tenant_id: Ulid,
        parent_id: Ulid,
    ) -> Result<Vec<Session>, SchedulingError> {
        let schedule = self.schedule(tenant_id);
        let guard = schedule.read().await;
        let parent = guard
            .get(parent_id)
            .cloned()
            .ok_or(SchedulingError::not_found(Entity::Session, parent_id))?;
        let mut out = vec![parent];
        out.extend(guard.children(parent_id).cloned());
        Ok(out)
    }

    pub async fn participants(
        &self,
        tenant_id: Ulid,
        session_id: Ulid,
    ) -> Result<Vec<SessionParticipant>, SchedulingError> {
        let schedule = self.schedule(tenant_id);
        let guard = schedule.read().await;
        if guard.get(session_id).is_none() {
            return Err(SchedulingError::not_found(Entity::Session, session_id));
        }
        Ok(guard.participants(session_id).to_vec())
    }
}
