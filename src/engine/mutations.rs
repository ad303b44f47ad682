use std::time::Instant;

use chrono::Duration;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::ledger::LedgerError;
use crate::limits::*;
use crate::model::*;
use crate::notify::Notice;
use crate::observability;

use super::availability::{check_coach_rules, check_gender, check_studio_hours};
use super::conflict::{Candidate, check_against_schedule, detect_conflicts, validate_span};
use super::recurrence::{self, RecurrenceSpec};
use super::store::Schedule;
use super::{Engine, Entity, SchedulingError};

/// Resources of a booking that the directory checks look at.
pub(super) struct BookingTarget {
    pub studio_id: Ulid,
    pub room_id: Ulid,
    pub coach_id: Ulid,
    pub client_id: Option<Ulid>,
    pub span: Span,
}

/// Generated occurrences that survived conflict checking, plus the rejects.
pub(super) struct Expansion {
    pub accepted: Vec<Session>,
    pub rejected: Vec<RejectedOccurrence>,
}

fn check_notes(notes: Option<&str>) -> Result<(), SchedulingError> {
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(SchedulingError::LimitExceeded("notes too long"));
    }
    Ok(())
}

fn capacity_for(kind: SessionKind, requested: Option<u32>) -> Result<u32, SchedulingError> {
    match kind {
        SessionKind::Personal => Ok(1),
        SessionKind::Group => {
            let capacity = requested.unwrap_or(1);
            if capacity == 0 || capacity > MAX_GROUP_CAPACITY {
                return Err(SchedulingError::LimitExceeded("group capacity out of range"));
            }
            Ok(capacity)
        }
    }
}

impl Engine {
    // ── Shared validation steps ──────────────────────────────

    pub(super) async fn check_room(
        &self,
        tenant_id: Ulid,
        room_id: Ulid,
    ) -> Result<Room, SchedulingError> {
        let room = self
            .collab
            .rooms
            .find_room(tenant_id, room_id)
            .await?
            .ok_or(SchedulingError::not_found(Entity::Room, room_id))?;
        if !room.is_active {
            return Err(SchedulingError::InactiveResource {
                entity: Entity::Room,
                id: room_id,
            });
        }
        Ok(room)
    }

    pub(super) async fn check_hours_and_coach(
        &self,
        tenant_id: Ulid,
        studio_id: Ulid,
        coach_id: Ulid,
        span: &Span,
    ) -> Result<Coach, SchedulingError> {
        let window = self.local_window(span);
        let studio = self
            .collab
            .studios
            .find_studio(tenant_id, studio_id)
            .await?
            .ok_or(SchedulingError::not_found(Entity::Studio, studio_id))?;
        check_studio_hours(&studio.opening_hours, &window)?;

        let coach = self
            .collab
            .coaches
            .find_coach(tenant_id, coach_id)
            .await?
            .ok_or(SchedulingError::not_found(Entity::Coach, coach_id))?;
        if !coach.is_active {
            return Err(SchedulingError::InactiveResource {
                entity: Entity::Coach,
                id: coach_id,
            });
        }
        check_coach_rules(&coach, &window)?;
        Ok(coach)
    }

    pub(super) async fn check_client_gender(
        &self,
        tenant_id: Ulid,
        coach: &Coach,
        client_id: Ulid,
    ) -> Result<Client, SchedulingError> {
        let client = self
            .collab
            .clients
            .find_client(tenant_id, client_id)
            .await?
            .ok_or(SchedulingError::not_found(Entity::Client, client_id))?;
        check_gender(coach, client_id, client.gender)?;
        Ok(client)
    }

    /// Room, studio hours, coach rules and gender preference, in that order.
    pub(super) async fn validate_target(
        &self,
        tenant_id: Ulid,
        target: &BookingTarget,
    ) -> Result<(), SchedulingError> {
        self.check_room(tenant_id, target.room_id).await?;
        let coach = self
            .check_hours_and_coach(tenant_id, target.studio_id, target.coach_id, &target.span)
            .await?;
        if let Some(client_id) = target.client_id {
            self.check_client_gender(tenant_id, &coach, client_id).await?;
        }
        Ok(())
    }

    /// The client's active package, provided it still covers one more
    /// session beyond those already scheduled.
    pub(super) async fn check_credit(
        &self,
        tenant_id: Ulid,
        client_id: Ulid,
        schedule: &Schedule,
    ) -> Result<ClientPackage, SchedulingError> {
        let package = self
            .collab
            .ledger
            .active_package_for_client(tenant_id, client_id)
            .await?
            .ok_or(SchedulingError::NoActivePackage(client_id))?;
        let scheduled = schedule.scheduled_count_for_client(client_id);
        if package.sessions_remaining as usize <= scheduled {
            return Err(SchedulingError::NoAvailableCredit(client_id));
        }
        Ok(package)
    }

    /// Generate, conflict-check and cap the occurrences of a recurring
    /// parent. Each candidate is checked against the committed schedule, the
    /// parent and the occurrences already accepted.
    pub(super) fn expand_series(
        &self,
        schedule: &Schedule,
        parent: &Session,
        spec: &RecurrenceSpec<'_>,
        package: Option<&ClientPackage>,
    ) -> Result<Expansion, SchedulingError> {
        let until = recurrence::ceiling(
            spec.end_date,
            self.config.utc_offset,
            package.and_then(|p| p.expiry_date),
        );
        let candidates = recurrence::expand(
            spec,
            &parent.span(),
            until,
            self.config.utc_offset,
            self.config.monthly_occurrence_limit,
        )?;
        // one credit stays reserved for the parent
        let cap = package
            .map(|p| p.sessions_remaining.saturating_sub(1) as usize)
            .map_or(MAX_OCCURRENCES_PER_SERIES, |c| c.min(MAX_OCCURRENCES_PER_SERIES));

        let template = Candidate::of_session(parent);
        let mut accepted: Vec<Session> = Vec::new();
        let mut rejected = Vec::new();
        for span in candidates {
            if accepted.len() >= cap {
                break;
            }
            let candidate = template.with_span(span);
            let conflicts = detect_conflicts(
                schedule
                    .overlapping(&span)
                    .chain(std::iter::once(parent))
                    .chain(accepted.iter()),
                &candidate,
                &[],
            );
            if conflicts.has_conflicts {
                rejected.push(RejectedOccurrence {
                    span,
                    conflicts: conflicts.conflicts,
                });
                continue;
            }
            accepted.push(parent.occurrence(Ulid::new(), span));
        }
        Ok(Expansion { accepted, rejected })
    }

    /// The session a create request would commit, with a fresh id.
    pub(super) fn draft_session(
        &self,
        tenant_id: Ulid,
        dto: &CreateSession,
        capacity: u32,
    ) -> Session {
        let now = self.now();
        let recurring = dto.is_recurring();
        Session {
            id: Ulid::new(),
            tenant_id,
            studio_id: dto.studio_id,
            room_id: dto.room_id,
            coach_id: dto.coach_id,
            client_id: dto.client_id,
            ems_device_id: dto.ems_device_id,
            start_time: dto.start_time,
            end_time: dto.end_time,
            kind: dto.kind,
            capacity,
            status: SessionStatus::Scheduled,
            notes: dto.notes.clone(),
            is_recurring_parent: recurring,
            recurrence_pattern: dto.recurrence_pattern.filter(|_| recurring),
            recurrence_end_date: dto.recurrence_end_date.filter(|_| recurring),
            recurrence_days: if recurring { dto.recurrence_days.clone() } else { Vec::new() },
            parent_session_id: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    // ── Create ───────────────────────────────────────────────

    /// Validate and commit a booking. A recurring request also commits every
    /// generated occurrence that does not conflict, in the same WAL record.
    pub async fn create_session(
        &self,
        tenant_id: Ulid,
        dto: CreateSession,
    ) -> Result<Booking, SchedulingError> {
        let started = Instant::now();
        let result = self.create_inner(tenant_id, dto).await;
        observability::record("create_session", started, &result);
        result
    }

    async fn create_inner(
        &self,
        tenant_id: Ulid,
        dto: CreateSession,
    ) -> Result<Booking, SchedulingError> {
        let span = validate_span(dto.start_time, dto.end_time)?;
        check_notes(dto.notes.as_deref())?;
        let capacity = capacity_for(dto.kind, dto.capacity)?;
        let spec = RecurrenceSpec::of_request(&dto);

        let schedule = self.schedule(tenant_id);
        let mut guard = schedule.write().await;

        self.validate_target(
            tenant_id,
            &BookingTarget {
                studio_id: dto.studio_id,
                room_id: dto.room_id,
                coach_id: dto.coach_id,
                client_id: dto.client_id,
                span,
            },
        )
        .await?;
        let package = match dto.client_id {
            Some(client_id) => Some(self.check_credit(tenant_id, client_id, &guard).await?),
            None => None,
        };

        let candidate = Candidate {
            room_id: dto.room_id,
            coach_id: dto.coach_id,
            client_id: dto.client_id,
            ems_device_id: dto.ems_device_id,
            span,
        };
        let conflicts = check_against_schedule(&guard, &candidate, &[]);
        if conflicts.has_conflicts {
            return Err(SchedulingError::SchedulingConflict(conflicts));
        }

        let session = self.draft_session(tenant_id, &dto, capacity);
        let (event, occurrences) = match &spec {
            None => (ScheduleEvent::SessionCreated { session: session.clone() }, Vec::new()),
            Some(spec) => {
                let expansion = self.expand_series(&guard, &session, spec, package.as_ref())?;
                for r in &expansion.rejected {
                    warn!(
                        parent = %session.id,
                        start = %r.span.start,
                        conflicts = r.conflicts.len(),
                        "skipping conflicting occurrence"
                    );
                }
                metrics::counter!(observability::RECURRENCE_SKIPPED_TOTAL)
                    .increment(expansion.rejected.len() as u64);
                metrics::counter!(observability::RECURRENCE_CREATED_TOTAL)
                    .increment(expansion.accepted.len() as u64);
                (
                    ScheduleEvent::SeriesCreated {
                        parent: session.clone(),
                        occurrences: expansion.accepted.clone(),
                    },
                    expansion.accepted,
                )
            }
        };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);

        metrics::counter!(observability::SESSIONS_BOOKED_TOTAL)
            .increment(1 + occurrences.len() as u64);
        info!(
            tenant = %tenant_id,
            session = %session.id,
            occurrences = occurrences.len(),
            "session booked"
        );

        if let Some(client_id) = session.client_id {
            self.publish(Notice::SessionBooked {
                tenant_id,
                session_id: session.id,
                client_id,
                occurrences: std::iter::once(session.span())
                    .chain(occurrences.iter().map(Session::span))
                    .collect(),
            });
        }
        Ok(Booking { session, occurrences })
    }

    // ── Update ───────────────────────────────────────────────

    /// Apply a partial update, re-running only the checks the changed fields
    /// can affect. The session's own booking never conflicts with itself.
    pub async fn update_session(
        &self,
        tenant_id: Ulid,
        id: Ulid,
        patch: UpdateSession,
    ) -> Result<Session, SchedulingError> {
        let started = Instant::now();
        let result = self.update_inner(tenant_id, id, patch).await;
        observability::record("update_session", started, &result);
        result
    }

    async fn update_inner(
        &self,
        tenant_id: Ulid,
        id: Ulid,
        patch: UpdateSession,
    ) -> Result<Session, SchedulingError> {
        let schedule = self.schedule(tenant_id);
        let mut guard = schedule.write().await;
        let existing = guard
            .get(id)
            .cloned()
            .ok_or(SchedulingError::not_found(Entity::Session, id))?;

        let mut merged = existing.clone();
        merged.studio_id = patch.studio_id.unwrap_or(existing.studio_id);
        merged.room_id = patch.room_id.unwrap_or(existing.room_id);
        merged.coach_id = patch.coach_id.unwrap_or(existing.coach_id);
        merged.client_id = patch.client_id.or(existing.client_id);
        merged.ems_device_id = patch.ems_device_id.or(existing.ems_device_id);
        merged.start_time = patch.start_time.unwrap_or(existing.start_time);
        merged.end_time = patch.end_time.unwrap_or(existing.end_time);
        if let Some(notes) = patch.notes {
            merged.notes = Some(notes);
        }
        if patch.capacity.is_some() {
            merged.capacity = capacity_for(merged.kind, patch.capacity)?;
            if (merged.capacity as usize) < guard.seated_count(id) {
                return Err(SchedulingError::LimitExceeded("capacity below current participants"));
            }
        }
        check_notes(merged.notes.as_deref())?;
        let span = validate_span(merged.start_time, merged.end_time)?;

        let time_changed =
            merged.start_time != existing.start_time || merged.end_time != existing.end_time;
        let room_changed = merged.room_id != existing.room_id;
        let studio_changed = merged.studio_id != existing.studio_id;
        let coach_changed = merged.coach_id != existing.coach_id;
        let client_changed = merged.client_id != existing.client_id;
        let device_changed = merged.ems_device_id != existing.ems_device_id;

        if room_changed {
            self.check_room(tenant_id, merged.room_id).await?;
        }
        if time_changed || studio_changed || coach_changed {
            let coach = self
                .check_hours_and_coach(tenant_id, merged.studio_id, merged.coach_id, &span)
                .await?;
            if let Some(client_id) = merged.client_id {
                self.check_client_gender(tenant_id, &coach, client_id).await?;
            }
        } else if client_changed && let Some(client_id) = merged.client_id {
            let coach = self
                .collab
                .coaches
                .find_coach(tenant_id, merged.coach_id)
                .await?
                .ok_or(SchedulingError::not_found(Entity::Coach, merged.coach_id))?;
            self.check_client_gender(tenant_id, &coach, client_id).await?;
        }
        if time_changed || room_changed || coach_changed || client_changed || device_changed {
            let conflicts = check_against_schedule(&guard, &Candidate::of_session(&merged), &[id]);
            if conflicts.has_conflicts {
                return Err(SchedulingError::SchedulingConflict(conflicts));
            }
        }

        merged.updated_at = self.now();
        let event = ScheduleEvent::SessionUpdated { session: merged.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(tenant = %tenant_id, session = %id, "session updated");
        Ok(merged)
    }

    // ── Status & credit ──────────────────────────────────────

    /// Move a session to `status` and settle its credit.
    ///
    /// `completed` and `no_show` always take a credit. `cancelled` takes one
    /// when `deduct_override` says so, or, without an override, when the
    /// cancellation falls inside the tenant's cancellation window. Writing
    /// the status a session already has is a no-op.
    pub async fn update_status(
        &self,
        tenant_id: Ulid,
        id: Ulid,
        status: SessionStatus,
        deduct_override: Option<bool>,
    ) -> Result<StatusUpdate, SchedulingError> {
        let started = Instant::now();
        let result = self.update_status_inner(tenant_id, id, status, deduct_override).await;
        observability::record("update_status", started, &result);
        result
    }

    /// Shorthand for `update_status(.., Cancelled, ..)`.
    pub async fn cancel_session(
        &self,
        tenant_id: Ulid,
        id: Ulid,
        deduct_override: Option<bool>,
    ) -> Result<StatusUpdate, SchedulingError> {
        self.update_status(tenant_id, id, SessionStatus::Cancelled, deduct_override)
            .await
    }

    async fn update_status_inner(
        &self,
        tenant_id: Ulid,
        id: Ulid,
        status: SessionStatus,
        deduct_override: Option<bool>,
    ) -> Result<StatusUpdate, SchedulingError> {
        let schedule = self.schedule(tenant_id);
        let mut guard = schedule.write().await;
        let session = guard
            .get(id)
            .cloned()
            .ok_or(SchedulingError::not_found(Entity::Session, id))?;
        if session.status == status {
            return Ok(StatusUpdate {
                session,
                deducted_from: None,
            });
        }
        if !session.status.is_forward_transition(status) {
            debug!(
                session = %id,
                from = session.status.as_str(),
                to = status.as_str(),
                "status rewind"
            );
        }

        let now = self.now();
        let deduct = match status {
            SessionStatus::Completed | SessionStatus::NoShow => true,
            SessionStatus::Cancelled => match deduct_override {
                Some(deduct) => deduct,
                None => {
                    let settings = self.collab.settings.settings(tenant_id).await?;
                    let window_hours = settings
                        .cancellation_window_hours
                        .unwrap_or(self.config.default_cancellation_window_hours);
                    session.start_time - now < Duration::hours(i64::from(window_hours))
                }
            },
            SessionStatus::Scheduled | SessionStatus::InProgress => false,
        };

        let event = ScheduleEvent::StatusChanged {
            tenant_id,
            session_id: id,
            status,
            cancelled_at: (status == SessionStatus::Cancelled).then_some(now),
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard.get(id).cloned().unwrap_or(session);
        drop(guard);

        let deducted_from = match (deduct, updated.client_id) {
            (true, Some(client_id)) => self.deduct_credit(tenant_id, client_id, id).await,
            _ => None,
        };
        if status == SessionStatus::Cancelled
            && let Some(client_id) = updated.client_id
        {
            self.publish(Notice::SessionCancelled {
                tenant_id,
                session_id: id,
                client_id,
                start: updated.start_time,
            });
        }
        info!(tenant = %tenant_id, session = %id, status = status.as_str(), "status changed");
        Ok(StatusUpdate {
            session: updated,
            deducted_from,
        })
    }

    /// Take one credit from the client's current active package. A missing
    /// package or a ledger failure is logged and does not fail the caller.
    async fn deduct_credit(
        &self,
        tenant_id: Ulid,
        client_id: Ulid,
        session_id: Ulid,
    ) -> Option<Ulid> {
        let lookup = self
            .collab
            .ledger
            .active_package_for_client(tenant_id, client_id)
            .await;
        let package = match lookup {
            Ok(Some(p)) => p,
            Ok(None) => {
                warn!(
                    client = %client_id,
                    session = %session_id,
                    "no active package, credit not deducted"
                );
                return None;
            }
            Err(e) => {
                warn!(client = %client_id, session = %session_id, "credit not deducted: {e}");
                return None;
            }
        };
        match self.collab.ledger.use_session(tenant_id, package.id).await {
            Ok(after) => {
                metrics::counter!(observability::CREDITS_DEDUCTED_TOTAL).increment(1);
                debug!(
                    package = %package.id,
                    remaining = after.sessions_remaining,
                    "credit deducted for session {session_id}"
                );
                Some(package.id)
            }
            Err(e) => {
                warn!(package = %package.id, session = %session_id, "credit not deducted: {e}");
                None
            }
        }
    }

    // ── Group participants ───────────────────────────────────

    /// Seat a client in a group session, paying with their best package.
    pub async fn add_participant(
        &self,
        tenant_id: Ulid,
        session_id: Ulid,
        client_id: Ulid,
    ) -> Result<SessionParticipant, SchedulingError> {
        let started = Instant::now();
        let result = self.add_participant_inner(tenant_id, session_id, client_id).await;
        observability::record("add_participant", started, &result);
        result
    }

    async fn add_participant_inner(
        &self,
        tenant_id: Ulid,
        session_id: Ulid,
        client_id: Ulid,
    ) -> Result<SessionParticipant, SchedulingError> {
        let schedule = self.schedule(tenant_id);
        let mut guard = schedule.write().await;
        let session = guard
            .get(session_id)
            .cloned()
            .ok_or(SchedulingError::not_found(Entity::Session, session_id))?;
        if session.kind != SessionKind::Group {
            return Err(SchedulingError::NotGroupSession(session_id));
        }
        if guard.participant(session_id, client_id).is_some() {
            return Err(SchedulingError::AlreadyParticipant { session_id, client_id });
        }
        if guard.seated_count(session_id) >= session.capacity as usize {
            return Err(SchedulingError::SessionFull(session_id));
        }
        let coach = self
            .collab
            .coaches
            .find_coach(tenant_id, session.coach_id)
            .await?
            .ok_or(SchedulingError::not_found(Entity::Coach, session.coach_id))?;
        self.check_client_gender(tenant_id, &coach, client_id).await?;

        let package = self
            .collab
            .ledger
            .best_package_for_session(tenant_id, client_id, session.start_time)
            .await?
            .ok_or(SchedulingError::NoActivePackage(client_id))?;
        self.collab.ledger.use_session(tenant_id, package.id).await?;
        metrics::counter!(observability::CREDITS_DEDUCTED_TOTAL).increment(1);

        let participant = SessionParticipant {
            tenant_id,
            session_id,
            client_id,
            status: SessionStatus::Scheduled,
            client_package_id: Some(package.id),
            joined_at: self.now(),
        };
        let event = ScheduleEvent::ParticipantAdded {
            participant: participant.clone(),
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            self.refund(tenant_id, package.id).await;
            return Err(e);
        }
        info!(tenant = %tenant_id, session = %session_id, client = %client_id, "participant added");
        Ok(participant)
    }

    /// Change one participant's status. Entering `cancelled` refunds the
    /// participant's package; leaving it charges the package again.
    pub async fn update_participant_status(
        &self,
        tenant_id: Ulid,
        session_id: Ulid,
        client_id: Ulid,
        status: SessionStatus,
    ) -> Result<SessionParticipant, SchedulingError> {
        let started = Instant::now();
        let result = self
            .update_participant_inner(tenant_id, session_id, client_id, status)
            .await;
        observability::record("update_participant_status", started, &result);
        result
    }

    async fn update_participant_inner(
        &self,
        tenant_id: Ulid,
        session_id: Ulid,
        client_id: Ulid,
        status: SessionStatus,
    ) -> Result<SessionParticipant, SchedulingError> {
        let schedule = self.schedule(tenant_id);
        let mut guard = schedule.write().await;
        let session = guard
            .get(session_id)
            .cloned()
            .ok_or(SchedulingError::not_found(Entity::Session, session_id))?;
        let current = guard
            .participant(session_id, client_id)
            .cloned()
            .ok_or(SchedulingError::not_found(Entity::Client, client_id))?;
        if current.status == status {
            return Ok(current);
        }

        let cancelling = status == SessionStatus::Cancelled;
        let reinstating = current.status == SessionStatus::Cancelled;
        if reinstating {
            if guard.seated_count(session_id) >= session.capacity as usize {
                return Err(SchedulingError::SessionFull(session_id));
            }
            if let Some(package_id) = current.client_package_id {
                self.collab.ledger.use_session(tenant_id, package_id).await?;
                metrics::counter!(observability::CREDITS_DEDUCTED_TOTAL).increment(1);
            }
        }

        let event = ScheduleEvent::ParticipantStatusChanged {
            tenant_id,
            session_id,
            client_id,
            status,
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            if reinstating && let Some(package_id) = current.client_package_id {
                self.refund(tenant_id, package_id).await;
            }
            return Err(e);
        }
        if cancelling && let Some(package_id) = current.client_package_id {
            self.refund(tenant_id, package_id).await;
        }
        Ok(SessionParticipant { status, ..current })
    }

    async fn refund(&self, tenant_id: Ulid, package_id: Ulid) {
        match self.collab.ledger.return_session(tenant_id, package_id).await {
            Ok(after) => {
                metrics::counter!(observability::CREDITS_REFUNDED_TOTAL).increment(1);
                debug!(
                    package = %package_id,
                    remaining = after.sessions_remaining,
                    "credit returned"
                );
            }
            Err(LedgerError::NotFound(_)) => {
                warn!(package = %package_id, "credit not returned: package no longer exists");
            }
            Err(e) => warn!(package = %package_id, "credit not returned: {e}"),
        }
    }
}
