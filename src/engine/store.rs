use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

/// One tenant's sessions and group participants.
///
/// Sessions are kept sorted by start time so overlap scans can stop at the
/// first session starting after the query window.
#[derive(Debug, Default)]
pub struct Schedule {
    sessions: Vec<Session>,
    participants: HashMap<Ulid, Vec<SessionParticipant>>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn get(&self, id: Ulid) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: Ulid) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    fn insert(&mut self, session: Session) {
        let pos = self
            .sessions
            .partition_point(|s| (s.start_time, s.id) < (session.start_time, session.id));
        self.sessions.insert(pos, session);
    }

    fn remove(&mut self, id: Ulid) -> Option<Session> {
        let pos = self.sessions.iter().position(|s| s.id == id)?;
        Some(self.sessions.remove(pos))
    }

    /// Sessions of any status whose span overlaps `query`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Session> {
        let right_bound = self.sessions.partition_point(|s| s.start_time < query.end);
        self.sessions[..right_bound]
            .iter()
            .filter(move |s| s.end_time > query.start)
    }

    /// Non-cancelled sessions overlapping `query`; these hold their resources.
    pub fn occupying(&self, query: &Span) -> impl Iterator<Item = &Session> {
        self.overlapping(query).filter(|s| !s.is_cancelled())
    }

    /// Occurrences generated from `parent_id`, chronological.
    pub fn children(&self, parent_id: Ulid) -> impl Iterator<Item = &Session> {
        self.sessions
            .iter()
            .filter(move |s| s.parent_session_id == Some(parent_id))
    }

    /// Sessions still waiting to consume one of the client's credits.
    pub fn scheduled_count_for_client(&self, client_id: Ulid) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.client_id == Some(client_id) && s.status == SessionStatus::Scheduled)
            .count()
    }

    pub fn participants(&self, session_id: Ulid) -> &[SessionParticipant] {
        self.participants
            .get(&session_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn participant(&self, session_id: Ulid, client_id: Ulid) -> Option<&SessionParticipant> {
        self.participants(session_id)
            .iter()
            .find(|p| p.client_id == client_id)
    }

    /// Participants that take a seat (everyone not cancelled).
    pub fn seated_count(&self, session_id: Ulid) -> usize {
        self.participants(session_id)
            .iter()
            .filter(|p| p.status != SessionStatus::Cancelled)
            .count()
    }

    // ── Event application ────────────────────────────────────

    /// Apply a committed event. The caller holds the tenant's write lock.
    pub fn apply_event(&mut self, event: &ScheduleEvent) {
        match event {
            ScheduleEvent::SessionCreated { session } => self.insert(session.clone()),
            ScheduleEvent::SeriesCreated { parent, occurrences } => {
                self.insert(parent.clone());
                for occ in occurrences {
                    self.insert(occ.clone());
                }
            }
            ScheduleEvent::SessionUpdated { session } => {
                self.remove(session.id);
                self.insert(session.clone());
            }
            ScheduleEvent::StatusChanged {
                session_id,
                status,
                cancelled_at,
                at,
                ..
            } => {
                if let Some(s) = self.get_mut(*session_id) {
                    s.status = *status;
                    s.cancelled_at = *cancelled_at;
                    s.updated_at = *at;
                }
            }
            ScheduleEvent::ParticipantAdded { participant } => {
                self.participants
                    .entry(participant.session_id)
                    .or_default()
                    .push(participant.clone());
            }
            ScheduleEvent::ParticipantStatusChanged {
                session_id,
                client_id,
                status,
                ..
            } => {
                if let Some(p) = self
                    .participants
                    .get_mut(session_id)
                    .and_then(|ps| ps.iter_mut().find(|p| p.client_id == *client_id))
                {
                    p.status = *status;
                }
            }
        }
    }

    /// Minimal events that rebuild this schedule from nothing.
    pub fn snapshot_events(&self) -> Vec<ScheduleEvent> {
        let mut events: Vec<ScheduleEvent> = self
            .sessions
            .iter()
            .map(|s| ScheduleEvent::SessionCreated { session: s.clone() })
            .collect();
        let mut session_ids: Vec<&Ulid> = self.participants.keys().collect();
        session_ids.sort();
        for sid in session_ids {
            for p in &self.participants[sid] {
                events.push(ScheduleEvent::ParticipantAdded {
                    participant: p.clone(),
                });
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn session(start: i64, end: i64) -> Session {
        Session {
            id: Ulid::new(),
            tenant_id: Ulid::nil(),
            studio_id: Ulid::nil(),
            room_id: Ulid::new(),
            coach_id: Ulid::new(),
            client_id: None,
            ems_device_id: None,
            start_time: at(start),
            end_time: at(end),
            kind: SessionKind::Personal,
            capacity: 1,
            status: SessionStatus::Scheduled,
            notes: None,
            is_recurring_parent: false,
            recurrence_pattern: None,
            recurrence_end_date: None,
            recurrence_days: Vec::new(),
            parent_session_id: None,
            cancelled_at: None,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    fn schedule_of(sessions: &[Session]) -> Schedule {
        let mut schedule = Schedule::new();
        for s in sessions {
            schedule.apply_event(&ScheduleEvent::SessionCreated { session: s.clone() });
        }
        schedule
    }

    #[test]
    fn sessions_stay_sorted() {
        let schedule = schedule_of(&[session(5, 6), session(1, 2), session(3, 4)]);
        let starts: Vec<_> = schedule.sessions().iter().map(|s| s.start_time).collect();
        assert_eq!(starts, vec![at(1), at(3), at(5)]);
    }

    #[test]
    fn overlapping_is_half_open() {
        let a = session(9, 10);
        let b = session(10, 11);
        let c = session(12, 13);
        let schedule = schedule_of(&[a.clone(), b.clone(), c]);
        let hits: Vec<_> = schedule
            .overlapping(&Span::new(at(10), at(12)))
            .map(|s| s.id)
            .collect();
        assert_eq!(hits, vec![b.id]);
    }

    #[test]
    fn long_session_found_from_inside() {
        let long = session(0, 20);
        let schedule = schedule_of(&[long.clone(), session(21, 22)]);
        let hits: Vec<_> = schedule.overlapping(&Span::new(at(10), at(11))).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, long.id);
    }

    #[test]
    fn update_resorts_and_status_sticks() {
        let a = session(1, 2);
        let b = session(3, 4);
        let mut schedule = schedule_of(&[a.clone(), b.clone()]);

        let mut moved = a.clone();
        moved.start_time = at(5);
        moved.end_time = at(6);
        schedule.apply_event(&ScheduleEvent::SessionUpdated { session: moved });
        assert_eq!(schedule.sessions()[0].id, b.id);
        assert_eq!(schedule.sessions()[1].id, a.id);

        schedule.apply_event(&ScheduleEvent::StatusChanged {
            tenant_id: Ulid::nil(),
            session_id: b.id,
            status: SessionStatus::Cancelled,
            cancelled_at: Some(at(0)),
            at: at(0),
        });
        assert!(schedule.get(b.id).unwrap().is_cancelled());
        assert_eq!(schedule.occupying(&Span::new(at(3), at(4))).count(), 0);
        assert_eq!(schedule.overlapping(&Span::new(at(3), at(4))).count(), 1);
    }

    #[test]
    fn scheduled_count_ignores_other_statuses() {
        let client = Ulid::new();
        let mut a = session(1, 2);
        let mut b = session(3, 4);
        let mut c = session(5, 6);
        a.client_id = Some(client);
        b.client_id = Some(client);
        c.client_id = Some(client);
        c.status = SessionStatus::Completed;
        b.status = SessionStatus::Scheduled;
        let schedule = schedule_of(&[a, b, c, session(7, 8)]);
        assert_eq!(schedule.scheduled_count_for_client(client), 2);
    }

    #[test]
    fn participants_and_snapshot() {
        let group = session(1, 2);
        let mut schedule = schedule_of(&[group.clone()]);
        let client = Ulid::new();
        schedule.apply_event(&ScheduleEvent::ParticipantAdded {
            participant: SessionParticipant {
                tenant_id: Ulid::nil(),
                session_id: group.id,
                client_id: client,
                status: SessionStatus::Scheduled,
                client_package_id: None,
                joined_at: at(0),
            },
        });
        assert_eq!(schedule.seated_count(group.id), 1);
        schedule.apply_event(&ScheduleEvent::ParticipantStatusChanged {
            tenant_id: Ulid::nil(),
            session_id: group.id,
            client_id: client,
            status: SessionStatus::Cancelled,
        });
        assert_eq!(schedule.seated_count(group.id), 0);

        let mut rebuilt = Schedule::new();
        for e in schedule.snapshot_events() {
            rebuilt.apply_event(&e);
        }
        assert_eq!(rebuilt.sessions(), schedule.sessions());
        assert_eq!(rebuilt.participants(group.id), schedule.participants(group.id));
    }
}
