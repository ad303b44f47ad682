use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Span {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    /// Touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn shifted_to(&self, start: DateTime<Utc>) -> Span {
        Span::new(start, start + self.duration())
    }
}

// ── Calendar primitives ─────────────────────────────────────────

/// Day of week, Sunday = 0 .. Saturday = 6.
///
/// Directory data stores days either as numbers or as weekday names; both are
/// normalized here on deserialization so nothing downstream compares mixed
/// representations. Human-readable formats write the lowercase name, binary
/// formats (the WAL) write the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DayOfWeek {
    Sunday = 0,
    Monday = 1,
    Tuesday = 2,
    Wednesday = 3,
    Thursday = 4,
    Friday = 5,
    Saturday = 6,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Sunday,
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
    ];

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            DayOfWeek::Sunday => "sunday",
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
        }
    }

    /// Accepts a case-insensitive weekday name or a numeric index.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u8>() {
            return Self::from_index(n);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.name().eq_ignore_ascii_case(s))
    }

    pub fn of(date: NaiveDate) -> Self {
        Self::from(date.weekday())
    }
}

impl From<chrono::Weekday> for DayOfWeek {
    fn from(w: chrono::Weekday) -> Self {
        Self::ALL[w.num_days_from_sunday() as usize]
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for DayOfWeek {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(self.name())
        } else {
            serializer.serialize_u8(self.index())
        }
    }
}

impl<'de> Deserialize<'de> for DayOfWeek {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DayVisitor;

        impl Visitor<'_> for DayVisitor {
            type Value = DayOfWeek;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a weekday name or an index 0 (sunday) to 6 (saturday)")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<DayOfWeek, E> {
                u8::try_from(v)
                    .ok()
                    .and_then(DayOfWeek::from_index)
                    .ok_or_else(|| E::invalid_value(de::Unexpected::Unsigned(v), &self))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<DayOfWeek, E> {
                u8::try_from(v)
                    .ok()
                    .and_then(DayOfWeek::from_index)
                    .ok_or_else(|| E::invalid_value(de::Unexpected::Signed(v), &self))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<DayOfWeek, E> {
                DayOfWeek::parse(v).ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_any(DayVisitor)
        } else {
            deserializer.deserialize_u8(DayVisitor)
        }
    }
}

/// Minutes since local midnight.
pub fn minute_of_day(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

/// `"HH:MM"` wall-clock times. Also accepts `"HH:MM:SS"` on input.
pub(crate) mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
            .ok()
    }

    pub fn serialize<S: Serializer>(t: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&t.format("%H:%M"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {s}")))
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            t: &Option<NaiveTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match t {
                Some(t) => serializer.collect_str(&t.format("%H:%M")),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveTime>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(s) => super::parse(&s)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {s}"))),
                None => Ok(None),
            }
        }
    }
}

// ── Sessions ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl SessionStatus {
    /// Forward edges of the lifecycle. Other moves (e.g. un-cancelling) are
    /// still permitted but are rewinds.
    pub fn is_forward_transition(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Scheduled, InProgress | Cancelled | NoShow)
                | (InProgress, Completed | Cancelled | NoShow)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::NoShow => "no_show",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    #[default]
    Personal,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Variable,
}

/// One weekly slot of a `variable` recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceSlot {
    pub day_of_week: DayOfWeek,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub studio_id: Ulid,
    pub room_id: Ulid,
    pub coach_id: Ulid,
    pub client_id: Option<Ulid>,
    pub ems_device_id: Option<Ulid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub kind: SessionKind,
    pub capacity: u32,
    pub status: SessionStatus,
    pub notes: Option<String>,
    pub is_recurring_parent: bool,
    pub recurrence_pattern: Option<RecurrencePattern>,
    pub recurrence_end_date: Option<NaiveDate>,
    pub recurrence_days: Vec<DayOfWeek>,
    pub parent_session_id: Option<Ulid>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn span(&self) -> Span {
        Span::new(self.start_time, self.end_time)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == SessionStatus::Cancelled
    }

    /// Build a generated occurrence of this session: same resources, a new
    /// window, no recurrence metadata of its own.
    pub fn occurrence(&self, id: Ulid, span: Span) -> Session {
        Session {
            id,
            start_time: span.start,
            end_time: span.end,
            status: SessionStatus::Scheduled,
            is_recurring_parent: false,
            recurrence_pattern: None,
            recurrence_end_date: None,
            recurrence_days: Vec::new(),
            parent_session_id: Some(self.id),
            cancelled_at: None,
            ..self.clone()
        }
    }
}

/// Membership of a client in a group session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParticipant {
    pub tenant_id: Ulid,
    pub session_id: Ulid,
    pub client_id: Ulid,
    pub status: SessionStatus,
    pub client_package_id: Option<Ulid>,
    pub joined_at: DateTime<Utc>,
}

// ── Directory entities (owned elsewhere, read here) ─────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    #[serde(with = "hhmm")]
    pub open: NaiveTime,
    #[serde(with = "hhmm")]
    pub close: NaiveTime,
}

impl DayHours {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Self {
        Self { open, close }
    }

    pub fn contains(&self, start: NaiveTime, end: NaiveTime) -> bool {
        let (open, close) = (minute_of_day(self.open), minute_of_day(self.close));
        let (s, e) = (minute_of_day(start), minute_of_day(end));
        open <= s && s <= close && open <= e && e <= close
    }
}

/// Weekly opening hours. An empty map means no hours are configured (always
/// open); a day that is absent or mapped to `None` is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpeningHours(pub BTreeMap<DayOfWeek, Option<DayHours>>);

impl OpeningHours {
    pub fn is_unrestricted(&self) -> bool {
        self.0.is_empty()
    }

    pub fn for_day(&self, day: DayOfWeek) -> Option<DayHours> {
        self.0.get(&day).copied().flatten()
    }

    pub fn set(mut self, day: DayOfWeek, hours: Option<DayHours>) -> Self {
        self.0.insert(day, hours);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Studio {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub name: String,
    #[serde(default)]
    pub opening_hours: OpeningHours,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub studio_id: Ulid,
    pub name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRule {
    pub day_of_week: DayOfWeek,
    pub available: bool,
    #[serde(default, with = "hhmm::option")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "hhmm::option")]
    pub end_time: Option<NaiveTime>,
}

impl AvailabilityRule {
    pub fn time_range(&self) -> Option<DayHours> {
        match (self.start_time, self.end_time) {
            (Some(open), Some(close)) => Some(DayHours { open, close }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Gender {
    Male,
    Female,
    Other,
    PreferNotToSay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenderPreference {
    Any,
    Male,
    Female,
    Other,
}

impl GenderPreference {
    /// The gender a client must have, or `None` for `Any`.
    pub fn required(self) -> Option<Gender> {
        match self {
            GenderPreference::Any => None,
            GenderPreference::Male => Some(Gender::Male),
            GenderPreference::Female => Some(Gender::Female),
            GenderPreference::Other => Some(Gender::Other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coach {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub name: String,
    pub is_active: bool,
    #[serde(default)]
    pub availability_rules: Vec<AvailabilityRule>,
    #[serde(default)]
    pub preferred_client_gender: Option<GenderPreference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub email: String,
    pub first_name: String,
    #[serde(default)]
    pub gender: Option<Gender>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Active,
    Expired,
    Depleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPackage {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub client_id: Ulid,
    pub sessions_remaining: u32,
    pub sessions_used: u32,
    pub status: PackageStatus,
    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
    pub purchased_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSettings {
    #[serde(default)]
    pub cancellation_window_hours: Option<u32>,
}

// ── Requests ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSession {
    pub studio_id: Ulid,
    pub room_id: Ulid,
    pub coach_id: Ulid,
    #[serde(default)]
    pub client_id: Option<Ulid>,
    #[serde(default)]
    pub ems_device_id: Option<Ulid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub kind: SessionKind,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub recurrence_pattern: Option<RecurrencePattern>,
    #[serde(default)]
    pub recurrence_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub recurrence_days: Vec<DayOfWeek>,
    #[serde(default)]
    pub recurrence_slots: Vec<RecurrenceSlot>,
}

impl CreateSession {
    pub fn new(
        studio_id: Ulid,
        room_id: Ulid,
        coach_id: Ulid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            studio_id,
            room_id,
            coach_id,
            client_id: None,
            ems_device_id: None,
            start_time,
            end_time,
            kind: SessionKind::Personal,
            capacity: None,
            notes: None,
            recurrence_pattern: None,
            recurrence_end_date: None,
            recurrence_days: Vec::new(),
            recurrence_slots: Vec::new(),
        }
    }

    pub fn with_client(mut self, client_id: Ulid) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_device(mut self, device_id: Ulid) -> Self {
        self.ems_device_id = Some(device_id);
        self
    }

    pub fn group(mut self, capacity: u32) -> Self {
        self.kind = SessionKind::Group;
        self.capacity = Some(capacity);
        self
    }

    pub fn recurring(mut self, pattern: RecurrencePattern, end_date: NaiveDate) -> Self {
        self.recurrence_pattern = Some(pattern);
        self.recurrence_end_date = Some(end_date);
        self
    }

    pub fn on_days(mut self, days: impl IntoIterator<Item = DayOfWeek>) -> Self {
        self.recurrence_days = days.into_iter().collect();
        self
    }

    pub fn with_slots(mut self, slots: impl IntoIterator<Item = RecurrenceSlot>) -> Self {
        self.recurrence_slots = slots.into_iter().collect();
        self
    }

    /// Recurring only when both a pattern and an end date are present.
    pub fn is_recurring(&self) -> bool {
        self.recurrence_pattern.is_some() && self.recurrence_end_date.is_some()
    }
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSession {
    #[serde(default)]
    pub studio_id: Option<Ulid>,
    #[serde(default)]
    pub room_id: Option<Ulid>,
    #[serde(default)]
    pub coach_id: Option<Ulid>,
    #[serde(default)]
    pub client_id: Option<Ulid>,
    #[serde(default)]
    pub ems_device_id: Option<Ulid>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

// ── Results ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Room,
    Coach,
    Client,
    Device,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    pub session_id: Ulid,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResult {
    pub has_conflicts: bool,
    pub conflicts: Vec<Conflict>,
}

impl ConflictResult {
    pub fn push(&mut self, conflict: Conflict) {
        self.has_conflicts = true;
        self.conflicts.push(conflict);
    }

    pub fn has(&self, kind: ConflictKind) -> bool {
        self.conflicts.iter().any(|c| c.kind == kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub status: SlotStatus,
}

/// A generated occurrence rejected during a recurrence dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedOccurrence {
    pub span: Span,
    pub conflicts: Vec<Conflict>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrencePreview {
    pub occurrences: Vec<Span>,
    pub conflicts: Vec<RejectedOccurrence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAssignment {
    pub room_id: Ulid,
    pub coach_id: Ulid,
}

/// A committed booking: the session and, for a recurring booking, the
/// occurrences generated with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub session: Session,
    pub occurrences: Vec<Session>,
}

/// Outcome of a status write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub session: Session,
    /// Package a credit was taken from, if any.
    pub deducted_from: Option<Ulid>,
}

/// The event types, flat, one per committed mutation. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleEvent {
    SessionCreated {
        session: Session,
    },
    /// A recurring parent and its generated occurrences, committed together.
    SeriesCreated {
        parent: Session,
        occurrences: Vec<Session>,
    },
    SessionUpdated {
        session: Session,
    },
    StatusChanged {
        tenant_id: Ulid,
        session_id: Ulid,
        status: SessionStatus,
        cancelled_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },
    ParticipantAdded {
        participant: SessionParticipant,
    },
    ParticipantStatusChanged {
        tenant_id: Ulid,
        session_id: Ulid,
        client_id: Ulid,
        status: SessionStatus,
    },
}

impl ScheduleEvent {
    pub fn tenant_id(&self) -> Ulid {
        match self {
            ScheduleEvent::SessionCreated { session }
            | ScheduleEvent::SessionUpdated { session } => session.tenant_id,
            ScheduleEvent::SeriesCreated { parent, .. } => parent.tenant_id,
            ScheduleEvent::ParticipantAdded { participant } => participant.tenant_id,
            ScheduleEvent::StatusChanged { tenant_id, .. }
            | ScheduleEvent::ParticipantStatusChanged { tenant_id, .. } => *tenant_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, h, m, 0).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(at(10, 0), at(11, 0));
        let b = Span::new(at(10, 30), at(11, 30));
        let c = Span::new(at(11, 0), at(12, 0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // back-to-back
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_try_new_rejects_empty() {
        assert!(Span::try_new(at(10, 0), at(10, 0)).is_none());
        assert!(Span::try_new(at(11, 0), at(10, 0)).is_none());
        assert!(Span::try_new(at(10, 0), at(10, 1)).is_some());
    }

    #[test]
    fn day_of_week_parse_accepts_names_and_numbers() {
        assert_eq!(DayOfWeek::parse("Monday"), Some(DayOfWeek::Monday));
        assert_eq!(DayOfWeek::parse("SUNDAY"), Some(DayOfWeek::Sunday));
        assert_eq!(DayOfWeek::parse("6"), Some(DayOfWeek::Saturday));
        assert_eq!(DayOfWeek::parse("7"), None);
        assert_eq!(DayOfWeek::parse("funday"), None);
    }

    #[test]
    fn day_of_week_of_date() {
        // 2026-01-25 is a Sunday, 2026-01-01 a Thursday
        assert_eq!(
            DayOfWeek::of(NaiveDate::from_ymd_opt(2026, 1, 25).unwrap()),
            DayOfWeek::Sunday
        );
        assert_eq!(
            DayOfWeek::of(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()),
            DayOfWeek::Thursday
        );
    }

    #[test]
    fn availability_rule_day_from_number_or_name() {
        let rules: Vec<AvailabilityRule> = serde_json::from_str(
            r#"[
                {"dayOfWeek": 1, "available": true, "startTime": "08:00", "endTime": "12:00"},
                {"dayOfWeek": "Tuesday", "available": false}
            ]"#,
        )
        .unwrap();
        assert_eq!(rules[0].day_of_week, DayOfWeek::Monday);
        assert_eq!(rules[0].time_range(), Some(DayHours::new(t(8, 0), t(12, 0))));
        assert_eq!(rules[1].day_of_week, DayOfWeek::Tuesday);
        assert_eq!(rules[1].time_range(), None);
    }

    #[test]
    fn opening_hours_json_with_null_days() {
        let hours: OpeningHours = serde_json::from_str(
            r#"{"monday": {"open": "07:00", "close": "21:00"}, "sunday": null}"#,
        )
        .unwrap();
        assert!(!hours.is_unrestricted());
        assert_eq!(
            hours.for_day(DayOfWeek::Monday),
            Some(DayHours::new(t(7, 0), t(21, 0)))
        );
        assert_eq!(hours.for_day(DayOfWeek::Sunday), None);
        assert_eq!(hours.for_day(DayOfWeek::Tuesday), None);
    }

    #[test]
    fn day_hours_bounds_are_inclusive() {
        let h = DayHours::new(t(7, 0), t(21, 0));
        assert!(h.contains(t(7, 0), t(21, 0)));
        assert!(!h.contains(t(6, 59), t(8, 0)));
        assert!(!h.contains(t(20, 30), t(21, 1)));
    }

    #[test]
    fn conflict_result_wire_shape() {
        let mut result = ConflictResult::default();
        let sid = Ulid::new();
        result.push(Conflict {
            kind: ConflictKind::Room,
            session_id: sid,
            message: "room taken".into(),
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["hasConflicts"], true);
        assert_eq!(json["conflicts"][0]["type"], "room");
        assert_eq!(json["conflicts"][0]["sessionId"], sid.to_string());
        assert_eq!(json["conflicts"][0]["message"], "room taken");
    }

    #[test]
    fn slot_wire_shape() {
        let slot = Slot {
            time: t(9, 20),
            status: SlotStatus::Full,
        };
        let json = serde_json::to_string(&slot).unwrap();
        assert_eq!(json, r#"{"time":"09:20","status":"full"}"#);
    }

    #[test]
    fn gender_uses_kebab_case() {
        let g: Gender = serde_json::from_str(r#""prefer-not-to-say""#).unwrap();
        assert_eq!(g, Gender::PreferNotToSay);
        assert_eq!(GenderPreference::Any.required(), None);
        assert_eq!(GenderPreference::Female.required(), Some(Gender::Female));
    }

    #[test]
    fn occurrence_is_a_leaf() {
        let parent = Session {
            id: Ulid::new(),
            tenant_id: Ulid::new(),
            studio_id: Ulid::new(),
            room_id: Ulid::new(),
            coach_id: Ulid::new(),
            client_id: Some(Ulid::new()),
            ems_device_id: None,
            start_time: at(10, 0),
            end_time: at(11, 0),
            kind: SessionKind::Personal,
            capacity: 1,
            status: SessionStatus::Scheduled,
            notes: None,
            is_recurring_parent: true,
            recurrence_pattern: Some(RecurrencePattern::Weekly),
            recurrence_end_date: NaiveDate::from_ymd_opt(2026, 3, 1),
            recurrence_days: vec![DayOfWeek::Monday],
            parent_session_id: None,
            cancelled_at: None,
            created_at: at(9, 0),
            updated_at: at(9, 0),
        };
        let next = parent.span().shifted_to(at(12, 0));
        let occ = parent.occurrence(Ulid::new(), next);
        assert_eq!(occ.parent_session_id, Some(parent.id));
        assert!(!occ.is_recurring_parent);
        assert!(occ.recurrence_pattern.is_none());
        assert!(occ.recurrence_end_date.is_none());
        assert!(occ.recurrence_days.is_empty());
        assert_eq!(occ.span(), Span::new(at(12, 0), at(13, 0)));
    }

    #[test]
    fn forward_transitions() {
        use SessionStatus::*;
        assert!(Scheduled.is_forward_transition(InProgress));
        assert!(InProgress.is_forward_transition(Completed));
        assert!(!Cancelled.is_forward_transition(Scheduled));
        assert!(!Scheduled.is_forward_transition(Completed));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = ScheduleEvent::StatusChanged {
            tenant_id: Ulid::new(),
            session_id: Ulid::new(),
            status: SessionStatus::Cancelled,
            cancelled_at: Some(at(8, 0)),
            at: at(8, 0),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: ScheduleEvent = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
