/// Recurrence may not extend further than this past the parent's start.
pub const MAX_RECURRENCE_HORIZON_DAYS: i64 = 731;

/// Generated occurrences per series, parent excluded.
pub const MAX_OCCURRENCES_PER_SERIES: usize = 400;

pub const MAX_VARIABLE_SLOTS: usize = 28;

pub const MAX_NOTES_LEN: usize = 2000;

pub const MAX_GROUP_CAPACITY: u32 = 500;

/// Longest single session. Hours checks are same-day only.
pub const MAX_SESSION_HOURS: i64 = 24;
