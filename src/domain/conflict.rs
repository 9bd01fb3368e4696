use crate::domain::interval::{overlaps, EntryInstant};
use crate::domain::models::{Task, TimeBlock};
use chrono::DateTime;
use chrono_tz::Tz;

pub trait CalendarEntry {
    fn entry_id(&self) -> Option<i64>;

    /// `None` when the entry occupies no time and can never conflict.
    fn entry_interval(&self) -> Option<(EntryInstant, EntryInstant)>;
}

impl CalendarEntry for TimeBlock {
    fn entry_id(&self) -> Option<i64> {
        self.id
    }

    fn entry_interval(&self) -> Option<(EntryInstant, EntryInstant)> {
        Some((self.start_time.into(), self.end_time.into()))
    }
}

/// A task occupies `[deadline, deadline + estimate)`; without a deadline or an
/// estimate it occupies nothing.
impl CalendarEntry for Task {
    fn entry_id(&self) -> Option<i64> {
        Some(self.id)
    }

    fn entry_interval(&self) -> Option<(EntryInstant, EntryInstant)> {
        let start = EntryInstant::from(self.deadline?);
        let minutes = self.estimated_minutes.filter(|minutes| *minutes > 0)?;
        Some((start, start.plus_minutes(i64::from(minutes))))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateInterval {
    pub start: EntryInstant,
    pub end: EntryInstant,
}

impl CandidateInterval {
    pub fn new(start: impl Into<EntryInstant>, end: impl Into<EntryInstant>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn starting_at(start: impl Into<EntryInstant>, minutes: u32) -> Self {
        let start = start.into();
        Self {
            start,
            end: start.plus_minutes(i64::from(minutes)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConflictDetector {
    zone: Tz,
}

impl ConflictDetector {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }

    /// Returns the first existing entry overlapping `candidate`, skipping `exclude_id`.
    pub fn find_conflict<'a, E, I>(
        &self,
        candidate: &CandidateInterval,
        existing: I,
        exclude_id: Option<i64>,
    ) -> Option<&'a E>
    where
        E: CalendarEntry + 'a,
        I: IntoIterator<Item = &'a E>,
    {
        let start = candidate.start.normalize(&self.zone);
        let end = candidate.end.normalize(&self.zone);

        existing
            .into_iter()
            .filter(|entry| exclude_id.is_none_or(|excluded| entry.entry_id() != Some(excluded)))
            .find(|entry| {
                self.normalized_interval(*entry)
                    .is_some_and(|(entry_start, entry_end)| {
                        overlaps(&start, &end, &entry_start, &entry_end)
                    })
            })
    }

    fn normalized_interval<E: CalendarEntry>(&self, entry: &E) -> Option<(DateTime<Tz>, DateTime<Tz>)> {
        let (start, end) = entry.entry_interval()?;
        Some((start.normalize(&self.zone), end.normalize(&self.zone)))
    }
}

pub fn find_conflict<'a, E, I>(
    candidate: &CandidateInterval,
    existing: I,
    exclude_id: Option<i64>,
    zone: Tz,
) -> Option<&'a E>
where
    E: CalendarEntry + 'a,
    I: IntoIterator<Item = &'a E>,
{
    ConflictDetector::new(zone).find_conflict(candidate, existing, exclude_id)
}
