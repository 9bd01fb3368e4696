use crate::domain::interval::{EntryInstant, TimeRange};
use crate::domain::models::{priority_rank, BreakConfig, Category, TimeBlock, WorkItem};
use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use log::debug;
use serde::Serialize;

/// Maximum length of one study block.
pub const BLOCK_MINUTES: u32 = 90;
const DAY_START_HOUR: u32 = 9;
const DAY_END_HOUR: u32 = 18;
const BREAK_TITLE: &str = "Break";

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Allocation {
    pub blocks: Vec<TimeBlock>,
    /// Items left out because their deadline is missing or not after `now`.
    pub skipped: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct BlockAllocator {
    breaks: BreakConfig,
    zone: Tz,
}

struct PlacedItem {
    blocks: Vec<TimeBlock>,
    cursor: DateTime<Utc>,
}

impl BlockAllocator {
    pub fn new(breaks: BreakConfig, zone: Tz) -> Self {
        Self { breaks, zone }
    }

    pub fn allocate(
        &self,
        items: &[WorkItem],
        horizon_end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Allocation {
        let ordered = sort_items(items);
        let last_index = ordered.len().saturating_sub(1);
        let start = self.day_start(now.with_timezone(&self.zone).date_naive());

        let (_, allocation) = ordered.iter().enumerate().fold(
            (start, Allocation::default()),
            |(cursor, mut allocation), (index, item)| {
                let Some(deadline) = item.deadline.filter(|deadline| *deadline > now) else {
                    debug!(
                        "event=allocation_skip item_id={} deadline={:?}",
                        item.id, item.deadline
                    );
                    allocation.skipped.push(item.id);
                    return (cursor, allocation);
                };
                let cutoff = horizon_end.map_or(deadline, |horizon| horizon.min(deadline));

                let placed = self.place_item(item, cursor, cutoff, index < last_index);
                allocation.blocks.extend(placed.blocks);
                (placed.cursor, allocation)
            },
        );

        debug!(
            "event=allocation_done items={} blocks={} skipped={}",
            items.len(),
            allocation.blocks.len(),
            allocation.skipped.len()
        );
        allocation
    }

    fn place_item(
        &self,
        item: &WorkItem,
        mut cursor: DateTime<Utc>,
        cutoff: DateTime<Utc>,
        has_successor: bool,
    ) -> PlacedItem {
        let total_minutes = item.effective_minutes();
        let block_count = total_minutes.div_ceil(BLOCK_MINUTES);
        let mut scheduled_minutes = 0u32;
        let mut blocks = Vec::new();

        for block_index in 0..block_count {
            let block_minutes = BLOCK_MINUTES.min(total_minutes - scheduled_minutes);
            let nominal_end = cursor + Duration::minutes(i64::from(block_minutes));
            let Some(study) =
                TimeRange::new(cursor, nominal_end).and_then(|range| range.clip_end(cutoff))
            else {
                break;
            };

            blocks.push(study_block(item, study, block_index + 1, block_count));
            scheduled_minutes += block_minutes;

            let break_minutes =
                self.break_minutes(block_minutes, block_index + 1 == block_count, has_successor);
            let break_end = study.end + Duration::minutes(i64::from(break_minutes));
            let rest = TimeRange::new(study.end, break_end).and_then(|range| range.clip_end(cutoff));
            cursor = match rest {
                Some(rest) => {
                    blocks.push(break_block(rest, break_minutes));
                    break_end
                }
                None => study.end,
            };
            cursor = self.roll_over(cursor);
        }

        PlacedItem { blocks, cursor }
    }

    fn break_minutes(&self, block_minutes: u32, is_last_block: bool, has_successor: bool) -> u32 {
        if !is_last_block {
            if block_minutes >= self.breaks.long_break_after_minutes {
                self.breaks.medium_break_minutes
            } else {
                self.breaks.short_break_minutes
            }
        } else if has_successor {
            self.breaks.long_break_minutes
        } else {
            0
        }
    }

    /// Moves a cursor at or past the end of the working day to the next morning.
    fn roll_over(&self, cursor: DateTime<Utc>) -> DateTime<Utc> {
        let local = cursor.with_timezone(&self.zone);
        if local.hour() < DAY_END_HOUR {
            return cursor;
        }
        local
            .date_naive()
            .checked_add_days(Days::new(1))
            .map_or(cursor, |next_day| self.day_start(next_day))
    }

    fn day_start(&self, date: NaiveDate) -> DateTime<Utc> {
        let start = NaiveTime::from_hms_opt(DAY_START_HOUR, 0, 0).expect("valid fixed time");
        EntryInstant::Naive(date.and_time(start)).to_utc(&self.zone)
    }
}

pub fn allocate(
    items: &[WorkItem],
    horizon_end: Option<DateTime<Utc>>,
    breaks: &BreakConfig,
    now: DateTime<Utc>,
    zone: Tz,
) -> Allocation {
    BlockAllocator::new(*breaks, zone).allocate(items, horizon_end, now)
}

fn sort_items(items: &[WorkItem]) -> Vec<&WorkItem> {
    let mut ordered = items.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|item| {
        (
            item.deadline.unwrap_or(DateTime::<Utc>::MAX_UTC),
            priority_rank(item.priority),
        )
    });
    ordered
}

fn study_block(item: &WorkItem, range: TimeRange, number: u32, total: u32) -> TimeBlock {
    TimeBlock {
        id: None,
        title: item.title.clone(),
        description: Some(format!("Block {number} of {total}")),
        start_time: range.start,
        end_time: range.end,
        task_id: Some(item.id),
        subject_id: Some(item.subject_id),
        category: Category::from_priority(item.priority),
        created_at: None,
        updated_at: None,
    }
}

fn break_block(range: TimeRange, minutes: u32) -> TimeBlock {
    TimeBlock {
        id: None,
        title: BREAK_TITLE.to_string(),
        description: Some(format!("{minutes}-minute break")),
        start_time: range.start,
        end_time: range.end,
        task_id: None,
        subject_id: None,
        category: Category::Gray,
        created_at: None,
        updated_at: None,
    }
}
