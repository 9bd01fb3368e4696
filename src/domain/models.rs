use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minutes scheduled for a work item that carries no usable estimate.
pub const DEFAULT_ESTIMATED_MINUTES: u32 = 120;

const LOWEST_PRIORITY_RANK: u8 = 2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    /// Sort rank used by the allocator. Urgent and high share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Urgent | Self::High => 0,
            Self::Medium => 1,
            Self::Low => LOWEST_PRIORITY_RANK,
        }
    }
}

pub fn priority_rank(priority: Option<Priority>) -> u8 {
    priority.map(Priority::rank).unwrap_or(LOWEST_PRIORITY_RANK)
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Red,
    Yellow,
    #[default]
    Blue,
    Gray,
}

impl Category {
    pub fn from_priority(priority: Option<Priority>) -> Self {
        match priority {
            Some(Priority::Urgent | Priority::High) => Self::Red,
            Some(Priority::Medium) => Self::Yellow,
            Some(Priority::Low) | None => Self::Blue,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "red" => Some(Self::Red),
            "yellow" => Some(Self::Yellow),
            "blue" => Some(Self::Blue),
            "gray" | "grey" => Some(Self::Gray),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Yellow => "yellow",
            Self::Blue => "blue",
            Self::Gray => "gray",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "todo" => Some(Self::Todo),
            "in_progress" | "in-progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkItem {
    pub id: i64,
    pub title: String,
    pub priority: Option<Priority>,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_minutes: Option<u32>,
    pub subject_id: i64,
}

impl WorkItem {
    /// Estimate used for scheduling; missing or zero estimates fall back to the default.
    pub fn effective_minutes(&self) -> u32 {
        match self.estimated_minutes {
            Some(minutes) if minutes > 0 => minutes,
            _ => DEFAULT_ESTIMATED_MINUTES,
        }
    }
}

/// A calendar entry: either a study session or a break.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeBlock {
    pub id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub task_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub category: Category,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TimeBlock {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "entry.title")?;
        if self.end_time <= self.start_time {
            return Err("entry.end_time must be after entry.start_time".to_string());
        }
        if self.category == Category::Gray && self.task_id.is_some() {
            return Err("break entries must not reference a task".to_string());
        }
        Ok(())
    }

    pub fn is_break(&self) -> bool {
        self.category == Category::Gray && self.task_id.is_none()
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

/// Break lengths and the threshold that makes an intra-item break medium.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct BreakConfig {
    pub short_break_minutes: u32,
    pub medium_break_minutes: u32,
    pub long_break_minutes: u32,
    pub long_break_after_minutes: u32,
}

impl Default for BreakConfig {
    fn default() -> Self {
        Self {
            short_break_minutes: 5,
            medium_break_minutes: 15,
            long_break_minutes: 30,
            long_break_after_minutes: 90,
        }
    }
}

impl BreakConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_range(self.short_break_minutes, 1, 60, "breaks.short_break_minutes")?;
        validate_range(self.medium_break_minutes, 1, 60, "breaks.medium_break_minutes")?;
        validate_range(self.long_break_minutes, 1, 120, "breaks.long_break_minutes")?;
        validate_range(
            self.long_break_after_minutes,
            15,
            480,
            "breaks.long_break_after_minutes",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subject {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
}

impl Subject {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.name, "subject.name")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: i64,
    pub subject_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_minutes: Option<u32>,
    pub actual_minutes: Option<u32>,
    pub status: TaskStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "task.title")?;
        if self.estimated_minutes == Some(0) {
            return Err("task.estimated_minutes must be positive".to_string());
        }
        if self.status == TaskStatus::Done && self.completed_at.is_none() {
            return Err("task.completed_at is required when task.status is done".to_string());
        }
        if self.status != TaskStatus::Done && self.completed_at.is_some() {
            return Err("task.completed_at must be empty unless task.status is done".to_string());
        }
        Ok(())
    }

    pub fn to_work_item(&self) -> WorkItem {
        WorkItem {
            id: self.id,
            title: self.title.clone(),
            priority: self.priority,
            deadline: self.deadline,
            estimated_minutes: self.estimated_minutes,
            subject_id: self.subject_id,
        }
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_range(value: u32, min: u32, max: u32, field_name: &str) -> Result<(), String> {
    if value < min || value > max {
        return Err(format!("{field_name} must be between {min} and {max}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_block() -> TimeBlock {
        TimeBlock {
            id: Some(1),
            title: "Linear algebra".to_string(),
            description: Some("Block 1 of 2".to_string()),
            start_time: fixed_time("2026-02-16T09:00:00Z"),
            end_time: fixed_time("2026-02-16T10:30:00Z"),
            task_id: Some(7),
            subject_id: Some(3),
            category: Category::Red,
            created_at: None,
            updated_at: None,
        }
    }

    fn sample_task() -> Task {
        Task {
            id: 7,
            subject_id: 3,
            title: "Problem set 4".to_string(),
            description: None,
            priority: Some(Priority::High),
            deadline: Some(fixed_time("2026-02-19T12:00:00Z")),
            estimated_minutes: Some(180),
            actual_minutes: None,
            status: TaskStatus::Todo,
            completed_at: None,
            created_at: fixed_time("2026-02-15T08:00:00Z"),
            updated_at: fixed_time("2026-02-15T08:00:00Z"),
        }
    }

    #[test]
    fn priority_rank_groups_urgent_with_high() {
        assert_eq!(Priority::Urgent.rank(), Priority::High.rank());
        assert!(Priority::High.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::Low.rank());
        assert_eq!(priority_rank(None), Priority::Low.rank());
    }

    #[test]
    fn category_follows_priority_and_defaults_to_blue() {
        assert_eq!(Category::from_priority(Some(Priority::Urgent)), Category::Red);
        assert_eq!(Category::from_priority(Some(Priority::High)), Category::Red);
        assert_eq!(Category::from_priority(Some(Priority::Medium)), Category::Yellow);
        assert_eq!(Category::from_priority(Some(Priority::Low)), Category::Blue);
        assert_eq!(Category::from_priority(None), Category::Blue);
    }

    #[test]
    fn parse_accepts_mixed_case() {
        assert_eq!(Priority::parse(" URGENT "), Some(Priority::Urgent));
        assert_eq!(Priority::parse("critical"), None);
        assert_eq!(TaskStatus::parse("in-progress"), Some(TaskStatus::InProgress));
        assert_eq!(Category::parse("grey"), Some(Category::Gray));
    }

    #[test]
    fn block_validate_rejects_empty_or_reversed_range() {
        assert!(sample_block().validate().is_ok());

        let mut block = sample_block();
        block.end_time = block.start_time;
        assert!(block.validate().is_err());
    }

    #[test]
    fn block_validate_rejects_break_with_task_reference() {
        let mut block = sample_block();
        block.category = Category::Gray;
        assert!(block.validate().is_err());
        block.task_id = None;
        assert!(block.validate().is_ok());
        assert!(block.is_break());
    }

    #[test]
    fn task_validate_checks_completion_consistency() {
        let mut task = sample_task();
        assert!(task.validate().is_ok());
        task.status = TaskStatus::Done;
        assert!(task.validate().is_err());
        task.completed_at = Some(fixed_time("2026-02-18T10:00:00Z"));
        assert!(task.validate().is_ok());
        task.estimated_minutes = Some(0);
        assert!(task.validate().is_err());
    }

    #[test]
    fn work_item_falls_back_to_default_estimate() {
        let mut item = sample_task().to_work_item();
        assert_eq!(item.effective_minutes(), 180);
        item.estimated_minutes = Some(0);
        assert_eq!(item.effective_minutes(), DEFAULT_ESTIMATED_MINUTES);
        item.estimated_minutes = None;
        assert_eq!(item.effective_minutes(), DEFAULT_ESTIMATED_MINUTES);
    }

    #[test]
    fn default_break_config_is_valid() {
        assert!(BreakConfig::default().validate().is_ok());
        let config = BreakConfig {
            long_break_after_minutes: 10,
            ..BreakConfig::default()
        };
        assert!(config.validate().is_err());
    }

    // Feature: study-planner, Property 1: break settings inside the accepted ranges validate
    proptest! {
        #[test]
        fn property1_break_ranges_are_accepted(
            short in 1u32..=60u32,
            medium in 1u32..=60u32,
            long in 1u32..=120u32,
            after in 15u32..=480u32
        ) {
            let config = BreakConfig {
                short_break_minutes: short,
                medium_break_minutes: medium,
                long_break_minutes: long,
                long_break_after_minutes: after,
            };
            prop_assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn domain_models_support_serde_roundtrip() {
        let block = sample_block();
        let task = sample_task();
        let breaks = BreakConfig::default();

        let block_roundtrip: TimeBlock =
            serde_json::from_str(&serde_json::to_string(&block).expect("serialize block"))
                .expect("deserialize block");
        let task_roundtrip: Task =
            serde_json::from_str(&serde_json::to_string(&task).expect("serialize task"))
                .expect("deserialize task");
        let breaks_json = serde_json::to_value(breaks).expect("serialize breaks");

        assert_eq!(block_roundtrip, block);
        assert_eq!(task_roundtrip, task);
        assert_eq!(breaks_json["longBreakAfterMinutes"], 90);
        assert_eq!(
            serde_json::to_value(Category::Gray).expect("serialize category"),
            "gray"
        );
    }
}
