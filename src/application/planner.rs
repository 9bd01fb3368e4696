use crate::domain::allocator::BlockAllocator;
use crate::domain::conflict::{CalendarEntry, CandidateInterval, ConflictDetector};
use crate::domain::interval::EntryInstant;
use crate::domain::models::{
    BreakConfig, Category, Priority, Subject, Task, TaskStatus, TimeBlock,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::schedule_repository::{EntryWindow, ScheduleRepository};
use crate::infrastructure::storage::{accept_any, stored_precision};
use crate::infrastructure::task_repository::{NewTask, TaskRepository};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub entries: Vec<TimeBlock>,
    pub skipped_task_ids: Vec<i64>,
    pub study_blocks: usize,
    pub break_blocks: usize,
}

/// A manually created calendar entry. Offset-less times are read in the planner's zone.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub title: String,
    pub description: Option<String>,
    pub start: EntryInstant,
    pub end: EntryInstant,
    pub task_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub category: Option<Category>,
}

#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start: Option<EntryInstant>,
    pub end: Option<EntryInstant>,
    pub task_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub category: Option<Category>,
}

#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub subject_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub subject_id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_minutes: Option<u32>,
    pub status: Option<TaskStatus>,
}

pub struct PlannerService<T, S>
where
    T: TaskRepository,
    S: ScheduleRepository,
{
    task_repository: Arc<T>,
    schedule_repository: Arc<S>,
    zone: Tz,
    now_provider: NowProvider,
}

impl<T, S> PlannerService<T, S>
where
    T: TaskRepository,
    S: ScheduleRepository,
{
    pub fn new(task_repository: Arc<T>, schedule_repository: Arc<S>) -> Self {
        Self {
            task_repository,
            schedule_repository,
            zone: Tz::UTC,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_zone(mut self, zone: Tz) -> Self {
        self.zone = zone;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    /// Replaces every committed entry of the user with a freshly allocated schedule.
    pub fn regenerate_schedule(
        &self,
        user_id: i64,
        horizon_end: Option<DateTime<Utc>>,
        breaks: &BreakConfig,
    ) -> Result<ScheduleSummary, InfraError> {
        breaks.validate().map_err(InfraError::InvalidInput)?;

        let tasks = self.task_repository.list_tasks(user_id, None)?;
        if tasks.is_empty() {
            return Err(InfraError::InvalidInput(
                "no tasks found to schedule".to_string(),
            ));
        }
        let items = tasks
            .iter()
            .filter(|task| task.status != TaskStatus::Done)
            .map(Task::to_work_item)
            .collect::<Vec<_>>();

        let now = self.now();
        let allocation = BlockAllocator::new(*breaks, self.zone).allocate(&items, horizon_end, now);
        let entries = self
            .schedule_repository
            .replace_all(user_id, &allocation.blocks, now)?;

        let break_blocks = entries.iter().filter(|entry| entry.is_break()).count();
        info!(
            "event=schedule_regenerated user_id={} tasks={} entries={} breaks={} skipped={}",
            user_id,
            items.len(),
            entries.len(),
            break_blocks,
            allocation.skipped.len()
        );
        Ok(ScheduleSummary {
            study_blocks: entries.len() - break_blocks,
            break_blocks,
            skipped_task_ids: allocation.skipped,
            entries,
        })
    }

    pub fn create_entry(&self, user_id: i64, draft: EntryDraft) -> Result<TimeBlock, InfraError> {
        let category = match draft.category {
            Some(category) => category,
            None => self.default_category(user_id, draft.task_id)?,
        };
        let entry = TimeBlock {
            id: None,
            title: draft.title.trim().to_string(),
            description: normalize_optional_text(draft.description),
            start_time: stored_precision(draft.start.to_utc(&self.zone)),
            end_time: stored_precision(draft.end.to_utc(&self.zone)),
            task_id: draft.task_id,
            subject_id: draft.subject_id,
            category,
            created_at: None,
            updated_at: None,
        };
        entry.validate().map_err(InfraError::InvalidInput)?;
        self.ensure_references(user_id, entry.subject_id, entry.task_id)?;

        let candidate = CandidateInterval::new(entry.start_time, entry.end_time);
        let created = self.schedule_repository.insert_entry(
            user_id,
            &entry,
            self.now(),
            &|existing| self.reject_entry_conflict(user_id, &candidate, existing, None),
        )?;
        info!(
            "event=entry_created user_id={} entry_id={:?}",
            user_id, created.id
        );
        Ok(created)
    }

    pub fn update_entry(
        &self,
        user_id: i64,
        entry_id: i64,
        patch: EntryPatch,
    ) -> Result<TimeBlock, InfraError> {
        let current = self.get_entry(user_id, entry_id)?;
        let start = patch
            .start
            .map_or(current.start_time, |start| stored_precision(start.to_utc(&self.zone)));
        let end = patch
            .end
            .map_or(current.end_time, |end| stored_precision(end.to_utc(&self.zone)));
        let updated = TimeBlock {
            title: patch
                .title
                .map(|title| title.trim().to_string())
                .unwrap_or(current.title.clone()),
            description: match patch.description {
                Some(description) => normalize_optional_text(Some(description)),
                None => current.description.clone(),
            },
            start_time: start,
            end_time: end,
            task_id: patch.task_id.or(current.task_id),
            subject_id: patch.subject_id.or(current.subject_id),
            category: patch.category.unwrap_or(current.category),
            ..current
        };
        updated.validate().map_err(InfraError::InvalidInput)?;
        self.ensure_references(user_id, patch.subject_id, patch.task_id)?;

        let candidate = CandidateInterval::new(start, end);
        let saved = self.schedule_repository.save_entry(
            user_id,
            &updated,
            self.now(),
            &|existing| self.reject_entry_conflict(user_id, &candidate, existing, Some(entry_id)),
        )?;
        info!("event=entry_updated user_id={user_id} entry_id={entry_id}");
        Ok(saved)
    }

    pub fn get_entry(&self, user_id: i64, entry_id: i64) -> Result<TimeBlock, InfraError> {
        self.schedule_repository
            .get_entry(user_id, entry_id)?
            .ok_or_else(|| InfraError::NotFound(format!("schedule entry {entry_id}")))
    }

    pub fn list_entries(&self, user_id: i64, window: EntryWindow) -> Result<Vec<TimeBlock>, InfraError> {
        self.schedule_repository.list_entries(user_id, window)
    }

    pub fn delete_entry(&self, user_id: i64, entry_id: i64) -> Result<(), InfraError> {
        if !self.schedule_repository.delete_entry(user_id, entry_id)? {
            return Err(InfraError::NotFound(format!("schedule entry {entry_id}")));
        }
        info!("event=entry_deleted user_id={user_id} entry_id={entry_id}");
        Ok(())
    }

    pub fn create_subject(
        &self,
        user_id: i64,
        name: &str,
        description: Option<String>,
    ) -> Result<Subject, InfraError> {
        let name = name.trim();
        let description = normalize_optional_text(description);
        let pending = Subject {
            id: 0,
            user_id,
            name: name.to_string(),
            description: description.clone(),
        };
        pending.validate().map_err(InfraError::InvalidInput)?;
        let subject = self
            .task_repository
            .create_subject(user_id, name, description.as_deref())?;
        info!(
            "event=subject_created user_id={} subject_id={}",
            user_id, subject.id
        );
        Ok(subject)
    }

    pub fn get_subject(&self, user_id: i64, subject_id: i64) -> Result<Subject, InfraError> {
        self.task_repository
            .get_subject(user_id, subject_id)?
            .ok_or_else(|| InfraError::NotFound(format!("subject {subject_id}")))
    }

    pub fn list_subjects(&self, user_id: i64) -> Result<Vec<Subject>, InfraError> {
        self.task_repository.list_subjects(user_id)
    }

    pub fn update_subject(
        &self,
        user_id: i64,
        subject_id: i64,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Subject, InfraError> {
        let current = self.get_subject(user_id, subject_id)?;
        let updated = Subject {
            name: name
                .map(|name| name.trim().to_string())
                .unwrap_or(current.name),
            description: match description {
                Some(description) => normalize_optional_text(Some(description)),
                None => current.description,
            },
            ..current
        };
        updated.validate().map_err(InfraError::InvalidInput)?;
        if !self.task_repository.save_subject(&updated)? {
            return Err(InfraError::NotFound(format!("subject {subject_id}")));
        }
        Ok(updated)
    }

    pub fn delete_subject(&self, user_id: i64, subject_id: i64) -> Result<(), InfraError> {
        if !self.task_repository.delete_subject(user_id, subject_id)? {
            return Err(InfraError::NotFound(format!("subject {subject_id}")));
        }
        info!("event=subject_deleted user_id={user_id} subject_id={subject_id}");
        Ok(())
    }

    pub fn create_task(&self, user_id: i64, draft: TaskDraft) -> Result<Task, InfraError> {
        self.get_subject(user_id, draft.subject_id)?;
        let new_task = NewTask {
            subject_id: draft.subject_id,
            title: draft.title.trim().to_string(),
            description: normalize_optional_text(draft.description),
            priority: draft.priority,
            deadline: draft.deadline,
            estimated_minutes: draft.estimated_minutes,
        };
        let now = self.now();
        let pending = Task {
            id: 0,
            subject_id: new_task.subject_id,
            title: new_task.title.clone(),
            description: None,
            priority: new_task.priority,
            deadline: new_task.deadline,
            estimated_minutes: new_task.estimated_minutes,
            actual_minutes: None,
            status: TaskStatus::Todo,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        pending.validate().map_err(InfraError::InvalidInput)?;

        let task = self.task_repository.insert_task(
            user_id,
            &new_task,
            now,
            &|existing| self.reject_task_conflict(user_id, &pending, existing),
        )?;
        info!("event=task_created user_id={} task_id={}", user_id, task.id);
        Ok(task)
    }

    pub fn get_task(&self, user_id: i64, task_id: i64) -> Result<Task, InfraError> {
        self.task_repository
            .get_task(user_id, task_id)?
            .ok_or_else(|| InfraError::NotFound(format!("task {task_id}")))
    }

    pub fn list_tasks(&self, user_id: i64, status: Option<TaskStatus>) -> Result<Vec<Task>, InfraError> {
        self.task_repository.list_tasks(user_id, status)
    }

    pub fn update_task(&self, user_id: i64, task_id: i64, patch: TaskPatch) -> Result<Task, InfraError> {
        if let Some(subject_id) = patch.subject_id {
            self.get_subject(user_id, subject_id)?;
        }

        let current = self.get_task(user_id, task_id)?;
        let now = self.now();
        let status = patch.status.unwrap_or(current.status);
        let completed_at = match (current.status, status) {
            (TaskStatus::Done, TaskStatus::Done) => current.completed_at,
            (_, TaskStatus::Done) => Some(now),
            _ => None,
        };
        let reschedules = patch.deadline.is_some() || patch.estimated_minutes.is_some();
        let updated = Task {
            subject_id: patch.subject_id.unwrap_or(current.subject_id),
            title: patch
                .title
                .map(|title| title.trim().to_string())
                .unwrap_or(current.title.clone()),
            description: match patch.description {
                Some(description) => normalize_optional_text(Some(description)),
                None => current.description.clone(),
            },
            priority: patch.priority.or(current.priority),
            deadline: patch.deadline.or(current.deadline),
            estimated_minutes: patch.estimated_minutes.or(current.estimated_minutes),
            status,
            completed_at,
            ..current
        };
        updated.validate().map_err(InfraError::InvalidInput)?;

        let saved = if reschedules {
            self.task_repository.save_task(user_id, &updated, now, &|existing| {
                self.reject_task_conflict(user_id, &updated, existing)
            })?
        } else {
            self.task_repository
                .save_task(user_id, &updated, now, &accept_any::<Task>)?
        };
        info!(
            "event=task_updated user_id={} task_id={} status={}",
            user_id,
            task_id,
            saved.status.as_str()
        );
        Ok(saved)
    }

    pub fn complete_task(
        &self,
        user_id: i64,
        task_id: i64,
        actual_minutes: Option<u32>,
    ) -> Result<Task, InfraError> {
        let current = self.get_task(user_id, task_id)?;
        let now = self.now();
        let completed = Task {
            status: TaskStatus::Done,
            actual_minutes: actual_minutes.or(current.actual_minutes),
            completed_at: Some(now),
            ..current
        };
        let saved = self
            .task_repository
            .save_task(user_id, &completed, now, &accept_any::<Task>)?;
        info!("event=task_completed user_id={user_id} task_id={task_id}");
        Ok(saved)
    }

    pub fn delete_task(&self, user_id: i64, task_id: i64) -> Result<(), InfraError> {
        if !self.task_repository.delete_task(user_id, task_id)? {
            return Err(InfraError::NotFound(format!("task {task_id}")));
        }
        info!("event=task_deleted user_id={user_id} task_id={task_id}");
        Ok(())
    }

    /// `title,priority,deadline,status` lines for every task of the user.
    pub fn export_tasks_csv(&self, user_id: i64) -> Result<String, InfraError> {
        let tasks = self.task_repository.list_tasks(user_id, None)?;
        let mut csv = String::from("title,priority,deadline,status\n");
        for task in tasks {
            csv.push_str(&format!(
                "{},{},{},{}\n",
                csv_field(&task.title),
                task.priority.map(Priority::as_str).unwrap_or_default(),
                task.deadline
                    .map(|deadline| deadline.to_rfc3339())
                    .unwrap_or_default(),
                task.status.as_str()
            ));
        }
        Ok(csv)
    }

    fn default_category(&self, user_id: i64, task_id: Option<i64>) -> Result<Category, InfraError> {
        let Some(task_id) = task_id else {
            return Ok(Category::default());
        };
        Ok(Category::from_priority(self.get_task(user_id, task_id)?.priority))
    }

    fn ensure_references(
        &self,
        user_id: i64,
        subject_id: Option<i64>,
        task_id: Option<i64>,
    ) -> Result<(), InfraError> {
        if let Some(subject_id) = subject_id {
            self.get_subject(user_id, subject_id)?;
        }
        if let Some(task_id) = task_id {
            self.get_task(user_id, task_id)?;
        }
        Ok(())
    }

    fn reject_entry_conflict(
        &self,
        user_id: i64,
        candidate: &CandidateInterval,
        existing: &[TimeBlock],
        exclude_id: Option<i64>,
    ) -> Result<(), InfraError> {
        let detector = ConflictDetector::new(self.zone);
        if let Some(conflict) = detector.find_conflict(candidate, existing, exclude_id) {
            debug!(
                "event=entry_conflict user_id={} conflicting_id={:?}",
                user_id, conflict.id
            );
            return Err(InfraError::Conflict(format!(
                "conflict with entry '{}'",
                conflict.title
            )));
        }
        Ok(())
    }

    fn reject_task_conflict(
        &self,
        user_id: i64,
        task: &Task,
        existing: &[Task],
    ) -> Result<(), InfraError> {
        let Some((start, end)) = task.entry_interval() else {
            return Ok(());
        };
        let detector = ConflictDetector::new(self.zone);
        let exclude_id = (task.id != 0).then_some(task.id);
        if let Some(conflict) =
            detector.find_conflict(&CandidateInterval::new(start, end), existing, exclude_id)
        {
            debug!(
                "event=task_conflict user_id={} conflicting_id={}",
                user_id, conflict.id
            );
            return Err(InfraError::Conflict(format!(
                "conflict with task '{}'",
                conflict.title
            )));
        }
        Ok(())
    }
}

fn normalize_optional_text(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
