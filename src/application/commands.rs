use crate::application::bootstrap::bootstrap_workspace;
use crate::application::planner::{EntryDraft, PlannerService, ScheduleSummary, TaskDraft};
use crate::domain::interval::EntryInstant;
use crate::domain::models::{BreakConfig, Category, Priority, Subject, Task, TaskStatus, TimeBlock};
use crate::infrastructure::config::{load_planner_settings, parse_instant, save_break_config};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::schedule_repository::{EntryWindow, SqliteScheduleRepository};
use crate::infrastructure::task_repository::SqliteTaskRepository;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type SqlitePlanner = PlannerService<SqliteTaskRepository, SqliteScheduleRepository>;

pub struct AppState {
    config_dir: PathBuf,
    logs_dir: PathBuf,
    database_path: PathBuf,
    planner: SqlitePlanner,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let settings = load_planner_settings(&bootstrap.config_dir)?;
        let planner = PlannerService::new(
            Arc::new(SqliteTaskRepository::new(&bootstrap.database_path)),
            Arc::new(SqliteScheduleRepository::new(&bootstrap.database_path)),
        )
        .with_zone(settings.zone);

        Ok(Self {
            config_dir: bootstrap.config_dir,
            logs_dir: bootstrap.logs_dir,
            database_path: bootstrap.database_path,
            planner,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn planner(&self) -> &SqlitePlanner {
        &self.planner
    }

    fn zone(&self) -> Tz {
        self.planner.zone()
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        error!("command={command} status=error message={error}");
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        info!("command={command} status=ok {message}");
    }
}

pub fn add_subject_impl(
    state: &AppState,
    user_id: i64,
    name: String,
    description: Option<String>,
) -> Result<Subject, InfraError> {
    let subject = state.planner().create_subject(user_id, &name, description)?;
    state.log_info(
        "add_subject",
        &format!("user_id={user_id} subject_id={}", subject.id),
    );
    Ok(subject)
}

pub fn list_subjects_impl(state: &AppState, user_id: i64) -> Result<Vec<Subject>, InfraError> {
    state.planner().list_subjects(user_id)
}

#[allow(clippy::too_many_arguments)]
pub fn add_task_impl(
    state: &AppState,
    user_id: i64,
    subject_id: i64,
    title: String,
    description: Option<String>,
    priority: Option<String>,
    deadline: Option<String>,
    estimated_minutes: Option<u32>,
) -> Result<Task, InfraError> {
    let draft = TaskDraft {
        subject_id,
        title,
        description,
        priority: priority.as_deref().map(parse_priority).transpose()?,
        deadline: deadline
            .as_deref()
            .map(|raw| parse_datetime_input(raw, "deadline", &state.zone()))
            .transpose()?,
        estimated_minutes,
    };
    let task = state.planner().create_task(user_id, draft)?;
    state.log_info("add_task", &format!("user_id={user_id} task_id={}", task.id));
    Ok(task)
}

pub fn list_tasks_impl(
    state: &AppState,
    user_id: i64,
    status: Option<String>,
) -> Result<Vec<Task>, InfraError> {
    let status = status.as_deref().map(parse_task_status).transpose()?;
    state.planner().list_tasks(user_id, status)
}

pub fn complete_task_impl(
    state: &AppState,
    user_id: i64,
    task_id: i64,
    actual_minutes: Option<u32>,
) -> Result<Task, InfraError> {
    let task = state
        .planner()
        .complete_task(user_id, task_id, actual_minutes)?;
    state.log_info("complete_task", &format!("user_id={user_id} task_id={task_id}"));
    Ok(task)
}

pub fn export_tasks_impl(state: &AppState, user_id: i64) -> Result<String, InfraError> {
    state.planner().export_tasks_csv(user_id)
}

/// Regenerates the schedule with the break policy currently on disk.
/// `until` overrides the configured `scheduleUntil`.
pub fn generate_schedule_impl(
    state: &AppState,
    user_id: i64,
    until: Option<String>,
) -> Result<ScheduleSummary, InfraError> {
    let settings = load_planner_settings(state.config_dir())?;
    let horizon_end = match until.as_deref() {
        Some(raw) => Some(parse_datetime_input(raw, "until", &settings.zone)?),
        None => settings.schedule_until,
    };
    let summary = state
        .planner()
        .regenerate_schedule(user_id, horizon_end, &settings.breaks)?;
    state.log_info(
        "generate_schedule",
        &format!(
            "user_id={user_id} entries={} skipped={}",
            summary.entries.len(),
            summary.skipped_task_ids.len()
        ),
    );
    Ok(summary)
}

pub fn list_schedule_impl(
    state: &AppState,
    user_id: i64,
    start: Option<String>,
    end: Option<String>,
) -> Result<Vec<TimeBlock>, InfraError> {
    let zone = state.zone();
    let window = EntryWindow {
        start: start
            .as_deref()
            .map(|raw| parse_datetime_input(raw, "start", &zone))
            .transpose()?,
        end: end
            .as_deref()
            .map(|raw| parse_datetime_input(raw, "end", &zone))
            .transpose()?,
    };
    state.planner().list_entries(user_id, window)
}

#[allow(clippy::too_many_arguments)]
pub fn add_entry_impl(
    state: &AppState,
    user_id: i64,
    title: String,
    start: String,
    end: String,
    task_id: Option<i64>,
    subject_id: Option<i64>,
    category: Option<String>,
) -> Result<TimeBlock, InfraError> {
    let draft = EntryDraft {
        title,
        description: None,
        start: parse_entry_instant(&start, "start")?,
        end: parse_entry_instant(&end, "end")?,
        task_id,
        subject_id,
        category: category.as_deref().map(parse_category).transpose()?,
    };
    let entry = state.planner().create_entry(user_id, draft)?;
    state.log_info(
        "add_entry",
        &format!("user_id={user_id} entry_id={:?}", entry.id),
    );
    Ok(entry)
}

pub fn delete_entry_impl(state: &AppState, user_id: i64, entry_id: i64) -> Result<bool, InfraError> {
    state.planner().delete_entry(user_id, entry_id)?;
    state.log_info("delete_entry", &format!("user_id={user_id} entry_id={entry_id}"));
    Ok(true)
}

/// Overwrites the given break lengths in `policies.json`, keeping the rest.
pub fn set_breaks_impl(
    state: &AppState,
    short_break_minutes: Option<u32>,
    medium_break_minutes: Option<u32>,
    long_break_minutes: Option<u32>,
    long_break_after_minutes: Option<u32>,
) -> Result<BreakConfig, InfraError> {
    let current = load_planner_settings(state.config_dir())?.breaks;
    let breaks = BreakConfig {
        short_break_minutes: short_break_minutes.unwrap_or(current.short_break_minutes),
        medium_break_minutes: medium_break_minutes.unwrap_or(current.medium_break_minutes),
        long_break_minutes: long_break_minutes.unwrap_or(current.long_break_minutes),
        long_break_after_minutes: long_break_after_minutes
            .unwrap_or(current.long_break_after_minutes),
    };
    save_break_config(state.config_dir(), &breaks)?;
    state.log_info("set_breaks", &format!("breaks={breaks:?}"));
    Ok(breaks)
}

fn parse_priority(value: &str) -> Result<Priority, InfraError> {
    Priority::parse(value).ok_or_else(|| {
        InfraError::InvalidInput(format!(
            "priority must be low|medium|high|urgent, got '{value}'"
        ))
    })
}

fn parse_task_status(value: &str) -> Result<TaskStatus, InfraError> {
    TaskStatus::parse(value).ok_or_else(|| {
        InfraError::InvalidInput(format!(
            "status must be todo|in_progress|done, got '{value}'"
        ))
    })
}

fn parse_category(value: &str) -> Result<Category, InfraError> {
    Category::parse(value).ok_or_else(|| {
        InfraError::InvalidInput(format!(
            "category must be red|yellow|blue|gray, got '{value}'"
        ))
    })
}

fn parse_entry_instant(value: &str, field_name: &str) -> Result<EntryInstant, InfraError> {
    EntryInstant::parse(value).ok_or_else(|| {
        InfraError::InvalidInput(format!(
            "{field_name} must be RFC3339 or YYYY-MM-DDTHH:MM[:SS]"
        ))
    })
}

fn parse_datetime_input(value: &str, field_name: &str, zone: &Tz) -> Result<DateTime<Utc>, InfraError> {
    parse_instant(value, zone).ok_or_else(|| {
        InfraError::InvalidInput(format!(
            "{field_name} must be RFC3339, YYYY-MM-DDTHH:MM[:SS] or YYYY-MM-DD"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "study-planner-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self { path }
        }

        fn app_state(&self) -> AppState {
            AppState::new(self.path.clone()).expect("initialize app state")
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    fn days_from_now(days: i64) -> String {
        (Utc::now() + Duration::days(days)).to_rfc3339()
    }

    #[test]
    fn app_state_bootstraps_the_workspace() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        assert!(state.database_path().exists());
        assert!(state.config_dir().join("policies.json").exists());
        assert!(state.logs_dir().is_dir());
    }

    #[test]
    fn add_task_rejects_unknown_priority() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let subject = add_subject_impl(&state, 1, "Maths".to_string(), None).expect("add subject");

        let result = add_task_impl(
            &state,
            1,
            subject.id,
            "Essay".to_string(),
            None,
            Some("critical".to_string()),
            None,
            None,
        );
        match result {
            Err(InfraError::InvalidInput(message)) => assert!(message.contains("priority")),
            other => panic!("expected invalid input, got {other:?}"),
        }
    }

    #[test]
    fn generate_and_list_schedule_flow() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let subject = add_subject_impl(&state, 1, "Maths".to_string(), None).expect("add subject");
        let task = add_task_impl(
            &state,
            1,
            subject.id,
            "Problem set".to_string(),
            Some("chapters 3-4".to_string()),
            Some("high".to_string()),
            Some(days_from_now(5)),
            Some(180),
        )
        .expect("add task");
        add_task_impl(
            &state,
            1,
            subject.id,
            "Overdue".to_string(),
            None,
            Some("low".to_string()),
            Some(days_from_now(-1)),
            Some(60),
        )
        .expect("add overdue task");

        let summary = generate_schedule_impl(&state, 1, None).expect("generate");
        assert_eq!(summary.study_blocks, 2);
        assert_eq!(summary.skipped_task_ids.len(), 1);
        assert!(summary
            .entries
            .iter()
            .filter(|entry| !entry.is_break())
            .all(|entry| entry.task_id == Some(task.id)));

        let listed = list_schedule_impl(&state, 1, None, None).expect("list schedule");
        assert_eq!(listed, summary.entries);

        let again = generate_schedule_impl(&state, 1, None).expect("regenerate");
        assert_eq!(
            list_schedule_impl(&state, 1, None, None)
                .expect("list schedule")
                .len(),
            again.entries.len()
        );
    }

    #[test]
    fn generate_without_tasks_reports_invalid_input() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let error = generate_schedule_impl(&state, 1, None).expect_err("no tasks");
        assert_eq!(
            state.command_error("generate_schedule", &error),
            "Invalid input: no tasks found to schedule"
        );
    }

    #[test]
    fn add_entry_detects_conflicts_and_delete_entry_removes() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let lecture = add_entry_impl(
            &state,
            1,
            "Lecture".to_string(),
            "2030-01-07T09:00".to_string(),
            "2030-01-07T10:00".to_string(),
            None,
            None,
            Some("blue".to_string()),
        )
        .expect("add entry");

        let clash = add_entry_impl(
            &state,
            1,
            "Lab".to_string(),
            "2030-01-07T09:30:00Z".to_string(),
            "2030-01-07T10:30:00Z".to_string(),
            None,
            None,
            None,
        );
        assert!(matches!(clash, Err(InfraError::Conflict(_))));

        let entry_id = lecture.id.expect("stored id");
        assert!(delete_entry_impl(&state, 1, entry_id).expect("delete entry"));
        assert!(matches!(
            delete_entry_impl(&state, 1, entry_id),
            Err(InfraError::NotFound(_))
        ));
    }

    #[test]
    fn list_schedule_rejects_bad_window() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let result = list_schedule_impl(&state, 1, Some("next week".to_string()), None);
        assert!(matches!(result, Err(InfraError::InvalidInput(_))));
    }

    #[test]
    fn set_breaks_persists_partial_updates() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let updated = set_breaks_impl(&state, Some(10), None, Some(45), None).expect("set breaks");
        assert_eq!(updated.short_break_minutes, 10);
        assert_eq!(updated.medium_break_minutes, 15);
        assert_eq!(
            load_planner_settings(state.config_dir())
                .expect("reload")
                .breaks,
            updated
        );

        assert!(matches!(
            set_breaks_impl(&state, Some(0), None, None, None),
            Err(InfraError::InvalidInput(_))
        ));
    }

    #[test]
    fn complete_and_filter_tasks() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let subject = add_subject_impl(&state, 1, "History".to_string(), None).expect("add subject");
        let task = add_task_impl(
            &state,
            1,
            subject.id,
            "Timeline".to_string(),
            None,
            None,
            None,
            Some(30),
        )
        .expect("add task");

        complete_task_impl(&state, 1, task.id, Some(40)).expect("complete");
        let done = list_tasks_impl(&state, 1, Some("done".to_string())).expect("list done");
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].actual_minutes, Some(40));
        assert!(list_tasks_impl(&state, 1, Some("todo".to_string()))
            .expect("list todo")
            .is_empty());
        assert!(list_tasks_impl(&state, 1, Some("later".to_string())).is_err());
        assert_eq!(list_subjects_impl(&state, 1).expect("subjects").len(), 1);
        assert!(export_tasks_impl(&state, 1)
            .expect("export")
            .contains("Timeline,,,done"));
    }

    #[test]
    fn sub_second_entries_are_stored_on_whole_seconds() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let collapsed = add_entry_impl(
            &state,
            1,
            "Blink".to_string(),
            "2030-01-07T09:00:00.2Z".to_string(),
            "2030-01-07T09:00:00.8Z".to_string(),
            None,
            None,
            None,
        );
        assert!(matches!(collapsed, Err(InfraError::InvalidInput(_))));

        let entry = add_entry_impl(
            &state,
            1,
            "Lecture".to_string(),
            "2030-01-07T09:00:00.5Z".to_string(),
            "2030-01-07T10:00:00.5Z".to_string(),
            None,
            None,
            None,
        )
        .expect("add entry");
        let listed = list_schedule_impl(&state, 1, None, None).expect("list schedule");
        assert_eq!(listed, vec![entry.clone()]);
        assert!(listed.iter().all(|entry| entry.end_time > entry.start_time));
        assert_eq!(entry.start_time.to_rfc3339(), "2030-01-07T09:00:00+00:00");
    }

    #[test]
    fn two_app_states_on_one_workspace_never_double_book() {
        let workspace = TempWorkspace::new();
        let states = [workspace.app_state(), workspace.app_state()];
        let base = DateTime::parse_from_rfc3339("2030-03-04T09:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc);
        let slots = (0..60)
            .map(|slot| {
                let start = base + Duration::minutes(30 * slot);
                (start.to_rfc3339(), (start + Duration::minutes(30)).to_rfc3339())
            })
            .collect::<Vec<_>>();

        let successes = std::thread::scope(|scope| {
            let writers = states
                .iter()
                .enumerate()
                .map(|(writer, state)| {
                    let slots = &slots;
                    scope.spawn(move || {
                        let mut booked = 0;
                        for (start, end) in slots {
                            match add_entry_impl(
                                state,
                                1,
                                format!("Writer {writer}"),
                                start.clone(),
                                end.clone(),
                                None,
                                None,
                                None,
                            ) {
                                Ok(_) => booked += 1,
                                Err(InfraError::Conflict(_)) => {}
                                Err(other) => panic!("unexpected error: {other}"),
                            }
                        }
                        booked
                    })
                })
                .collect::<Vec<_>>();
            writers
                .into_iter()
                .map(|writer| writer.join().expect("writer thread"))
                .sum::<usize>()
        });

        let committed = list_schedule_impl(&states[0], 1, None, None).expect("list schedule");
        assert_eq!(successes, slots.len());
        assert_eq!(committed.len(), slots.len());
        assert!(committed
            .windows(2)
            .all(|pair| pair[0].end_time <= pair[1].start_time));
    }
}
