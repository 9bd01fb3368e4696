pub mod application;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::bootstrap_workspace;
use application::commands::{
    add_entry_impl, add_subject_impl, add_task_impl, complete_task_impl, delete_entry_impl,
    export_tasks_impl, generate_schedule_impl, list_schedule_impl, list_subjects_impl,
    list_tasks_impl, set_breaks_impl, AppState,
};
use infrastructure::error::InfraError;
use infrastructure::logging::{configured_log_level, init_logging};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

pub const USAGE: &str = "usage: study-planner <workspace> <command> [--option value ...]

commands:
  bootstrap
  add-subject   --name N [--description D]
  subjects
  add-task      --subject ID --title T [--description D] [--priority P] [--deadline TIME] [--minutes M]
  tasks         [--status todo|in_progress|done]
  complete-task --task ID [--minutes M]
  export-tasks
  generate      [--until TIME]
  schedule      [--start TIME] [--end TIME]
  add-entry     --title T --start TIME --end TIME [--task ID] [--subject ID] [--category C]
  delete-entry  --entry ID
  set-breaks    [--short M] [--medium M] [--long M] [--long-after M]

every command accepts --user ID (default 1)";

const DEFAULT_USER_ID: i64 = 1;

#[derive(Debug, Serialize)]
struct BootstrapResponse {
    workspace_root: String,
    database_path: String,
}

#[derive(Debug, Serialize)]
struct DeletedResponse {
    deleted: bool,
}

/// Parsed command line: the workspace, the command name and its `--key value` options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub workspace_root: PathBuf,
    pub command: String,
    options: HashMap<String, String>,
}

impl Invocation {
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let [workspace_root, command, rest @ ..] = args else {
            return Err(USAGE.to_string());
        };

        let mut options = HashMap::new();
        let mut remaining = rest.iter();
        while let Some(flag) = remaining.next() {
            let Some(key) = flag.strip_prefix("--").filter(|key| !key.is_empty()) else {
                return Err(format!("unexpected argument '{flag}'\n\n{USAGE}"));
            };
            let Some(value) = remaining.next() else {
                return Err(format!("missing value for --{key}"));
            };
            options.insert(key.to_string(), value.clone());
        }

        Ok(Self {
            workspace_root: PathBuf::from(workspace_root),
            command: command.clone(),
            options,
        })
    }

    fn text(&self, key: &str) -> Option<String> {
        self.options.get(key).cloned()
    }

    fn required_text(&self, key: &str) -> Result<String, InfraError> {
        self.text(key)
            .ok_or_else(|| InfraError::InvalidInput(format!("--{key} is required")))
    }

    fn number<N: std::str::FromStr>(&self, key: &str) -> Result<Option<N>, InfraError> {
        self.options
            .get(key)
            .map(|raw| {
                raw.trim()
                    .parse::<N>()
                    .map_err(|_| InfraError::InvalidInput(format!("--{key} must be a number, got '{raw}'")))
            })
            .transpose()
    }

    fn required_number<N: std::str::FromStr>(&self, key: &str) -> Result<N, InfraError> {
        self.number(key)?
            .ok_or_else(|| InfraError::InvalidInput(format!("--{key} is required")))
    }

    fn user_id(&self) -> Result<i64, InfraError> {
        Ok(self.number("user")?.unwrap_or(DEFAULT_USER_ID))
    }
}

/// Runs one command line and returns the JSON (or CSV) response text.
pub fn run(args: &[String]) -> Result<String, String> {
    let invocation = Invocation::parse(args)?;

    if invocation.command == "bootstrap" {
        let result =
            bootstrap_workspace(&invocation.workspace_root).map_err(|error| error.to_string())?;
        return to_json(&BootstrapResponse {
            workspace_root: result.workspace_root.display().to_string(),
            database_path: result.database_path.display().to_string(),
        })
        .map_err(|error| error.to_string());
    }

    let state = AppState::new(invocation.workspace_root.clone()).map_err(|error| error.to_string())?;
    if let Err(error) = init_logging(&configured_log_level(), state.logs_dir()) {
        eprintln!("warning: logging disabled: {error}");
    }
    execute(&state, &invocation).map_err(|error| state.command_error(&invocation.command, &error))
}

/// Dispatches an already parsed command against an initialized workspace.
pub fn execute(state: &AppState, invocation: &Invocation) -> Result<String, InfraError> {
    let user_id = invocation.user_id()?;
    match invocation.command.as_str() {
        "add-subject" => to_json(&add_subject_impl(
            state,
            user_id,
            invocation.required_text("name")?,
            invocation.text("description"),
        )?),
        "subjects" => to_json(&list_subjects_impl(state, user_id)?),
        "add-task" => to_json(&add_task_impl(
            state,
            user_id,
            invocation.required_number("subject")?,
            invocation.required_text("title")?,
            invocation.text("description"),
            invocation.text("priority"),
            invocation.text("deadline"),
            invocation.number("minutes")?,
        )?),
        "tasks" => to_json(&list_tasks_impl(state, user_id, invocation.text("status"))?),
        "complete-task" => to_json(&complete_task_impl(
            state,
            user_id,
            invocation.required_number("task")?,
            invocation.number("minutes")?,
        )?),
        "export-tasks" => export_tasks_impl(state, user_id),
        "generate" => to_json(&generate_schedule_impl(
            state,
            user_id,
            invocation.text("until"),
        )?),
        "schedule" => to_json(&list_schedule_impl(
            state,
            user_id,
            invocation.text("start"),
            invocation.text("end"),
        )?),
        "add-entry" => to_json(&add_entry_impl(
            state,
            user_id,
            invocation.required_text("title")?,
            invocation.required_text("start")?,
            invocation.required_text("end")?,
            invocation.number("task")?,
            invocation.number("subject")?,
            invocation.text("category"),
        )?),
        "delete-entry" => to_json(&DeletedResponse {
            deleted: delete_entry_impl(state, user_id, invocation.required_number("entry")?)?,
        }),
        "set-breaks" => to_json(&set_breaks_impl(
            state,
            invocation.number("short")?,
            invocation.number("medium")?,
            invocation.number("long")?,
            invocation.number("long-after")?,
        )?),
        other => Err(InfraError::InvalidInput(format!(
            "unknown command '{other}'\n\n{USAGE}"
        ))),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, InfraError> {
    serde_json::to_string_pretty(value).map_err(InfraError::from)
}
