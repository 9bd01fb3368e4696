use crate::domain::models::{Priority, Subject, Task, TaskStatus};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{
    decode_optional_timestamp, decode_timestamp, encode_timestamp, open_connection,
    stored_precision, write_transaction,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Task fields supplied by callers; storage assigns the id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub subject_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_minutes: Option<u32>,
}

/// Inspects the user's tasks before a write; an error aborts the write.
pub type TaskCheck<'a> = dyn Fn(&[Task]) -> Result<(), InfraError> + 'a;

/// Subjects and tasks, always scoped to the user owning the subject.
pub trait TaskRepository: Send + Sync {
    fn create_subject(
        &self,
        user_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<Subject, InfraError>;
    fn get_subject(&self, user_id: i64, subject_id: i64) -> Result<Option<Subject>, InfraError>;
    fn list_subjects(&self, user_id: i64) -> Result<Vec<Subject>, InfraError>;
    fn save_subject(&self, subject: &Subject) -> Result<bool, InfraError>;
    fn delete_subject(&self, user_id: i64, subject_id: i64) -> Result<bool, InfraError>;

    /// Runs `check` and the insert atomically.
    fn insert_task(
        &self,
        user_id: i64,
        task: &NewTask,
        now: DateTime<Utc>,
        check: &TaskCheck<'_>,
    ) -> Result<Task, InfraError>;
    fn get_task(&self, user_id: i64, task_id: i64) -> Result<Option<Task>, InfraError>;
    /// Ordered by deadline, tasks without one last.
    fn list_tasks(&self, user_id: i64, status: Option<TaskStatus>) -> Result<Vec<Task>, InfraError>;
    /// Stamps `updated_at` with `now`; `check` and the update are atomic.
    fn save_task(
        &self,
        user_id: i64,
        task: &Task,
        now: DateTime<Utc>,
        check: &TaskCheck<'_>,
    ) -> Result<Task, InfraError>;
    fn delete_task(&self, user_id: i64, task_id: i64) -> Result<bool, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteTaskRepository {
    db_path: PathBuf,
}

impl SqliteTaskRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }
}

const TASK_COLUMNS: &str = "t.id, t.subject_id, t.title, t.description, t.priority, t.deadline,
    t.estimated_minutes, t.actual_minutes, t.status, t.completed_at, t.created_at, t.updated_at";

struct TaskRow {
    id: i64,
    subject_id: i64,
    title: String,
    description: Option<String>,
    priority: Option<String>,
    deadline: Option<String>,
    estimated_minutes: Option<u32>,
    actual_minutes: Option<u32>,
    status: String,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            subject_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            priority: row.get(4)?,
            deadline: row.get(5)?,
            estimated_minutes: row.get(6)?,
            actual_minutes: row.get(7)?,
            status: row.get(8)?,
            completed_at: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_task(self) -> Result<Task, InfraError> {
        let status = TaskStatus::parse(&self.status).ok_or_else(|| {
            InfraError::InvalidInput(format!("invalid tasks.status '{}'", self.status))
        })?;
        Ok(Task {
            id: self.id,
            subject_id: self.subject_id,
            title: self.title,
            description: self.description,
            // Unknown stored priorities rank like a missing one.
            priority: self.priority.as_deref().and_then(Priority::parse),
            deadline: decode_optional_timestamp(self.deadline, "tasks.deadline")?,
            estimated_minutes: self.estimated_minutes,
            actual_minutes: self.actual_minutes,
            status,
            completed_at: decode_optional_timestamp(self.completed_at, "tasks.completed_at")?,
            created_at: decode_timestamp(&self.created_at, "tasks.created_at")?,
            updated_at: decode_timestamp(&self.updated_at, "tasks.updated_at")?,
        })
    }
}

fn subject_from_row(row: &Row<'_>) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
    })
}

fn select_tasks(
    connection: &Connection,
    user_id: i64,
    status: Option<TaskStatus>,
) -> Result<Vec<Task>, InfraError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks t JOIN subjects s ON s.id = t.subject_id
         WHERE s.user_id = ?1 AND (?2 IS NULL OR t.status = ?2)
         ORDER BY t.deadline IS NULL, t.deadline, t.id"
    ))?;
    let rows = statement
        .query_map(
            params![user_id, status.map(TaskStatus::as_str)],
            TaskRow::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(TaskRow::into_task).collect()
}

fn ensure_subject_owner(connection: &Connection, user_id: i64, subject_id: i64) -> Result<(), InfraError> {
    let owned = connection
        .query_row(
            "SELECT 1 FROM subjects WHERE id = ?1 AND user_id = ?2",
            params![subject_id, user_id],
            |_| Ok(()),
        )
        .optional()?;
    owned.ok_or_else(|| InfraError::NotFound(format!("subject {subject_id}")))
}

impl TaskRepository for SqliteTaskRepository {
    fn create_subject(
        &self,
        user_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<Subject, InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO subjects (user_id, name, description) VALUES (?1, ?2, ?3)",
            params![user_id, name, description],
        )?;
        Ok(Subject {
            id: connection.last_insert_rowid(),
            user_id,
            name: name.to_string(),
            description: description.map(ToOwned::to_owned),
        })
    }

    fn get_subject(&self, user_id: i64, subject_id: i64) -> Result<Option<Subject>, InfraError> {
        let connection = self.connect()?;
        connection
            .query_row(
                "SELECT id, user_id, name, description FROM subjects WHERE id = ?1 AND user_id = ?2",
                params![subject_id, user_id],
                subject_from_row,
            )
            .optional()
            .map_err(InfraError::from)
    }

    fn list_subjects(&self, user_id: i64) -> Result<Vec<Subject>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT id, user_id, name, description FROM subjects WHERE user_id = ?1 ORDER BY id",
        )?;
        let subjects = statement
            .query_map(params![user_id], subject_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subjects)
    }

    fn save_subject(&self, subject: &Subject) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let changed = connection.execute(
            "UPDATE subjects SET name = ?1, description = ?2 WHERE id = ?3 AND user_id = ?4",
            params![subject.name, subject.description, subject.id, subject.user_id],
        )?;
        Ok(changed > 0)
    }

    fn delete_subject(&self, user_id: i64, subject_id: i64) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let changed = connection.execute(
            "DELETE FROM subjects WHERE id = ?1 AND user_id = ?2",
            params![subject_id, user_id],
        )?;
        Ok(changed > 0)
    }

    fn insert_task(
        &self,
        user_id: i64,
        task: &NewTask,
        now: DateTime<Utc>,
        check: &TaskCheck<'_>,
    ) -> Result<Task, InfraError> {
        let now = stored_precision(now);
        let deadline = task.deadline.map(stored_precision);
        let stamp = encode_timestamp(now);

        let mut connection = self.connect()?;
        let transaction = write_transaction(&mut connection)?;
        ensure_subject_owner(&transaction, user_id, task.subject_id)?;
        check(&select_tasks(&transaction, user_id, None)?)?;
        transaction.execute(
            "INSERT INTO tasks (subject_id, title, description, priority, deadline,
               estimated_minutes, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                task.subject_id,
                task.title,
                task.description,
                task.priority.map(Priority::as_str),
                deadline.map(encode_timestamp),
                task.estimated_minutes,
                TaskStatus::Todo.as_str(),
                stamp,
            ],
        )?;
        let id = transaction.last_insert_rowid();
        transaction.commit()?;
        Ok(Task {
            id,
            subject_id: task.subject_id,
            title: task.title.clone(),
            description: task.description.clone(),
            priority: task.priority,
            deadline,
            estimated_minutes: task.estimated_minutes,
            actual_minutes: None,
            status: TaskStatus::Todo,
            completed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn get_task(&self, user_id: i64, task_id: i64) -> Result<Option<Task>, InfraError> {
        let connection = self.connect()?;
        let row = connection
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks t JOIN subjects s ON s.id = t.subject_id
                     WHERE t.id = ?1 AND s.user_id = ?2"
                ),
                params![task_id, user_id],
                TaskRow::from_row,
            )
            .optional()?;
        row.map(TaskRow::into_task).transpose()
    }

    fn list_tasks(&self, user_id: i64, status: Option<TaskStatus>) -> Result<Vec<Task>, InfraError> {
        select_tasks(&self.connect()?, user_id, status)
    }

    fn save_task(
        &self,
        user_id: i64,
        task: &Task,
        now: DateTime<Utc>,
        check: &TaskCheck<'_>,
    ) -> Result<Task, InfraError> {
        let task = Task {
            deadline: task.deadline.map(stored_precision),
            completed_at: task.completed_at.map(stored_precision),
            created_at: stored_precision(task.created_at),
            updated_at: stored_precision(now),
            ..task.clone()
        };

        let mut connection = self.connect()?;
        let transaction = write_transaction(&mut connection)?;
        ensure_subject_owner(&transaction, user_id, task.subject_id)?;
        check(&select_tasks(&transaction, user_id, None)?)?;
        let changed = transaction.execute(
            "UPDATE tasks SET subject_id = ?1, title = ?2, description = ?3, priority = ?4,
               deadline = ?5, estimated_minutes = ?6, actual_minutes = ?7, status = ?8,
               completed_at = ?9, updated_at = ?10
             WHERE id = ?11
               AND subject_id IN (SELECT id FROM subjects WHERE user_id = ?12)",
            params![
                task.subject_id,
                task.title,
                task.description,
                task.priority.map(Priority::as_str),
                task.deadline.map(encode_timestamp),
                task.estimated_minutes,
                task.actual_minutes,
                task.status.as_str(),
                task.completed_at.map(encode_timestamp),
                encode_timestamp(task.updated_at),
                task.id,
                user_id,
            ],
        )?;
        if changed == 0 {
            return Err(InfraError::NotFound(format!("task {}", task.id)));
        }
        transaction.commit()?;
        Ok(task)
    }

    fn delete_task(&self, user_id: i64, task_id: i64) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let changed = connection.execute(
            "DELETE FROM tasks WHERE id = ?1
               AND subject_id IN (SELECT id FROM subjects WHERE user_id = ?2)",
            params![task_id, user_id],
        )?;
        Ok(changed > 0)
    }
}

#[derive(Debug, Default)]
struct TaskStore {
    next_subject_id: i64,
    next_task_id: i64,
    subjects: BTreeMap<i64, Subject>,
    tasks: BTreeMap<i64, Task>,
}

impl TaskStore {
    fn owned_tasks(&self, user_id: i64) -> Vec<Task> {
        let mut tasks = self
            .tasks
            .values()
            .filter(|task| self.owns_subject(user_id, task.subject_id))
            .cloned()
            .collect::<Vec<_>>();
        tasks.sort_by_key(|task| (task.deadline.is_none(), task.deadline, task.id));
        tasks
    }

    fn owns_subject(&self, user_id: i64, subject_id: i64) -> bool {
        self.subjects
            .get(&subject_id)
            .is_some_and(|subject| subject.user_id == user_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    store: Mutex<TaskStore>,
}

impl InMemoryTaskRepository {
    fn lock(&self) -> Result<MutexGuard<'_, TaskStore>, InfraError> {
        self.store
            .lock()
            .map_err(|error| InfraError::poisoned("task store", error))
    }
}

impl TaskRepository for InMemoryTaskRepository {
    fn create_subject(
        &self,
        user_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<Subject, InfraError> {
        let mut store = self.lock()?;
        store.next_subject_id += 1;
        let subject = Subject {
            id: store.next_subject_id,
            user_id,
            name: name.to_string(),
            description: description.map(ToOwned::to_owned),
        };
        store.subjects.insert(subject.id, subject.clone());
        Ok(subject)
    }

    fn get_subject(&self, user_id: i64, subject_id: i64) -> Result<Option<Subject>, InfraError> {
        let store = self.lock()?;
        Ok(store
            .subjects
            .get(&subject_id)
            .filter(|subject| subject.user_id == user_id)
            .cloned())
    }

    fn list_subjects(&self, user_id: i64) -> Result<Vec<Subject>, InfraError> {
        let store = self.lock()?;
        Ok(store
            .subjects
            .values()
            .filter(|subject| subject.user_id == user_id)
            .cloned()
            .collect())
    }

    fn save_subject(&self, subject: &Subject) -> Result<bool, InfraError> {
        let mut store = self.lock()?;
        if !store.owns_subject(subject.user_id, subject.id) {
            return Ok(false);
        }
        store.subjects.insert(subject.id, subject.clone());
        Ok(true)
    }

    fn delete_subject(&self, user_id: i64, subject_id: i64) -> Result<bool, InfraError> {
        let mut store = self.lock()?;
        if !store.owns_subject(user_id, subject_id) {
            return Ok(false);
        }
        store.subjects.remove(&subject_id);
        store.tasks.retain(|_, task| task.subject_id != subject_id);
        Ok(true)
    }

    fn insert_task(
        &self,
        user_id: i64,
        task: &NewTask,
        now: DateTime<Utc>,
        check: &TaskCheck<'_>,
    ) -> Result<Task, InfraError> {
        let mut store = self.lock()?;
        if !store.owns_subject(user_id, task.subject_id) {
            return Err(InfraError::NotFound(format!("subject {}", task.subject_id)));
        }
        check(&store.owned_tasks(user_id))?;
        store.next_task_id += 1;
        let created = Task {
            id: store.next_task_id,
            subject_id: task.subject_id,
            title: task.title.clone(),
            description: task.description.clone(),
            priority: task.priority,
            deadline: task.deadline,
            estimated_minutes: task.estimated_minutes,
            actual_minutes: None,
            status: TaskStatus::Todo,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        store.tasks.insert(created.id, created.clone());
        Ok(created)
    }

    fn get_task(&self, user_id: i64, task_id: i64) -> Result<Option<Task>, InfraError> {
        let store = self.lock()?;
        Ok(store
            .tasks
            .get(&task_id)
            .filter(|task| store.owns_subject(user_id, task.subject_id))
            .cloned())
    }

    fn list_tasks(&self, user_id: i64, status: Option<TaskStatus>) -> Result<Vec<Task>, InfraError> {
        let mut tasks = self.lock()?.owned_tasks(user_id);
        tasks.retain(|task| status.is_none_or(|wanted| task.status == wanted));
        Ok(tasks)
    }

    fn save_task(
        &self,
        user_id: i64,
        task: &Task,
        now: DateTime<Utc>,
        check: &TaskCheck<'_>,
    ) -> Result<Task, InfraError> {
        let mut store = self.lock()?;
        let owned = store
            .tasks
            .get(&task.id)
            .is_some_and(|stored| store.owns_subject(user_id, stored.subject_id));
        if !owned {
            return Err(InfraError::NotFound(format!("task {}", task.id)));
        }
        if !store.owns_subject(user_id, task.subject_id) {
            return Err(InfraError::NotFound(format!("subject {}", task.subject_id)));
        }
        check(&store.owned_tasks(user_id))?;
        let saved = Task {
            updated_at: now,
            ..task.clone()
        };
        store.tasks.insert(saved.id, saved.clone());
        Ok(saved)
    }

    fn delete_task(&self, user_id: i64, task_id: i64) -> Result<bool, InfraError> {
        let mut store = self.lock()?;
        let owned = store
            .tasks
            .get(&task_id)
            .is_some_and(|task| store.owns_subject(user_id, task.subject_id));
        if owned {
            store.tasks.remove(&task_id);
        }
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::{accept_any, initialize_database};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_DB: AtomicUsize = AtomicUsize::new(0);

    struct TempDatabase {
        dir: PathBuf,
        path: PathBuf,
    }

    impl TempDatabase {
        fn new() -> Self {
            let sequence = NEXT_DB.fetch_add(1, Ordering::Relaxed);
            let dir = std::env::temp_dir().join(format!(
                "study-planner-task-repo-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&dir).expect("create temp dir");
            let path = dir.join("planner.sqlite");
            initialize_database(&path).expect("initialize database");
            Self { dir, path }
        }
    }

    impl Drop for TempDatabase {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn new_task(subject_id: i64, title: &str, deadline: Option<&str>) -> NewTask {
        NewTask {
            subject_id,
            title: title.to_string(),
            description: None,
            priority: Some(Priority::Medium),
            deadline: deadline.map(fixed_time),
            estimated_minutes: Some(60),
        }
    }

    fn exercise_repository(repository: &dyn TaskRepository) {
        let now = fixed_time("2026-02-15T08:00:00Z");
        let maths = repository
            .create_subject(1, "Maths", Some("Calculus II"))
            .expect("create subject");
        let history = repository
            .create_subject(2, "History", None)
            .expect("create subject");

        let late = repository
            .insert_task(1, &new_task(maths.id, "Essay", Some("2026-02-20T12:00:00Z")), now, &accept_any::<Task>)
            .expect("insert task");
        let open = repository
            .insert_task(1, &new_task(maths.id, "Reading", None), now, &accept_any::<Task>)
            .expect("insert task");
        let early = repository
            .insert_task(1, &new_task(maths.id, "Quiz", Some("2026-02-17T09:00:00Z")), now, &accept_any::<Task>)
            .expect("insert task");
        repository
            .insert_task(2, &new_task(history.id, "Timeline", None), now, &accept_any::<Task>)
            .expect("insert task");

        let ids = repository
            .list_tasks(1, None)
            .expect("list tasks")
            .into_iter()
            .map(|task| task.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![early.id, late.id, open.id]);
        assert!(repository.get_task(2, early.id).expect("get task").is_none());

        let mut done = repository
            .get_task(1, early.id)
            .expect("get task")
            .expect("task exists");
        done.status = TaskStatus::Done;
        done.completed_at = Some(fixed_time("2026-02-16T10:00:00Z"));
        let later = fixed_time("2026-02-16T10:00:00Z");
        let saved = repository
            .save_task(1, &done, later, &accept_any::<Task>)
            .expect("save task");
        assert_eq!(saved.updated_at, later);
        assert_eq!(
            repository.get_task(1, early.id).expect("get task"),
            Some(saved)
        );

        let finished = repository
            .list_tasks(1, Some(TaskStatus::Done))
            .expect("list done");
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].id, early.id);

        assert!(!repository.delete_task(2, late.id).expect("foreign delete"));
        assert!(repository.delete_task(1, late.id).expect("delete"));

        assert!(repository.delete_subject(1, maths.id).expect("delete subject"));
        assert!(repository.list_tasks(1, None).expect("list").is_empty());
        assert_eq!(repository.list_tasks(2, None).expect("list").len(), 1);
    }

    #[test]
    fn in_memory_repository_scopes_by_owner() {
        exercise_repository(&InMemoryTaskRepository::default());
    }

    #[test]
    fn sqlite_repository_scopes_by_owner() {
        let database = TempDatabase::new();
        exercise_repository(&SqliteTaskRepository::new(&database.path));
    }

    fn exercise_checked_writes(repository: &dyn TaskRepository) {
        let now = fixed_time("2026-02-15T08:00:00Z");
        let maths = repository
            .create_subject(1, "Maths", None)
            .expect("create subject");
        let essay = repository
            .insert_task(1, &new_task(maths.id, "Essay", None), now, &accept_any::<Task>)
            .expect("insert task");

        let refuse = |existing: &[Task]| -> Result<(), InfraError> {
            Err(InfraError::Conflict(format!("{} tasks already", existing.len())))
        };
        match repository.insert_task(1, &new_task(maths.id, "Quiz", None), now, &refuse) {
            Err(InfraError::Conflict(message)) => assert_eq!(message, "1 tasks already"),
            other => panic!("expected conflict, got {other:?}"),
        }
        let renamed = Task {
            title: "Long essay".to_string(),
            ..essay.clone()
        };
        assert!(matches!(
            repository.save_task(1, &renamed, now, &refuse),
            Err(InfraError::Conflict(_))
        ));
        assert!(matches!(
            repository.save_task(2, &renamed, now, &accept_any::<Task>),
            Err(InfraError::NotFound(_))
        ));
        assert!(matches!(
            repository.insert_task(2, &new_task(maths.id, "Steal", None), now, &accept_any::<Task>),
            Err(InfraError::NotFound(_))
        ));
        assert_eq!(repository.list_tasks(1, None).expect("list"), vec![essay]);
    }

    #[test]
    fn rejected_checks_and_foreign_users_leave_tasks_untouched() {
        exercise_checked_writes(&InMemoryTaskRepository::default());
        let database = TempDatabase::new();
        exercise_checked_writes(&SqliteTaskRepository::new(&database.path));
    }

    #[test]
    fn subject_updates_require_ownership() {
        let repository = InMemoryTaskRepository::default();
        let subject = repository
            .create_subject(1, "Physics", None)
            .expect("create subject");
        let hijacked = Subject {
            user_id: 2,
            name: "Mine now".to_string(),
            ..subject.clone()
        };
        assert!(!repository.save_subject(&hijacked).expect("save"));
        assert_eq!(
            repository.get_subject(1, subject.id).expect("get"),
            Some(subject)
        );
    }
}
