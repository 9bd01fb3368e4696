use crate::domain::models::{Category, TimeBlock};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{
    decode_timestamp, encode_timestamp, open_connection, stored_precision, write_transaction,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl EntryWindow {
    pub fn contains(&self, entry: &TimeBlock) -> bool {
        self.start.is_none_or(|start| entry.start_time >= start)
            && self.end.is_none_or(|end| entry.end_time <= end)
    }
}

/// Inspects the user's committed entries before a write; an error aborts the write.
pub type EntryCheck<'a> = dyn Fn(&[TimeBlock]) -> Result<(), InfraError> + 'a;

/// Committed calendar entries of each user. Checked writes are atomic across
/// connections.
pub trait ScheduleRepository: Send + Sync {
    fn insert_entry(
        &self,
        user_id: i64,
        entry: &TimeBlock,
        now: DateTime<Utc>,
        check: &EntryCheck<'_>,
    ) -> Result<TimeBlock, InfraError>;
    fn get_entry(&self, user_id: i64, entry_id: i64) -> Result<Option<TimeBlock>, InfraError>;
    /// Ordered by start time.
    fn list_entries(&self, user_id: i64, window: EntryWindow) -> Result<Vec<TimeBlock>, InfraError>;
    fn save_entry(
        &self,
        user_id: i64,
        entry: &TimeBlock,
        now: DateTime<Utc>,
        check: &EntryCheck<'_>,
    ) -> Result<TimeBlock, InfraError>;
    fn delete_entry(&self, user_id: i64, entry_id: i64) -> Result<bool, InfraError>;
    /// Drops every entry of the user and stores `entries` instead, atomically.
    fn replace_all(
        &self,
        user_id: i64,
        entries: &[TimeBlock],
        now: DateTime<Utc>,
    ) -> Result<Vec<TimeBlock>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteScheduleRepository {
    db_path: PathBuf,
}

impl SqliteScheduleRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }
}

const ENTRY_COLUMNS: &str = "id, title, description, start_time, end_time, task_id, subject_id,
    category, created_at, updated_at";

struct EntryRow {
    id: i64,
    title: String,
    description: Option<String>,
    start_time: String,
    end_time: String,
    task_id: Option<i64>,
    subject_id: Option<i64>,
    category: String,
    created_at: String,
    updated_at: String,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            task_id: row.get(5)?,
            subject_id: row.get(6)?,
            category: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_entry(self) -> Result<TimeBlock, InfraError> {
        Ok(TimeBlock {
            id: Some(self.id),
            title: self.title,
            description: self.description,
            start_time: decode_timestamp(&self.start_time, "schedules.start_time")?,
            end_time: decode_timestamp(&self.end_time, "schedules.end_time")?,
            task_id: self.task_id,
            subject_id: self.subject_id,
            category: Category::parse(&self.category).unwrap_or_default(),
            created_at: Some(decode_timestamp(&self.created_at, "schedules.created_at")?),
            updated_at: Some(decode_timestamp(&self.updated_at, "schedules.updated_at")?),
        })
    }
}

fn insert_row(
    connection: &Connection,
    user_id: i64,
    entry: &TimeBlock,
    now: DateTime<Utc>,
) -> Result<TimeBlock, InfraError> {
    let entry = at_stored_precision(entry);
    let now = stored_precision(now);
    connection.execute(
        "INSERT INTO schedules (user_id, title, description, start_time, end_time, task_id,
           subject_id, category, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            user_id,
            entry.title,
            entry.description,
            encode_timestamp(entry.start_time),
            encode_timestamp(entry.end_time),
            entry.task_id,
            entry.subject_id,
            entry.category.as_str(),
            encode_timestamp(now),
        ],
    )?;
    Ok(stamped(&entry, connection.last_insert_rowid(), now, now))
}

fn select_entry(
    connection: &Connection,
    user_id: i64,
    entry_id: i64,
) -> Result<Option<TimeBlock>, InfraError> {
    let row = connection
        .query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM schedules WHERE id = ?1 AND user_id = ?2"),
            params![entry_id, user_id],
            EntryRow::from_row,
        )
        .optional()?;
    row.map(EntryRow::into_entry).transpose()
}

fn select_entries(
    connection: &Connection,
    user_id: i64,
    window: EntryWindow,
) -> Result<Vec<TimeBlock>, InfraError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM schedules
         WHERE user_id = ?1
           AND (?2 IS NULL OR start_time >= ?2)
           AND (?3 IS NULL OR end_time <= ?3)
         ORDER BY start_time, id"
    ))?;
    let rows = statement
        .query_map(
            params![
                user_id,
                window.start.map(encode_timestamp),
                window.end.map(encode_timestamp)
            ],
            EntryRow::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(EntryRow::into_entry).collect()
}

fn at_stored_precision(entry: &TimeBlock) -> TimeBlock {
    TimeBlock {
        start_time: stored_precision(entry.start_time),
        end_time: stored_precision(entry.end_time),
        ..entry.clone()
    }
}

fn stamped(entry: &TimeBlock, id: i64, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> TimeBlock {
    TimeBlock {
        id: Some(id),
        created_at: Some(created_at),
        updated_at: Some(updated_at),
        ..entry.clone()
    }
}

impl ScheduleRepository for SqliteScheduleRepository {
    fn insert_entry(
        &self,
        user_id: i64,
        entry: &TimeBlock,
        now: DateTime<Utc>,
        check: &EntryCheck<'_>,
    ) -> Result<TimeBlock, InfraError> {
        let mut connection = self.connect()?;
        let transaction = write_transaction(&mut connection)?;
        check(&select_entries(&transaction, user_id, EntryWindow::default())?)?;
        let inserted = insert_row(&transaction, user_id, entry, now)?;
        transaction.commit()?;
        Ok(inserted)
    }

    fn get_entry(&self, user_id: i64, entry_id: i64) -> Result<Option<TimeBlock>, InfraError> {
        select_entry(&self.connect()?, user_id, entry_id)
    }

    fn list_entries(&self, user_id: i64, window: EntryWindow) -> Result<Vec<TimeBlock>, InfraError> {
        select_entries(&self.connect()?, user_id, window)
    }

    fn save_entry(
        &self,
        user_id: i64,
        entry: &TimeBlock,
        now: DateTime<Utc>,
        check: &EntryCheck<'_>,
    ) -> Result<TimeBlock, InfraError> {
        let entry_id = entry
            .id
            .ok_or_else(|| InfraError::InvalidInput("entry id is required".to_string()))?;
        let entry = at_stored_precision(entry);
        let now = stored_precision(now);

        let mut connection = self.connect()?;
        let transaction = write_transaction(&mut connection)?;
        let existing = select_entry(&transaction, user_id, entry_id)?
            .ok_or_else(|| InfraError::NotFound(format!("schedule entry {entry_id}")))?;
        check(&select_entries(&transaction, user_id, EntryWindow::default())?)?;
        transaction.execute(
            "UPDATE schedules SET title = ?1, description = ?2, start_time = ?3, end_time = ?4,
               task_id = ?5, subject_id = ?6, category = ?7, updated_at = ?8
             WHERE id = ?9 AND user_id = ?10",
            params![
                entry.title,
                entry.description,
                encode_timestamp(entry.start_time),
                encode_timestamp(entry.end_time),
                entry.task_id,
                entry.subject_id,
                entry.category.as_str(),
                encode_timestamp(now),
                entry_id,
                user_id,
            ],
        )?;
        transaction.commit()?;
        Ok(stamped(
            &entry,
            entry_id,
            existing.created_at.unwrap_or(now),
            now,
        ))
    }

    fn delete_entry(&self, user_id: i64, entry_id: i64) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let changed = connection.execute(
            "DELETE FROM schedules WHERE id = ?1 AND user_id = ?2",
            params![entry_id, user_id],
        )?;
        Ok(changed > 0)
    }

    fn replace_all(
        &self,
        user_id: i64,
        entries: &[TimeBlock],
        now: DateTime<Utc>,
    ) -> Result<Vec<TimeBlock>, InfraError> {
        let mut connection = self.connect()?;
        let transaction = write_transaction(&mut connection)?;
        transaction.execute("DELETE FROM schedules WHERE user_id = ?1", params![user_id])?;
        let stored = entries
            .iter()
            .map(|entry| insert_row(&transaction, user_id, entry, now))
            .collect::<Result<Vec<_>, _>>()?;
        transaction.commit()?;
        Ok(stored)
    }
}

#[derive(Debug, Default)]
struct ScheduleStore {
    next_id: i64,
    entries: BTreeMap<i64, (i64, TimeBlock)>,
}

impl ScheduleStore {
    fn insert(&mut self, user_id: i64, entry: &TimeBlock, now: DateTime<Utc>) -> TimeBlock {
        self.next_id += 1;
        let now = stored_precision(now);
        let stored = stamped(&at_stored_precision(entry), self.next_id, now, now);
        self.entries.insert(self.next_id, (user_id, stored.clone()));
        stored
    }

    fn owned(&self, user_id: i64, entry_id: i64) -> Option<&TimeBlock> {
        self.entries
            .get(&entry_id)
            .filter(|(owner, _)| *owner == user_id)
            .map(|(_, entry)| entry)
    }

    fn listed(&self, user_id: i64, window: EntryWindow) -> Vec<TimeBlock> {
        let mut entries = self
            .entries
            .values()
            .filter(|(owner, entry)| *owner == user_id && window.contains(entry))
            .map(|(_, entry)| entry.clone())
            .collect::<Vec<_>>();
        entries.sort_by_key(|entry| (entry.start_time, entry.id));
        entries
    }
}

#[derive(Debug, Default)]
pub struct InMemoryScheduleRepository {
    store: Mutex<ScheduleStore>,
}

impl InMemoryScheduleRepository {
    fn lock(&self) -> Result<MutexGuard<'_, ScheduleStore>, InfraError> {
        self.store
            .lock()
            .map_err(|error| InfraError::poisoned("schedule store", error))
    }
}

impl ScheduleRepository for InMemoryScheduleRepository {
    fn insert_entry(
        &self,
        user_id: i64,
        entry: &TimeBlock,
        now: DateTime<Utc>,
        check: &EntryCheck<'_>,
    ) -> Result<TimeBlock, InfraError> {
        let mut store = self.lock()?;
        check(&store.listed(user_id, EntryWindow::default()))?;
        Ok(store.insert(user_id, entry, now))
    }

    fn get_entry(&self, user_id: i64, entry_id: i64) -> Result<Option<TimeBlock>, InfraError> {
        Ok(self.lock()?.owned(user_id, entry_id).cloned())
    }

    fn list_entries(&self, user_id: i64, window: EntryWindow) -> Result<Vec<TimeBlock>, InfraError> {
        Ok(self.lock()?.listed(user_id, window))
    }

    fn save_entry(
        &self,
        user_id: i64,
        entry: &TimeBlock,
        now: DateTime<Utc>,
        check: &EntryCheck<'_>,
    ) -> Result<TimeBlock, InfraError> {
        let entry_id = entry
            .id
            .ok_or_else(|| InfraError::InvalidInput("entry id is required".to_string()))?;
        let now = stored_precision(now);
        let mut store = self.lock()?;
        let created_at = store
            .owned(user_id, entry_id)
            .ok_or_else(|| InfraError::NotFound(format!("schedule entry {entry_id}")))?
            .created_at
            .unwrap_or(now);
        check(&store.listed(user_id, EntryWindow::default()))?;
        let saved = stamped(&at_stored_precision(entry), entry_id, created_at, now);
        store.entries.insert(entry_id, (user_id, saved.clone()));
        Ok(saved)
    }

    fn delete_entry(&self, user_id: i64, entry_id: i64) -> Result<bool, InfraError> {
        let mut store = self.lock()?;
        if store.owned(user_id, entry_id).is_none() {
            return Ok(false);
        }
        store.entries.remove(&entry_id);
        Ok(true)
    }

    fn replace_all(
        &self,
        user_id: i64,
        entries: &[TimeBlock],
        now: DateTime<Utc>,
    ) -> Result<Vec<TimeBlock>, InfraError> {
        let mut store = self.lock()?;
        store.entries.retain(|_, (owner, _)| *owner != user_id);
        Ok(entries
            .iter()
            .map(|entry| store.insert(user_id, entry, now))
            .collect())
    }
}
