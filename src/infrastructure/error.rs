use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl InfraError {
    pub(crate) fn poisoned(resource: &str, error: impl std::fmt::Display) -> Self {
        Self::LockPoisoned(format!("{resource} lock poisoned: {error}"))
    }
}
