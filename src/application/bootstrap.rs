use crate::infrastructure::config::{ensure_default_configs, load_configs};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::initialize_database;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DATABASE_FILE: &str = "planner.sqlite";

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
}

/// Creates `config/`, `state/` and `logs/` under `workspace_root`, writes missing
/// default configs and applies the database schema. Safe to run repeatedly.
pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join(DATABASE_FILE);

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let _ = load_configs(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        logs_dir,
        database_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    #[test]
    fn bootstrap_is_idempotent() {
        let sequence = NEXT_WORKSPACE.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "study-planner-bootstrap-{}-{}",
            std::process::id(),
            sequence
        ));

        let first = bootstrap_workspace(&root).expect("first bootstrap");
        let second = bootstrap_workspace(&root).expect("second bootstrap");

        assert_eq!(first.database_path, root.join("state").join(DATABASE_FILE));
        assert_eq!(first.database_path, second.database_path);
        assert!(first.database_path.exists());
        assert!(first.config_dir.join("app.json").exists());
        assert!(first.config_dir.join("policies.json").exists());
        assert!(first.logs_dir.is_dir());

        let _ = fs::remove_dir_all(&root);
    }
}
