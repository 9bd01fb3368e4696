use crate::domain::interval::EntryInstant;
use crate::domain::models::BreakConfig;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const POLICIES_JSON: &str = "policies.json";
const SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub policies: serde_json::Value,
}

/// Everything the scheduling workflows read from the workspace configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerSettings {
    pub zone: Tz,
    pub breaks: BreakConfig,
    pub schedule_until: Option<DateTime<Utc>>,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            zone: Tz::UTC,
            breaks: BreakConfig::default(),
            schedule_until: None,
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    let breaks = BreakConfig::default();
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "Study Planner",
                "timezone": "UTC"
            }),
        ),
        (
            POLICIES_JSON,
            serde_json::json!({
                "schema": 1,
                "shortBreakMinutes": breaks.short_break_minutes,
                "mediumBreakMinutes": breaks.medium_break_minutes,
                "longBreakMinutes": breaks.long_break_minutes,
                "longBreakAfterMinutes": breaks.long_break_after_minutes,
                "scheduleUntil": null
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            write_config(&path, &value)?;
        }
    }
    Ok(())
}

fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SCHEMA_VERSION {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        policies: read_config(&config_dir.join(POLICIES_JSON))?,
    })
}

pub fn read_timezone(config_dir: &Path) -> Result<Tz, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let Some(name) = app
        .get("timezone")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Ok(Tz::UTC);
    };
    name.parse::<Tz>()
        .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{name}': {error}")))
}

pub fn read_break_config(config_dir: &Path) -> Result<BreakConfig, InfraError> {
    let policies = read_config(&config_dir.join(POLICIES_JSON))?;
    let breaks: BreakConfig = serde_json::from_value(policies)?;
    breaks.validate().map_err(InfraError::InvalidConfig)?;
    Ok(breaks)
}

/// Accepts RFC 3339, an offset-less date-time, or a bare `YYYY-MM-DD` (midnight in `zone`).
pub fn read_schedule_until(config_dir: &Path, zone: &Tz) -> Result<Option<DateTime<Utc>>, InfraError> {
    let policies = read_config(&config_dir.join(POLICIES_JSON))?;
    let Some(raw) = policies
        .get("scheduleUntil")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };
    parse_instant(raw, zone).map(Some).ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "scheduleUntil must be RFC3339 or YYYY-MM-DD, got '{raw}'"
        ))
    })
}

pub(crate) fn parse_instant(raw: &str, zone: &Tz) -> Option<DateTime<Utc>> {
    if let Some(instant) = EntryInstant::parse(raw) {
        return Some(instant.to_utc(zone));
    }
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()?;
    Some(EntryInstant::Naive(date.and_hms_opt(0, 0, 0)?).to_utc(zone))
}

pub fn load_planner_settings(config_dir: &Path) -> Result<PlannerSettings, InfraError> {
    let zone = read_timezone(config_dir)?;
    Ok(PlannerSettings {
        zone,
        breaks: read_break_config(config_dir)?,
        schedule_until: read_schedule_until(config_dir, &zone)?,
    })
}

pub fn save_break_config(config_dir: &Path, breaks: &BreakConfig) -> Result<(), InfraError> {
    breaks.validate().map_err(InfraError::InvalidInput)?;

    let path = config_dir.join(POLICIES_JSON);
    let mut policies = read_config(&path)?;
    let object = policies.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    let serde_json::Value::Object(values) = serde_json::to_value(breaks)? else {
        return Err(InfraError::InvalidConfig(
            "break config must serialize to an object".to_string(),
        ));
    };
    object.extend(values);

    write_config(&path, &policies)
}
