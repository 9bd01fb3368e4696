use crate::infrastructure::error::InfraError;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = open_connection(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

pub(crate) fn open_connection(path: &Path) -> Result<Connection, InfraError> {
    let connection = Connection::open(path)?;
    connection.pragma_update(None, "foreign_keys", "ON")?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    Ok(connection)
}

/// Takes the database write lock up front, so a read-check-write sequence
/// cannot interleave with another connection's.
pub(crate) fn write_transaction(connection: &mut Connection) -> Result<Transaction<'_>, InfraError> {
    Ok(connection.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

/// Write check that admits anything.
pub fn accept_any<E>(_existing: &[E]) -> Result<(), InfraError> {
    Ok(())
}

/// Timestamps are stored as fixed-width UTC text so that text order is time order.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Drops sub-second precision, which the text encoding does not keep.
pub(crate) fn stored_precision(value: DateTime<Utc>) -> DateTime<Utc> {
    value.trunc_subsecs(0)
}

pub(crate) fn decode_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| InfraError::InvalidInput(format!("invalid {column} '{raw}': {error}")))
}

pub(crate) fn decode_optional_timestamp(
    raw: Option<String>,
    column: &str,
) -> Result<Option<DateTime<Utc>>, InfraError> {
    raw.as_deref()
        .map(|value| decode_timestamp(value, column))
        .transpose()
}
