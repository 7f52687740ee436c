//! Batched, idempotent insertion into the target.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::target::TargetStore;
use crate::transform::{CanonicalRow, CanonicalValue};

/// What to do with rows whose primary key already exists in the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingRowPolicy {
    /// Skip silently; skipped rows count as migrated.
    #[default]
    Skip,
    /// Skip, log each one and count them in a separate bucket.
    Report,
}

impl FromStr for ExistingRowPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "report" => Ok(Self::Report),
            other => Err(Error::Config(format!(
                "unknown existing_rows policy '{}' (expected skip or report)",
                other
            ))),
        }
    }
}

/// A row the target rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    /// Primary-key value of the row.
    pub key: String,
    /// Rejection reason.
    pub message: String,
    /// The row as it was sent.
    pub payload: Value,
}

/// Result of writing one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WriteOutcome {
    /// Rows inserted.
    pub inserted: u64,
    /// Rows already present and left untouched.
    pub skipped: u64,
    /// Rows the target rejected.
    pub errors: Vec<RowError>,
}

/// Writes canonical rows into target tables.
///
/// Each row is checked for existence by primary key before insertion, so
/// re-running a migration never duplicates rows. A rejected row is logged
/// with its payload and counted; it never aborts the batch.
pub struct TargetWriter<'a> {
    target: &'a dyn TargetStore,
    policy: ExistingRowPolicy,
    /// Live target columns per table.
    columns: Mutex<HashMap<String, HashSet<String>>>,
}

impl<'a> TargetWriter<'a> {
    /// Creates a writer over a target connection.
    pub fn new(target: &'a dyn TargetStore, policy: ExistingRowPolicy) -> Self {
        Self {
            target,
            policy,
            columns: Mutex::new(HashMap::new()),
        }
    }

    /// Existing-row policy in effect.
    pub fn policy(&self) -> ExistingRowPolicy {
        self.policy
    }

    /// Live columns of a table, loaded once per table.
    async fn table_columns(&self, table: &str) -> Result<HashSet<String>> {
        let mut cache = self.columns.lock().await;
        if let Some(columns) = cache.get(table) {
            return Ok(columns.clone());
        }
        let columns: HashSet<String> = self.target.list_columns(table).await?.into_iter().collect();
        cache.insert(table.to_string(), columns.clone());
        Ok(columns)
    }

    /// Writes a batch of rows into `table`.
    ///
    /// # Errors
    ///
    /// Only fatal target errors are returned; per-row failures are reported
    /// in [`WriteOutcome::errors`].
    pub async fn write_batch(
        &self,
        table: &str,
        rows: Vec<CanonicalRow>,
        primary_key: &str,
    ) -> Result<WriteOutcome> {
        let columns = self.table_columns(table).await?;
        let mut outcome = WriteOutcome::default();
        let mut warned: HashSet<String> = HashSet::new();

        for mut row in rows {
            // Schema projection against the live table.
            if !columns.is_empty() {
                for dropped in row.retain_columns(|name| columns.contains(name)) {
                    if warned.insert(dropped.clone()) {
                        warn!(table, column = %dropped, "Column absent from target table, value dropped");
                    }
                }
            }

            let key_value = row.get(primary_key).cloned().unwrap_or(CanonicalValue::Null);
            let key = key_value.to_string();

            match self.write_row(table, &row, primary_key, &key_value).await {
                Ok(true) => outcome.inserted += 1,
                Ok(false) => {
                    outcome.skipped += 1;
                    if self.policy == ExistingRowPolicy::Report {
                        info!(table, key = %key, "Row already present, skipped");
                    }
                }
                Err(e) if e.is_row_level() => {
                    let payload = row.to_json();
                    warn!(table, key = %key, error = %e, payload = %payload, "Row rejected");
                    outcome.errors.push(RowError {
                        key,
                        message: e.to_string(),
                        payload,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(outcome)
    }

    /// Inserts one row unless its key exists. Returns whether it was inserted.
    async fn write_row(
        &self,
        table: &str,
        row: &CanonicalRow,
        primary_key: &str,
        key: &CanonicalValue,
    ) -> Result<bool> {
        if key.is_empty() {
            return Err(Error::row_write(
                table,
                format!("row has no value for primary key '{}'", primary_key),
            ));
        }
        if self.target.row_exists(table, primary_key, key).await? {
            return Ok(false);
        }
        self.target.insert_row(table, row).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::helpdesk;
    use crate::target::memory::MemoryTarget;

    fn account(id: &str) -> CanonicalRow {
        let mut row = CanonicalRow::new();
        row.push("id", CanonicalValue::Text(id.to_string()));
        row.push("email", CanonicalValue::Text(format!("{}@example.com", id)));
        row
    }

    #[tokio::test]
    async fn test_second_write_skips_existing_rows() {
        let target = MemoryTarget::from_registry(&helpdesk());
        let writer = TargetWriter::new(&target, ExistingRowPolicy::Skip);
        let rows = vec![account("a1"), account("a2")];

        let first = writer.write_batch("accounts", rows.clone(), "id").await.unwrap();
        let second = writer.write_batch("accounts", rows, "id").await.unwrap();

        assert_eq!(first.inserted, 2);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 2);
        assert!(second.errors.is_empty());
        assert_eq!(target.count_rows("accounts").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rejected_row_does_not_abort_batch() {
        let target = MemoryTarget::from_registry(&helpdesk());
        let writer = TargetWriter::new(&target, ExistingRowPolicy::Skip);

        let mut bad = CanonicalRow::new();
        bad.push("id", CanonicalValue::Text("t2".to_string()));
        bad.push("accountId", CanonicalValue::Text("missing".to_string()));

        let mut good = CanonicalRow::new();
        good.push("id", CanonicalValue::Text("t3".to_string()));

        let outcome = writer
            .write_batch("tickets", vec![bad, good], "id")
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].key, "t2");
        assert_eq!(outcome.errors[0].payload["accountId"], "missing");
    }

    #[tokio::test]
    async fn test_unknown_columns_are_projected_away() {
        let target = MemoryTarget::from_registry(&helpdesk());
        let writer = TargetWriter::new(&target, ExistingRowPolicy::Skip);

        let mut row = account("a1");
        row.push("legacyField", CanonicalValue::Integer(1));

        let outcome = writer.write_batch("accounts", vec![row], "id").await.unwrap();
        assert_eq!(outcome.inserted, 1);
        assert!(target.rows("accounts")[0].get("legacyField").is_none());
    }

    #[tokio::test]
    async fn test_missing_key_is_row_error() {
        let target = MemoryTarget::from_registry(&helpdesk());
        let writer = TargetWriter::new(&target, ExistingRowPolicy::Skip);

        let mut row = CanonicalRow::new();
        row.push("id", CanonicalValue::Null);

        let outcome = writer.write_batch("accounts", vec![row], "id").await.unwrap();
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_target_is_fatal() {
        let target = MemoryTarget::from_registry(&helpdesk());
        let writer = TargetWriter::new(&target, ExistingRowPolicy::Skip);
        writer.write_batch("accounts", vec![account("a1")], "id").await.unwrap();

        target.close().await.unwrap();
        let err = writer
            .write_batch("accounts", vec![account("a2")], "id")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TargetConnection(_)));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("skip".parse::<ExistingRowPolicy>().unwrap(), ExistingRowPolicy::Skip);
        assert_eq!("REPORT".parse::<ExistingRowPolicy>().unwrap(), ExistingRowPolicy::Report);
        assert!("overwrite".parse::<ExistingRowPolicy>().is_err());
    }
}
