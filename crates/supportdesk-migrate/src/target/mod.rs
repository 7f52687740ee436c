//! Target relational stores.
//!
//! [`TargetStore`] is the seam between the pipeline and the relational
//! database. It exposes the handful of operations the writer, the pre-flight
//! checker and the verifier need instead of a raw statement executor, so the
//! in-memory store used for dry runs and tests behaves like the real one.
//!
//! Error contract: a failure that only concerns the row being written
//! (constraint or type violation) is returned as [`Error::RowWrite`]; a
//! failure of the connection itself is [`Error::TargetConnection`] and is
//! fatal for the run.
//!
//! [`Error::RowWrite`]: crate::error::Error::RowWrite
//! [`Error::TargetConnection`]: crate::error::Error::TargetConnection

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::TargetConfig;
use crate::error::Result;
use crate::registry::{find, EntityTypeSpec};
use crate::transform::{CanonicalRow, CanonicalValue};

/// A foreign key to check for orphans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyCheck {
    /// Child table.
    pub table: String,
    /// Foreign-key column in the child table.
    pub column: String,
    /// Parent table.
    pub referenced_table: String,
    /// Referenced column in the parent table.
    pub referenced_column: String,
}

impl ForeignKeyCheck {
    /// Foreign keys declared by `spec`, resolved to target table names.
    pub fn for_spec(spec: &EntityTypeSpec, specs: &[EntityTypeSpec]) -> Vec<Self> {
        spec.columns
            .iter()
            .filter_map(|column| {
                let reference = column.references.as_ref()?;
                let referenced_table = find(specs, &reference.entity)
                    .map_or_else(|| reference.entity.clone(), |s| s.target_table.clone());
                Some(Self {
                    table: spec.target_table.clone(),
                    column: column.column_name().to_string(),
                    referenced_table,
                    referenced_column: reference.column.clone(),
                })
            })
            .collect()
    }
}

/// Relational store receiving migrated rows.
///
/// Implementations hold exactly one connection for the duration of a run.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Get the target type name.
    fn target_type(&self) -> &'static str;

    /// Tables present in the target schema.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Columns of a table, in ordinal order. Empty when the table is absent.
    async fn list_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Whether a row with the given primary-key value exists.
    async fn row_exists(&self, table: &str, key_column: &str, key: &CanonicalValue) -> Result<bool>;

    /// Inserts one row.
    async fn insert_row(&self, table: &str, row: &CanonicalRow) -> Result<()>;

    /// Number of rows in a table.
    async fn count_rows(&self, table: &str) -> Result<u64>;

    /// Number of rows whose column is NULL or the empty string.
    async fn count_missing(&self, table: &str, column: &str) -> Result<u64>;

    /// Number of rows whose foreign key is non-null but matches no parent.
    async fn count_orphans(&self, check: &ForeignKeyCheck) -> Result<u64>;

    /// Non-null values of `column`, ordered by `order_column`, one page at a
    /// time.
    async fn scan_column(
        &self,
        table: &str,
        column: &str,
        order_column: &str,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// Suspends foreign-key enforcement for this connection.
    async fn disable_referential_checks(&self) -> Result<()>;

    /// Restores foreign-key enforcement for this connection.
    async fn enable_referential_checks(&self) -> Result<()>;

    /// Closes the connection. Later calls fail with a connection error.
    async fn close(&self) -> Result<()>;
}

/// Connect to the target described by configuration.
///
/// The in-memory target is created with every registry table present.
///
/// # Errors
///
/// Returns [`Error::TargetConnection`] when the server cannot be reached.
///
/// [`Error::TargetConnection`]: crate::error::Error::TargetConnection
pub async fn create_target(
    config: &TargetConfig,
    specs: &[EntityTypeSpec],
) -> Result<Box<dyn TargetStore>> {
    match config {
        #[cfg(feature = "postgres")]
        TargetConfig::Postgres(cfg) => Ok(Box::new(postgres::PostgresTarget::connect(cfg).await?)),
        TargetConfig::Memory => Ok(Box::new(memory::MemoryTarget::from_registry(specs))),
    }
}
