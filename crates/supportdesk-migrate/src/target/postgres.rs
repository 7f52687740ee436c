//! PostgreSQL target store.
//!
//! Holds a single pooled connection for the whole run so session settings
//! (`session_replication_role`) apply to every statement. Values are bound
//! as text and cast to the column's declared type, so the same canonical
//! row can feed `BIGINT`, `TIMESTAMP` or `TEXT` columns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use super::{ForeignKeyCheck, TargetStore};
use crate::error::{Error, Result};
use crate::registry::ddl::quote_ident;
use crate::transform::{CanonicalRow, CanonicalValue};

/// Connection acquire timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for a PostgreSQL target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Server host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login role.
    pub user: String,
    /// Password.
    #[serde(default)]
    pub password: String,
    /// Database name.
    pub database: String,
    /// Schema holding the migrated tables.
    #[serde(default = "default_schema")]
    pub schema: String,
}

pub(crate) fn default_host() -> String {
    "localhost".to_string()
}

pub(crate) fn default_port() -> u16 {
    5432
}

pub(crate) fn default_schema() -> String {
    "public".to_string()
}

/// PostgreSQL target.
pub struct PostgresTarget {
    pool: PgPool,
    schema: String,
    /// `column -> udt_name` per table, loaded on first insert.
    column_types: Mutex<HashMap<String, HashMap<String, String>>>,
}

/// Classifies a driver error: statement failures concern one row, anything
/// else means the connection is unusable.
fn classify(table: &str, error: sqlx::Error) -> Error {
    match error {
        sqlx::Error::Database(db) => Error::row_write(table, db.message().to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::TypeNotFound { .. } => {
            Error::row_write(table, error.to_string())
        }
        other => Error::TargetConnection(other.to_string()),
    }
}

/// Errors outside a row write are all fatal.
fn connection_error(context: &str, error: sqlx::Error) -> Error {
    Error::TargetConnection(format!("{}: {}", context, error))
}

impl PostgresTarget {
    /// Connects and verifies the connection with `SELECT 1`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TargetConnection`] when the server cannot be reached.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| connection_error("connecting to PostgreSQL target", e))?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| connection_error("testing PostgreSQL target connection", e))?;

        info!(
            "Connected to PostgreSQL target: {}:{}/{} (schema {})",
            config.host, config.port, config.database, config.schema
        );

        Ok(Self {
            pool,
            schema: config.schema.clone(),
            column_types: Mutex::new(HashMap::new()),
        })
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table))
    }

    async fn load_column_types(&self, table: &str) -> Result<HashMap<String, String>> {
        if let Some(cached) = self
            .column_types
            .lock()
            .ok()
            .and_then(|types| types.get(table).cloned())
        {
            return Ok(cached);
        }

        let rows = sqlx::query(
            "SELECT column_name::text AS name, udt_name::text AS udt \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2",
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| connection_error("loading column types", e))?;

        let types: HashMap<String, String> = rows
            .iter()
            .map(|row| (row.get::<String, _>("name"), row.get::<String, _>("udt")))
            .collect();

        if let Ok(mut cache) = self.column_types.lock() {
            cache.insert(table.to_string(), types.clone());
        }
        Ok(types)
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| connection_error("counting rows", e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

/// Placeholder with a cast to the column type, e.g. `$3::int8`.
fn placeholder(index: usize, udt: Option<&String>) -> String {
    match udt {
        Some(udt) => format!("${}::{}", index, quote_ident(udt)),
        None => format!("${}", index),
    }
}

/// Key lookup casting the parameter to the key column's type, so the
/// primary-key index stays usable.
fn exists_sql(qualified_table: &str, key_column: &str, udt: Option<&String>) -> String {
    format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = {})",
        qualified_table,
        quote_ident(key_column),
        placeholder(1, udt)
    )
}

#[async_trait]
impl TargetStore for PostgresTarget {
    fn target_type(&self) -> &'static str {
        "postgres"
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name",
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| connection_error("listing tables", e))
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| connection_error("listing columns", e))
    }

    async fn row_exists(&self, table: &str, key_column: &str, key: &CanonicalValue) -> Result<bool> {
        let Some(key) = key.as_sql_text() else {
            return Ok(false);
        };
        let types = self.load_column_types(table).await?;
        let sql = exists_sql(&self.qualified(table), key_column, types.get(key_column));
        sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(table, e))
    }

    async fn insert_row(&self, table: &str, row: &CanonicalRow) -> Result<()> {
        let types = self.load_column_types(table).await?;

        let columns: Vec<String> = row.column_names().map(quote_ident).collect();
        let placeholders: Vec<String> = row
            .column_names()
            .enumerate()
            .map(|(i, name)| placeholder(i + 1, types.get(name)))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified(table),
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for (_, value) in row.iter() {
            query = query.bind(value.as_sql_text());
        }

        query
            .execute(&self.pool)
            .await
            .map_err(|e| classify(table, e))?;
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        self.count(&format!("SELECT COUNT(*) FROM {}", self.qualified(table)))
            .await
    }

    async fn count_missing(&self, table: &str, column: &str) -> Result<u64> {
        let column = quote_ident(column);
        self.count(&format!(
            "SELECT COUNT(*) FROM {} WHERE {} IS NULL OR {}::text = ''",
            self.qualified(table),
            column,
            column
        ))
        .await
    }

    async fn count_orphans(&self, check: &ForeignKeyCheck) -> Result<u64> {
        let fk = quote_ident(&check.column);
        self.count(&format!(
            "SELECT COUNT(*) FROM {} c LEFT JOIN {} p ON c.{}::text = p.{}::text \
             WHERE c.{} IS NOT NULL AND p.{} IS NULL",
            self.qualified(&check.table),
            self.qualified(&check.referenced_table),
            fk,
            quote_ident(&check.referenced_column),
            fk,
            quote_ident(&check.referenced_column)
        ))
        .await
    }

    async fn scan_column(
        &self,
        table: &str,
        column: &str,
        order_column: &str,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<String>> {
        let column = quote_ident(column);
        let sql = format!(
            "SELECT {}::text FROM {} WHERE {} IS NOT NULL ORDER BY {} LIMIT $1 OFFSET $2",
            column,
            self.qualified(table),
            column,
            quote_ident(order_column)
        );
        sqlx::query_scalar(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| connection_error("scanning column", e))
    }

    async fn disable_referential_checks(&self) -> Result<()> {
        sqlx::query("SET session_replication_role = replica")
            .execute(&self.pool)
            .await
            .map_err(|e| connection_error("suspending referential checks", e))?;
        debug!("Referential checks suspended");
        Ok(())
    }

    async fn enable_referential_checks(&self) -> Result<()> {
        sqlx::query("SET session_replication_role = DEFAULT")
            .execute(&self.pool)
            .await
            .map_err(|e| connection_error("restoring referential checks", e))?;
        debug!("Referential checks restored");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
