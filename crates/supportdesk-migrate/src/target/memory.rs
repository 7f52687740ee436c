//! In-memory target store.
//!
//! Mirrors the relational schema of a registry: tables with declared
//! columns and types, a primary key and foreign keys that are enforced
//! unless referential checks are suspended. Used for `--dry-run` and tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{ForeignKeyCheck, TargetStore};
use crate::error::{Error, Result};
use crate::registry::{find, ColumnKind, EntityTypeSpec};
use crate::transform::{parse_datetime, CanonicalRow, CanonicalValue};

#[derive(Debug, Clone)]
struct MemoryColumn {
    name: String,
    kind: ColumnKind,
}

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<MemoryColumn>,
    primary_key: String,
    foreign_keys: Vec<ForeignKeyCheck>,
    /// Rows keyed by primary-key text, so scans are ordered by key.
    rows: BTreeMap<String, CanonicalRow>,
}

impl MemoryTable {
    fn column(&self, name: &str) -> Option<&MemoryColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn contains(&self, column: &str, value: &str) -> bool {
        if column == self.primary_key {
            return self.rows.contains_key(value);
        }
        self.rows.values().any(|row| {
            row.get(column)
                .and_then(CanonicalValue::as_sql_text)
                .is_some_and(|v| v == value)
        })
    }
}

/// In-memory relational store.
#[derive(Debug)]
pub struct MemoryTarget {
    tables: Mutex<HashMap<String, MemoryTable>>,
    checks_enabled: AtomicBool,
    closed: AtomicBool,
}

impl Default for MemoryTarget {
    fn default() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            checks_enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }
}

impl MemoryTarget {
    /// Creates a store without tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding one empty table per entity type.
    #[must_use]
    pub fn from_registry(specs: &[EntityTypeSpec]) -> Self {
        let target = Self::new();
        for spec in specs {
            target.create_table(spec, specs);
        }
        target
    }

    /// Creates (or replaces) the table of an entity type.
    pub fn create_table(&self, spec: &EntityTypeSpec, specs: &[EntityTypeSpec]) {
        let table = MemoryTable {
            columns: spec
                .columns
                .iter()
                .map(|c| MemoryColumn {
                    name: c.column_name().to_string(),
                    kind: c.kind.clone(),
                })
                .collect(),
            primary_key: spec.primary_key.clone(),
            foreign_keys: ForeignKeyCheck::for_spec(spec, specs)
                .into_iter()
                .filter(|fk| find(specs, &fk_entity(spec, &fk.column)).is_some())
                .collect(),
            rows: BTreeMap::new(),
        };
        if let Ok(mut tables) = self.tables.lock() {
            tables.insert(spec.target_table.clone(), table);
        }
    }

    /// Drops a table and its rows.
    pub fn drop_table(&self, table: &str) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.remove(table);
        }
    }

    /// Snapshot of a table's rows, ordered by primary key.
    pub fn rows(&self, table: &str) -> Vec<CanonicalRow> {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| tables.get(table).map(|t| t.rows.values().cloned().collect()))
            .unwrap_or_default()
    }

    /// Whether foreign keys are currently enforced.
    pub fn referential_checks_enabled(&self) -> bool {
        self.checks_enabled.load(Ordering::SeqCst)
    }

    /// Whether [`TargetStore::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, MemoryTable>>> {
        if self.is_closed() {
            return Err(Error::TargetConnection("connection is closed".to_string()));
        }
        self.tables
            .lock()
            .map_err(|_| Error::TargetConnection("in-memory store is poisoned".to_string()))
    }
}

/// Entity referenced by a foreign-key column of `spec`.
fn fk_entity(spec: &EntityTypeSpec, column: &str) -> String {
    spec.column(column)
        .and_then(|c| c.references.as_ref())
        .map(|r| r.entity.clone())
        .unwrap_or_default()
}

fn missing_relation(table: &str) -> Error {
    Error::row_write(table, format!("relation \"{}\" does not exist", table))
}

/// Mirrors the casts the SQL target applies to text parameters.
fn check_type(table: &str, column: &MemoryColumn, value: &CanonicalValue) -> Result<()> {
    let Some(text) = value.as_sql_text() else {
        return Ok(());
    };
    let accepted = match column.kind {
        ColumnKind::Integer => text.parse::<i64>().is_ok(),
        ColumnKind::Boolean => text.parse::<i16>().is_ok(),
        ColumnKind::Float => text.parse::<f64>().is_ok(),
        ColumnKind::Timestamp => parse_datetime(&text).is_some(),
        ColumnKind::Text | ColumnKind::Json | ColumnKind::Enum { .. } => true,
    };
    if accepted {
        Ok(())
    } else {
        Err(Error::row_write(
            table,
            format!("invalid input for column \"{}\": \"{}\"", column.name, text),
        ))
    }
}

#[async_trait]
impl TargetStore for MemoryTarget {
    fn target_type(&self) -> &'static str {
        "memory"
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.lock()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .get(table)
            .map(|t| t.columns.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default())
    }

    async fn row_exists(&self, table: &str, key_column: &str, key: &CanonicalValue) -> Result<bool> {
        let tables = self.lock()?;
        let t = tables.get(table).ok_or_else(|| missing_relation(table))?;
        Ok(key
            .as_sql_text()
            .is_some_and(|key| t.contains(key_column, &key)))
    }

    async fn insert_row(&self, table: &str, row: &CanonicalRow) -> Result<()> {
        let checks_enabled = self.referential_checks_enabled();
        let mut tables = self.lock()?;
        let t = tables.get(table).ok_or_else(|| missing_relation(table))?;

        for (name, value) in row.iter() {
            let column = t.column(name).ok_or_else(|| {
                Error::row_write(table, format!("column \"{}\" does not exist", name))
            })?;
            check_type(table, column, value)?;
        }

        let key = row
            .get(&t.primary_key)
            .and_then(CanonicalValue::as_sql_text)
            .ok_or_else(|| {
                Error::row_write(
                    table,
                    format!("null value in column \"{}\" violates not-null constraint", t.primary_key),
                )
            })?;
        if t.rows.contains_key(&key) {
            return Err(Error::row_write(
                table,
                format!("duplicate key value violates unique constraint: {}={}", t.primary_key, key),
            ));
        }

        if checks_enabled {
            for fk in &t.foreign_keys {
                let Some(value) = row.get(&fk.column).and_then(CanonicalValue::as_sql_text) else {
                    continue;
                };
                let parent_has = tables
                    .get(&fk.referenced_table)
                    .is_some_and(|parent| parent.contains(&fk.referenced_column, &value));
                if !parent_has {
                    return Err(Error::row_write(
                        table,
                        format!(
                            "insert violates foreign key: {}={} not present in {}",
                            fk.column, value, fk.referenced_table
                        ),
                    ));
                }
            }
        }

        if let Some(t) = tables.get_mut(table) {
            t.rows.insert(key, row.clone());
        }
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let tables = self.lock()?;
        let t = tables.get(table).ok_or_else(|| missing_relation(table))?;
        Ok(t.rows.len() as u64)
    }

    async fn count_missing(&self, table: &str, column: &str) -> Result<u64> {
        let tables = self.lock()?;
        let t = tables.get(table).ok_or_else(|| missing_relation(table))?;
        Ok(t.rows
            .values()
            .filter(|row| row.get(column).map_or(true, CanonicalValue::is_empty))
            .count() as u64)
    }

    async fn count_orphans(&self, check: &ForeignKeyCheck) -> Result<u64> {
        let tables = self.lock()?;
        let child = tables
            .get(&check.table)
            .ok_or_else(|| missing_relation(&check.table))?;
        let parent = tables.get(&check.referenced_table);

        Ok(child
            .rows
            .values()
            .filter_map(|row| row.get(&check.column).and_then(CanonicalValue::as_sql_text))
            .filter(|value| !parent.is_some_and(|p| p.contains(&check.referenced_column, value)))
            .count() as u64)
    }

    async fn scan_column(
        &self,
        table: &str,
        column: &str,
        order_column: &str,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<String>> {
        let tables = self.lock()?;
        let t = tables.get(table).ok_or_else(|| missing_relation(table))?;

        let mut rows: Vec<&CanonicalRow> = t.rows.values().collect();
        if order_column != t.primary_key {
            rows.sort_by_key(|row| row.get(order_column).and_then(CanonicalValue::as_sql_text));
        }

        Ok(rows
            .into_iter()
            .filter_map(|row| row.get(column).and_then(CanonicalValue::as_sql_text))
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit)
            .collect())
    }

    async fn disable_referential_checks(&self) -> Result<()> {
        self.lock()?;
        self.checks_enabled.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn enable_referential_checks(&self) -> Result<()> {
        self.lock()?;
        self.checks_enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
