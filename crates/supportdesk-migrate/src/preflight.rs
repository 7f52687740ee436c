//! Pre-flight checks.
//!
//! Probes both stores before any data moves: every source collection must
//! answer a count query and every target table must exist. Declared columns
//! missing from a table are reported but do not block the run (their values
//! are dropped by schema projection).

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, Table};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::connectors::{CollectionProbe, DocumentSource};
use crate::error::Result;
use crate::registry::EntityTypeSpec;
use crate::target::TargetStore;

/// A declared column absent from its target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingColumn {
    /// Target table.
    pub table: String,
    /// Declared column.
    pub column: String,
}

/// Outcome of the pre-flight checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreflightReport {
    /// Source collection sizes, in migration order.
    pub collections: Vec<CollectionProbe>,
    /// Target tables that do not exist.
    pub missing_tables: Vec<String>,
    /// Declared columns that do not exist.
    pub missing_columns: Vec<MissingColumn>,
}

impl PreflightReport {
    /// True when every target table exists.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.missing_tables.is_empty()
    }

    /// Source records across all collections.
    #[must_use]
    pub fn total_records(&self) -> u64 {
        self.collections.iter().map(|c| c.count).sum()
    }

    /// Human-readable summary.
    #[must_use]
    pub fn render_table(&self) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec![
            Cell::new("Collection").fg(Color::Cyan),
            Cell::new("Records").fg(Color::Cyan),
        ]);
        for probe in &self.collections {
            table.add_row(vec![Cell::new(&probe.collection), Cell::new(probe.count)]);
        }

        let mut out = table.to_string();
        for missing in &self.missing_tables {
            out.push_str(&format!("\nmissing table: {}", missing));
        }
        for missing in &self.missing_columns {
            out.push_str(&format!("\nmissing column: {}.{}", missing.table, missing.column));
        }
        out.push_str(if self.is_ready() {
            "\nready"
        } else {
            "\nnot ready: create the missing tables first (see `supportdesk-migrate schema`)"
        });
        out
    }
}

/// Probes the source and the target for every entity type.
///
/// # Errors
///
/// Any store failure is returned as-is: an unreachable store is fatal
/// before the run begins.
pub async fn check(
    source: &dyn DocumentSource,
    target: &dyn TargetStore,
    specs: &[EntityTypeSpec],
) -> Result<PreflightReport> {
    let mut report = PreflightReport::default();

    for spec in specs {
        let count = source.ping(&spec.source_collection).await?;
        info!(collection = %spec.source_collection, count, "Source collection reachable");
        report.collections.push(CollectionProbe {
            collection: spec.source_collection.clone(),
            count,
        });
    }

    let tables: HashSet<String> = target.list_tables().await?.into_iter().collect();
    for spec in specs {
        if !tables.contains(&spec.target_table) {
            warn!(table = %spec.target_table, "Target table missing");
            report.missing_tables.push(spec.target_table.clone());
            continue;
        }

        let columns: HashSet<String> = target
            .list_columns(&spec.target_table)
            .await?
            .into_iter()
            .collect();
        for column in &spec.columns {
            if !columns.contains(column.column_name()) {
                warn!(table = %spec.target_table, column = column.column_name(), "Target column missing");
                report.missing_columns.push(MissingColumn {
                    table: spec.target_table.clone(),
                    column: column.column_name().to_string(),
                });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::json_dump::JsonDumpSource;
    use crate::registry::{find, helpdesk};
    use crate::target::memory::MemoryTarget;
    use serde_json::json;
    use std::collections::HashMap;

    fn source() -> JsonDumpSource {
        JsonDumpSource::from_collections(HashMap::from([(
            "users".to_string(),
            vec![json!({"_id": "a1"}), json!({"_id": "a2"})],
        )]))
    }

    #[tokio::test]
    async fn test_ready_when_all_tables_exist() {
        let specs = helpdesk();
        let target = MemoryTarget::from_registry(&specs);

        let report = check(&source(), &target, &specs).await.unwrap();

        assert!(report.is_ready());
        assert_eq!(report.collections.len(), 6);
        assert_eq!(report.collections[0].count, 2);
        assert_eq!(report.total_records(), 2);
        assert!(report.missing_columns.is_empty());
    }

    #[tokio::test]
    async fn test_missing_table_blocks() {
        let specs = helpdesk();
        let target = MemoryTarget::from_registry(&specs);
        target.drop_table("comments");

        let report = check(&source(), &target, &specs).await.unwrap();

        assert!(!report.is_ready());
        assert_eq!(report.missing_tables, vec!["comments".to_string()]);
        assert!(report.render_table().contains("missing table: comments"));
    }

    #[tokio::test]
    async fn test_missing_column_is_reported_only() {
        let specs = helpdesk();
        let target = MemoryTarget::from_registry(&specs);
        let mut narrower = find(&specs, "accounts").unwrap().clone();
        narrower.columns.retain(|c| c.column_name() != "profile");
        target.create_table(&narrower, &specs);

        let report = check(&source(), &target, &specs).await.unwrap();

        assert!(report.is_ready());
        assert_eq!(
            report.missing_columns,
            vec![MissingColumn {
                table: "accounts".to_string(),
                column: "profile".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_closed_target_is_fatal() {
        let specs = helpdesk();
        let target = MemoryTarget::from_registry(&specs);
        target.close().await.unwrap();

        assert!(check(&source(), &target, &specs).await.is_err());
    }
}
