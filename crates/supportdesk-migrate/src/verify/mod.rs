//! Post-migration integrity verification.
//!
//! Runs over the target (and optionally the source for count
//! reconciliation) after a migration. Every check is derived from the
//! registry: required columns, declared foreign keys and JSON columns.
//! Verification only reads; it is safe to repeat.

mod types;

pub use types::{VerificationFinding, VerificationReport, VerificationSummary};

use std::collections::HashSet;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::connectors::DocumentSource;
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::registry::{ColumnKind, EntityTypeSpec};
use crate::target::{ForeignKeyCheck, TargetStore};

/// Rows fetched per page when scanning JSON columns.
pub const DEFAULT_SCAN_PAGE: usize = 500;

/// Independent verification pass over a migrated target.
pub struct IntegrityVerifier<'a> {
    target: &'a dyn TargetStore,
    source: Option<&'a dyn DocumentSource>,
    specs: Vec<EntityTypeSpec>,
    scan_page: usize,
}

impl<'a> IntegrityVerifier<'a> {
    /// Creates a verifier for the given entity types.
    pub fn new(target: &'a dyn TargetStore, specs: &[EntityTypeSpec]) -> Self {
        Self {
            target,
            source: None,
            specs: specs.to_vec(),
            scan_page: DEFAULT_SCAN_PAGE,
        }
    }

    /// Attaches the source so record counts are reconciled.
    #[must_use]
    pub fn with_source(mut self, source: &'a dyn DocumentSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Page size for JSON column scans.
    #[must_use]
    pub fn with_scan_page(mut self, rows: usize) -> Self {
        self.scan_page = rows.max(1);
        self
    }

    /// Runs every check, entity types in dependency order.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be ordered or a store query
    /// fails. Data problems are findings, never errors.
    pub async fn verify(&self) -> Result<VerificationReport> {
        let graph = DependencyGraph::new(&self.specs)?;
        let tables: HashSet<String> = self.target.list_tables().await?.into_iter().collect();
        let mut findings = Vec::new();

        for spec in graph.order() {
            let span = info_span!("verify", entity = %spec.name);
            self.verify_entity(spec, &tables, &mut findings)
                .instrument(span)
                .await?;
        }

        let report = VerificationReport::new(findings);
        if report.is_clean() {
            info!("Verification passed");
        } else {
            warn!(findings = report.summary.total, "Verification found problems");
        }
        Ok(report)
    }

    async fn verify_entity(
        &self,
        spec: &EntityTypeSpec,
        tables: &HashSet<String>,
        findings: &mut Vec<VerificationFinding>,
    ) -> Result<()> {
        let table = &spec.target_table;
        if !tables.contains(table) {
            findings.push(VerificationFinding::MissingTable {
                table: table.clone(),
            });
            return Ok(());
        }

        if let Some(source) = self.source {
            let source_count = source.ping(&spec.source_collection).await?;
            let target_count = self.target.count_rows(table).await?;
            debug!(source_count, target_count, "Counts");
            if source_count != target_count {
                findings.push(VerificationFinding::CountMismatch {
                    entity_type: spec.name.clone(),
                    source_count,
                    target_count,
                });
            }
        }

        for column in spec.columns.iter().filter(|c| c.required) {
            let count = self.target.count_missing(table, column.column_name()).await?;
            if count > 0 {
                findings.push(VerificationFinding::MissingRequiredField {
                    table: table.clone(),
                    field: column.column_name().to_string(),
                    count,
                });
            }
        }

        for check in ForeignKeyCheck::for_spec(spec, &self.specs) {
            // A missing parent table is already its own finding.
            if !tables.contains(&check.referenced_table) {
                continue;
            }
            let count = self.target.count_orphans(&check).await?;
            if count > 0 {
                findings.push(VerificationFinding::OrphanedReference {
                    table: check.table,
                    field: check.column,
                    referenced_table: check.referenced_table,
                    count,
                });
            }
        }

        for column in spec.columns.iter().filter(|c| c.kind == ColumnKind::Json) {
            let count = self.count_invalid_json(spec, column.column_name()).await?;
            if count > 0 {
                findings.push(VerificationFinding::InvalidStructuredField {
                    table: table.clone(),
                    field: column.column_name().to_string(),
                    count,
                });
            }
        }

        Ok(())
    }

    async fn count_invalid_json(&self, spec: &EntityTypeSpec, column: &str) -> Result<u64> {
        let mut invalid = 0;
        let mut offset = 0u64;
        loop {
            let values = self
                .target
                .scan_column(&spec.target_table, column, &spec.primary_key, offset, self.scan_page)
                .await?;
            if values.is_empty() {
                break;
            }
            invalid += values
                .iter()
                .filter(|v| serde_json::from_str::<serde_json::Value>(v).is_err())
                .count() as u64;
            offset += values.len() as u64;
            if values.len() < self.scan_page {
                break;
            }
        }
        Ok(invalid)
    }
}
