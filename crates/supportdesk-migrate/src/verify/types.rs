//! Verification findings and report.

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// A structured, non-fatal observation about the migrated data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationFinding {
    /// Source and target disagree on the number of records.
    CountMismatch {
        /// Entity type.
        entity_type: String,
        /// Records in the source collection.
        source_count: u64,
        /// Rows in the target table.
        target_count: u64,
    },
    /// Rows with a null or empty required field.
    MissingRequiredField {
        /// Target table.
        table: String,
        /// Required column.
        field: String,
        /// Offending rows.
        count: u64,
    },
    /// Rows whose foreign key matches no parent row.
    OrphanedReference {
        /// Child table.
        table: String,
        /// Foreign-key column.
        field: String,
        /// Parent table.
        referenced_table: String,
        /// Orphaned rows.
        count: u64,
    },
    /// Rows whose JSON column does not parse.
    InvalidStructuredField {
        /// Target table.
        table: String,
        /// JSON column.
        field: String,
        /// Offending rows.
        count: u64,
    },
    /// A registered table is absent from the target.
    MissingTable {
        /// Target table.
        table: String,
    },
}

impl VerificationFinding {
    /// Short kind label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CountMismatch { .. } => "count_mismatch",
            Self::MissingRequiredField { .. } => "missing_required_field",
            Self::OrphanedReference { .. } => "orphaned_reference",
            Self::InvalidStructuredField { .. } => "invalid_structured_field",
            Self::MissingTable { .. } => "missing_table",
        }
    }
}

impl fmt::Display for VerificationFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountMismatch {
                entity_type,
                source_count,
                target_count,
            } => write!(
                f,
                "{}: source has {} records, target has {} rows",
                entity_type, source_count, target_count
            ),
            Self::MissingRequiredField {
                table,
                field,
                count,
            } => write!(f, "{}.{}: {} rows with no value", table, field, count),
            Self::OrphanedReference {
                table,
                field,
                referenced_table,
                count,
            } => write!(
                f,
                "{}.{}: {} rows reference missing {} rows",
                table, field, count, referenced_table
            ),
            Self::InvalidStructuredField {
                table,
                field,
                count,
            } => write!(f, "{}.{}: {} rows hold invalid JSON", table, field, count),
            Self::MissingTable { table } => write!(f, "{}: table does not exist", table),
        }
    }
}

/// Finding counts by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSummary {
    /// All findings.
    pub total: usize,
    /// `CountMismatch` findings.
    pub count_mismatches: usize,
    /// `MissingRequiredField` findings.
    pub missing_required_fields: usize,
    /// `OrphanedReference` findings.
    pub orphaned_references: usize,
    /// `InvalidStructuredField` findings.
    pub invalid_structured_fields: usize,
    /// `MissingTable` findings.
    pub missing_tables: usize,
}

impl VerificationSummary {
    fn from_findings(findings: &[VerificationFinding]) -> Self {
        let mut summary = Self {
            total: findings.len(),
            ..Self::default()
        };
        for finding in findings {
            let slot = match finding {
                VerificationFinding::CountMismatch { .. } => &mut summary.count_mismatches,
                VerificationFinding::MissingRequiredField { .. } => {
                    &mut summary.missing_required_fields
                }
                VerificationFinding::OrphanedReference { .. } => &mut summary.orphaned_references,
                VerificationFinding::InvalidStructuredField { .. } => {
                    &mut summary.invalid_structured_fields
                }
                VerificationFinding::MissingTable { .. } => &mut summary.missing_tables,
            };
            *slot += 1;
        }
        summary
    }
}

/// Ordered findings; empty means the migration verified clean.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Findings in check order.
    pub findings: Vec<VerificationFinding>,
    /// Counts by kind.
    pub summary: VerificationSummary,
}

impl VerificationReport {
    /// Builds a report from findings.
    #[must_use]
    pub fn new(findings: Vec<VerificationFinding>) -> Self {
        let summary = VerificationSummary::from_findings(&findings);
        Self { findings, summary }
    }

    /// True when there are no findings.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable findings table.
    #[must_use]
    pub fn render_table(&self) -> String {
        if self.is_clean() {
            return "Verification passed: no findings".to_string();
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("Finding").fg(Color::Cyan),
            Cell::new("Detail").fg(Color::Cyan),
        ]);
        for finding in &self.findings {
            table.add_row(vec![
                Cell::new(finding.kind()).fg(Color::Yellow),
                Cell::new(finding.to_string()),
            ]);
        }
        format!("{table}\nVerification failed: {} findings", self.summary.total)
    }
}
