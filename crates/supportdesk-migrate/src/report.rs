//! Migration report.

use chrono::{DateTime, Utc};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Maximum number of row-error messages kept per entity type.
pub const MAX_ERROR_SAMPLES: usize = 10;

/// How an entity type's migration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Every page was processed.
    Completed,
    /// A fatal error stopped the migration of this type.
    Aborted,
    /// The run was stopped while this type was still migrating.
    Interrupted,
}

/// Per-entity statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityReport {
    /// Entity type name.
    pub name: String,
    /// Target table.
    pub target_table: String,
    /// Source record count (last hint from the source).
    pub total: u64,
    /// Rows inserted, plus already-present rows under the `skip` policy.
    pub migrated: u64,
    /// Rows that failed to transform or write.
    pub errors: u64,
    /// Rows found already present under the `report` policy.
    pub already_present: u64,
    /// Enum values replaced by their fallback.
    pub fallbacks: u64,
    /// Outcome.
    pub status: EntityStatus,
    /// First few row-error messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_samples: Vec<String>,
}

impl EntityReport {
    /// Records handled: migrated, already present or failed.
    #[must_use]
    pub const fn attempted(&self) -> u64 {
        self.migrated + self.already_present + self.errors
    }
}

/// Result of one migration run, entity types in migration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique run id.
    pub run_id: Uuid,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end.
    pub completed_at: DateTime<Utc>,
    /// Wall-clock duration.
    pub duration_seconds: f64,
    /// Per-entity statistics.
    pub entities: Vec<EntityReport>,
}

impl MigrationReport {
    /// Report of a run that migrated nothing.
    #[must_use]
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            entities: Vec::new(),
        }
    }

    /// Statistics of one entity type.
    pub fn get(&self, name: &str) -> Option<&EntityReport> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Row errors across all entity types.
    #[must_use]
    pub fn total_errors(&self) -> u64 {
        self.entities.iter().map(|e| e.errors).sum()
    }

    /// Rows migrated across all entity types.
    #[must_use]
    pub fn total_migrated(&self) -> u64 {
        self.entities.iter().map(|e| e.migrated).sum()
    }

    /// True when every entity type completed without row errors.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.entities
            .iter()
            .all(|e| e.status == EntityStatus::Completed && e.errors == 0)
    }

    /// Pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Per-table summary with the final verdict.
    #[must_use]
    pub fn render_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        table.set_header(
            [
                "Entity", "Table", "Source", "Attempted", "Migrated", "Present", "Failed",
                "Fallbacks", "Status",
            ]
            .into_iter()
            .map(|h| Cell::new(h).fg(Color::Cyan)),
        );

        for entity in &self.entities {
            let (status, color) = match entity.status {
                EntityStatus::Completed if entity.errors == 0 => ("ok", Color::Green),
                EntityStatus::Completed => ("errors", Color::Yellow),
                EntityStatus::Aborted => ("aborted", Color::Red),
                EntityStatus::Interrupted => ("interrupted", Color::Red),
            };
            table.add_row(vec![
                Cell::new(&entity.name),
                Cell::new(&entity.target_table),
                Cell::new(entity.total),
                Cell::new(entity.attempted()),
                Cell::new(entity.migrated),
                Cell::new(entity.already_present),
                Cell::new(entity.errors),
                Cell::new(entity.fallbacks),
                Cell::new(status).fg(color),
            ]);
        }

        let verdict = if self.is_success() { "PASS" } else { "FAIL" };
        format!(
            "{table}\n{} rows migrated, {} failed in {:.2}s: {}",
            self.total_migrated(),
            self.total_errors(),
            self.duration_seconds,
            verdict
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, migrated: u64, errors: u64, status: EntityStatus) -> EntityReport {
        EntityReport {
            name: name.to_string(),
            target_table: name.to_string(),
            total: migrated + errors,
            migrated,
            errors,
            already_present: 0,
            fallbacks: 0,
            status,
            error_samples: Vec::new(),
        }
    }

    #[test]
    fn test_success_requires_no_errors() {
        let mut report = MigrationReport::empty();
        report.entities.push(entity("accounts", 3, 0, EntityStatus::Completed));
        assert!(report.is_success());

        report.entities.push(entity("tickets", 99, 1, EntityStatus::Completed));
        assert!(!report.is_success());
        assert_eq!(report.total_errors(), 1);
        assert_eq!(report.total_migrated(), 102);
    }

    #[test]
    fn test_aborted_is_failure() {
        let mut report = MigrationReport::empty();
        report.entities.push(entity("accounts", 0, 0, EntityStatus::Aborted));
        assert!(!report.is_success());
        assert!(report.render_table().ends_with("FAIL"));
    }

    #[test]
    fn test_interrupted_is_failure() {
        let mut report = MigrationReport::empty();
        report.entities.push(entity("accounts", 3, 0, EntityStatus::Completed));
        report.entities.push(entity("tickets", 4, 0, EntityStatus::Interrupted));

        assert!(!report.is_success());
        let rendered = report.render_table();
        assert!(rendered.contains("interrupted"));
        assert!(rendered.ends_with("FAIL"));
        assert!(report.to_json().unwrap().contains("\"status\": \"interrupted\""));
    }

    #[test]
    fn test_render_table_lists_entities() {
        let mut report = MigrationReport::empty();
        report.entities.push(entity("accounts", 3, 0, EntityStatus::Completed));
        report.entities.push(entity("tickets", 5, 0, EntityStatus::Completed));

        let rendered = report.render_table();
        assert!(rendered.contains("accounts"));
        assert!(rendered.contains("tickets"));
        assert!(rendered.ends_with("PASS"));
    }

    #[test]
    fn test_json_round_trip() {
        let mut report = MigrationReport::empty();
        report.entities.push(entity("accounts", 3, 0, EntityStatus::Completed));

        let json = report.to_json().unwrap();
        assert!(json.contains("\"status\": \"completed\""));
        let parsed: MigrationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.get("accounts").unwrap().migrated, 3);
    }
}
