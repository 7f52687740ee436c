//! Entity type declarations.
//!
//! Every kind of record that moves from the document store into the
//! relational store is described once by an [`EntityTypeSpec`]: where it is
//! read from, where it is written to, which columns it projects onto and how
//! each value is coerced. Specs are plain data so the same registry drives
//! transformation, dependency ordering, DDL generation and verification.

pub mod ddl;
mod helpdesk;

pub use helpdesk::helpdesk;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result};

/// Declaration of one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeSpec {
    /// Logical name (e.g. `tickets`).
    pub name: String,
    /// Collection in the document store.
    pub source_collection: String,
    /// Table in the relational store.
    pub target_table: String,
    /// Target column holding the primary key.
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Source field used to order pages (stable creation timestamp).
    #[serde(default = "default_order_by")]
    pub order_by: String,
    /// Entity types that must be migrated before this one.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Projected columns.
    pub columns: Vec<ColumnSpec>,
}

/// One projected column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Source field; dotted paths address nested objects.
    pub source: String,
    /// Target column; defaults to the source field name.
    #[serde(default)]
    pub column: Option<String>,
    /// Coercion applied to the value.
    #[serde(default)]
    pub kind: ColumnKind,
    /// Whether a null or empty value is a verification finding.
    #[serde(default)]
    pub required: bool,
    /// Foreign key into another entity type.
    #[serde(default)]
    pub references: Option<Reference>,
}

/// Coercion rule for a column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnKind {
    /// Free text (timestamp-shaped strings are still canonicalized).
    #[default]
    Text,
    /// 64-bit integer.
    Integer,
    /// Double precision number.
    Float,
    /// Stored as `1` / `0`.
    Boolean,
    /// Stored as `YYYY-MM-DD HH:MM:SS` UTC.
    Timestamp,
    /// Nested structure stored as a JSON string.
    Json,
    /// Constrained domain with a fallback for unknown values.
    Enum {
        /// Accepted values.
        values: Vec<String>,
        /// Value substituted for anything outside `values`.
        fallback: String,
    },
}

/// Foreign-key declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// Referenced entity type name.
    pub entity: String,
    /// Referenced target column.
    #[serde(default = "default_primary_key")]
    pub column: String,
}

fn default_primary_key() -> String {
    "id".to_string()
}

fn default_order_by() -> String {
    "createdAt".to_string()
}

impl ColumnSpec {
    /// Creates a column whose target name equals its source field.
    pub fn new(source: &str, kind: ColumnKind) -> Self {
        Self {
            source: source.to_string(),
            column: None,
            kind,
            required: false,
            references: None,
        }
    }

    /// Renames the target column.
    #[must_use]
    pub fn named(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    /// Marks the column as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Declares a foreign key to `entity.column`.
    #[must_use]
    pub fn references(mut self, entity: &str, column: &str) -> Self {
        self.references = Some(Reference {
            entity: entity.to_string(),
            column: column.to_string(),
        });
        self
    }

    /// Target column name.
    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.source)
    }
}

impl ColumnKind {
    /// Builds an enum kind from string slices.
    pub fn enumeration(values: &[&str], fallback: &str) -> Self {
        Self::Enum {
            values: values.iter().map(|v| (*v).to_string()).collect(),
            fallback: fallback.to_string(),
        }
    }
}

impl EntityTypeSpec {
    /// Looks up a column by its target name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.column_name() == name)
    }

    /// The column holding the primary key.
    pub fn primary_key_column(&self) -> Option<&ColumnSpec> {
        self.column(&self.primary_key)
    }

    /// Declared dependencies plus every referenced entity except itself,
    /// in first-mention order.
    pub fn effective_dependencies(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let referenced = self
            .columns
            .iter()
            .filter_map(|c| c.references.as_ref())
            .map(|r| r.entity.clone());

        self.dependencies
            .iter()
            .cloned()
            .chain(referenced)
            .filter(|dep| dep != &self.name)
            .filter(|dep| seen.insert(dep.clone()))
            .collect()
    }

    /// Checks the declaration is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for empty names, duplicate columns, a missing
    /// primary-key column or an enum fallback outside its own domain.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.source_collection.is_empty() || self.target_table.is_empty()
        {
            return Err(Error::Config(format!(
                "entity '{}' needs a name, source_collection and target_table",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for column in &self.columns {
            if !names.insert(column.column_name()) {
                return Err(Error::Config(format!(
                    "entity '{}' declares column '{}' twice",
                    self.name,
                    column.column_name()
                )));
            }
            if let ColumnKind::Enum { values, fallback } = &column.kind {
                if !values.contains(fallback) {
                    return Err(Error::Config(format!(
                        "entity '{}' column '{}': fallback '{}' is not one of {:?}",
                        self.name,
                        column.column_name(),
                        fallback,
                        values
                    )));
                }
            }
        }

        if self.primary_key_column().is_none() {
            return Err(Error::Config(format!(
                "entity '{}' has no column for primary key '{}'",
                self.name, self.primary_key
            )));
        }

        Ok(())
    }
}

/// Finds a spec by entity name.
pub fn find<'a>(specs: &'a [EntityTypeSpec], name: &str) -> Option<&'a EntityTypeSpec> {
    specs.iter().find(|s| s.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EntityTypeSpec {
        EntityTypeSpec {
            name: "comments".to_string(),
            source_collection: "comments".to_string(),
            target_table: "comments".to_string(),
            primary_key: "id".to_string(),
            order_by: "createdAt".to_string(),
            dependencies: vec!["tickets".to_string()],
            columns: vec![
                ColumnSpec::new("_id", ColumnKind::Text).named("id"),
                ColumnSpec::new("ticketId", ColumnKind::Text).references("tickets", "id"),
                ColumnSpec::new("authorId", ColumnKind::Text).references("accounts", "id"),
                ColumnSpec::new("parentId", ColumnKind::Text).references("comments", "id"),
            ],
        }
    }

    #[test]
    fn test_effective_dependencies_skip_self_and_duplicates() {
        let deps = sample().effective_dependencies();
        assert_eq!(deps, vec!["tickets".to_string(), "accounts".to_string()]);
    }

    #[test]
    fn test_column_name_defaults_to_source() {
        let col = ColumnSpec::new("subject", ColumnKind::Text);
        assert_eq!(col.column_name(), "subject");
        assert_eq!(col.named("title").column_name(), "title");
    }

    #[test]
    fn test_validate_requires_primary_key_column() {
        let mut spec = sample();
        spec.primary_key = "missing".to_string();
        assert!(matches!(spec.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_fallback_outside_domain() {
        let mut spec = sample();
        spec.columns.push(ColumnSpec::new(
            "status",
            ColumnKind::enumeration(&["open", "closed"], "unknown"),
        ));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_spec_yaml_parse() {
        let yaml = r#"
name: accounts
source_collection: users
target_table: accounts
columns:
  - source: _id
    column: id
  - source: isActive
    kind:
      type: boolean
  - source: role
    kind:
      type: enum
      values: [admin, agent]
      fallback: agent
"#;
        let spec: EntityTypeSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.primary_key, "id");
        assert_eq!(spec.order_by, "createdAt");
        assert_eq!(spec.columns[1].kind, ColumnKind::Boolean);
        assert!(spec.validate().is_ok());
    }
}
