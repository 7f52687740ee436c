//! Error types for supportdesk-migrate.
//!
//! Errors fall into two groups. Row-level errors ([`Error::RowTransform`] and
//! [`Error::RowWrite`]) are recovered locally by the pipeline: counted, logged
//! with the offending payload, and the run continues. Everything else is
//! fatal and stops the run with context about where it happened.

use thiserror::Error;

use crate::report::MigrationReport;

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while migrating or verifying.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration or entity declaration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The source document store could not be reached.
    #[error("Source connection error: {0}")]
    SourceConnection(String),

    /// The target database could not be reached.
    #[error("Target connection error: {0}")]
    TargetConnection(String),

    /// Credentials were rejected by a store.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The source asked us to slow down (seconds to wait).
    #[error("Rate limited, retry after {0}s")]
    RateLimit(u64),

    /// A page could not be fetched or decoded.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// The target is not ready to receive data.
    #[error("Pre-flight check failed: {0}")]
    Preflight(String),

    /// Entity dependencies do not form a DAG.
    #[error("Cyclic dependency between entity types: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    /// An entity depends on a type that is not registered.
    #[error("Entity type '{entity}' depends on unknown entity type '{dependency}'")]
    UnknownDependency {
        /// Declaring entity type.
        entity: String,
        /// Missing dependency.
        dependency: String,
    },

    /// A single record could not be coerced into a canonical row.
    #[error("Cannot transform {entity} record {key}: field '{field}' {reason}")]
    RowTransform {
        /// Entity type name.
        entity: String,
        /// Primary-key value of the record, or `<unknown>`.
        key: String,
        /// Source field that failed.
        field: String,
        /// What went wrong.
        reason: String,
    },

    /// A single row was rejected by the target.
    #[error("Row rejected by table {table}: {reason}")]
    RowWrite {
        /// Target table.
        table: String,
        /// Rejection reason reported by the target.
        reason: String,
    },

    /// A fatal error stopped the run while migrating an entity type.
    #[error("Migration aborted during {operation} of '{entity}': {source}")]
    Aborted {
        /// Entity type being migrated.
        entity: String,
        /// Operation in progress (`fetch`, `write`, ...).
        operation: &'static str,
        /// What was migrated before the abort point.
        partial: Box<MigrationReport>,
        /// Underlying fatal error.
        #[source]
        source: Box<Error>,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Database driver error.
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// Builds a [`Error::RowTransform`].
    pub fn row_transform(
        entity: impl Into<String>,
        key: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::RowTransform {
            entity: entity.into(),
            key: key.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Builds a [`Error::RowWrite`].
    pub fn row_write(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RowWrite {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors that only affect one row and never stop the run.
    #[must_use]
    pub const fn is_row_level(&self) -> bool {
        matches!(self, Self::RowTransform { .. } | Self::RowWrite { .. })
    }

    /// Returns true for errors caused by an unreachable store.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::SourceConnection(_)
            | Self::TargetConnection(_)
            | Self::Authentication(_)
            | Self::RateLimit(_)
            | Self::Http(_) => true,
            Self::Aborted { source, .. } => source.is_connectivity(),
            _ => false,
        }
    }

    /// The partial report attached to an aborted run, if any.
    #[must_use]
    pub fn partial_report(&self) -> Option<&MigrationReport> {
        match self {
            Self::Aborted { partial, .. } => Some(partial),
            _ => None,
        }
    }

    /// Format error with full details including the error chain.
    #[must_use]
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_level_classification() {
        assert!(Error::row_transform("tickets", "t1", "status", "bad").is_row_level());
        assert!(Error::row_write("tickets", "duplicate key").is_row_level());
        assert!(!Error::SourceConnection("down".to_string()).is_row_level());
        assert!(!Error::CyclicDependency(vec!["a".into(), "b".into()]).is_row_level());
    }

    #[test]
    fn test_cyclic_dependency_message() {
        let err = Error::CyclicDependency(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(
            err.to_string(),
            "Cyclic dependency between entity types: a -> b -> a"
        );
    }

    #[test]
    fn test_aborted_carries_context() {
        let err = Error::Aborted {
            entity: "tickets".to_string(),
            operation: "fetch",
            partial: Box::new(MigrationReport::empty()),
            source: Box::new(Error::SourceConnection("timeout".to_string())),
        };
        assert!(err.is_connectivity());
        assert!(err.partial_report().is_some());
        let detailed = err.format_detailed();
        assert!(detailed.contains("fetch of 'tickets'"));
        assert!(detailed.contains("Caused by"));
    }
}
