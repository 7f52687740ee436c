//! Configuration types for supportdesk-migrate.
//!
//! A run is described by a YAML file, by `MIGRATE_*` environment variables,
//! or by both (environment applied on top of the file). CLI flags are
//! applied last by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connectors::common::validate_url;
use crate::connectors::json_dump::JsonDumpConfig;
use crate::connectors::mongodb::{default_data_source, MongoDbConfig};
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::registry::{helpdesk, EntityTypeSpec};
use crate::retry::RetryPolicy;
use crate::writer::ExistingRowPolicy;

#[cfg(feature = "postgres")]
use crate::target::postgres::{default_host, default_port, default_schema, PostgresConfig};

/// Main migration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Source document store.
    pub source: SourceConfig,
    /// Target relational store.
    pub target: TargetConfig,
    /// Migration options.
    #[serde(default)]
    pub options: MigrationOptions,
    /// Entity declarations; empty means the built-in helpdesk registry.
    #[serde(default)]
    pub entities: Vec<EntityTypeSpec>,
}

/// Source store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SourceConfig {
    /// MongoDB through its HTTPS Data API.
    #[serde(rename = "mongodb")]
    MongoDB(MongoDbConfig),
    /// Directory of exported `<collection>.json` arrays.
    #[serde(rename = "json_dump")]
    JsonDump(JsonDumpConfig),
}

/// Target store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TargetConfig {
    /// PostgreSQL server.
    #[cfg(feature = "postgres")]
    #[serde(rename = "postgres")]
    Postgres(PostgresConfig),
    /// In-process tables built from the registry (dry runs).
    #[serde(rename = "memory")]
    Memory,
}

/// Migration options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Records per source page and per write batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between pages, in milliseconds.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Entity types migrated concurrently within a dependency level.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Handling of rows already present in the target.
    #[serde(default)]
    pub existing_rows: ExistingRowPolicy,
    /// Retries per failed page fetch. `0` makes the first failure fatal.
    #[serde(default)]
    pub max_retries: u32,
    /// Draw progress bars on stderr.
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            workers: default_workers(),
            existing_rows: ExistingRowPolicy::default(),
            max_retries: 0,
            show_progress: true,
        }
    }
}

impl MigrationOptions {
    /// Retry policy for source reads.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        if self.max_retries == 0 {
            RetryPolicy::disabled()
        } else {
            RetryPolicy::with_max_retries(self.max_retries)
        }
    }

    /// Pause between pages.
    #[must_use]
    pub const fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_delay_ms() -> u64 {
    250
}

fn default_workers() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// Example configuration written by `supportdesk-migrate init`.
pub const EXAMPLE_CONFIG: &str = r#"# supportdesk-migrate configuration
source:
  type: mongodb
  data_api_url: https://data.mongodb-api.com/app/<app-id>/endpoint/data/v1
  api_key: ""              # or set MIGRATE_SOURCE_API_KEY
  database: helpdesk
  data_source: mongodb-atlas

# source:
#   type: json_dump
#   path: ./dump

target:
  type: postgres
  host: localhost
  port: 5432
  user: migrator
  password: ""
  database: helpdesk
  schema: public

options:
  batch_size: 100
  batch_delay_ms: 250
  workers: 1
  existing_rows: skip
  max_retries: 0
  show_progress: true

# Leave empty to use the built-in helpdesk entities.
entities: []
"#;

impl MigrationConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Builds a configuration purely from `MIGRATE_*` variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a numeric variable does not parse or
    /// the source type is unknown.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::blank();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// A MongoDB-to-PostgreSQL configuration with every credential empty.
    fn blank() -> Self {
        Self {
            source: SourceConfig::MongoDB(MongoDbConfig {
                data_api_url: String::new(),
                api_key: String::new(),
                database: String::new(),
                data_source: default_data_source(),
            }),
            #[cfg(feature = "postgres")]
            target: TargetConfig::Postgres(PostgresConfig {
                host: default_host(),
                port: default_port(),
                user: String::new(),
                password: String::new(),
                database: String::new(),
                schema: default_schema(),
            }),
            #[cfg(not(feature = "postgres"))]
            target: TargetConfig::Memory,
            options: MigrationOptions::default(),
            entities: Vec::new(),
        }
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a numeric variable does not parse or
    /// the source type is unknown.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(kind) = lookup("MIGRATE_SOURCE_TYPE") {
            let is_mongodb = matches!(self.source, SourceConfig::MongoDB(_));
            match kind.trim() {
                "mongodb" if !is_mongodb => self.source = Self::blank().source,
                "json_dump" if is_mongodb => {
                    self.source = SourceConfig::JsonDump(JsonDumpConfig {
                        path: PathBuf::new(),
                    });
                }
                "mongodb" | "json_dump" => {}
                other => {
                    return Err(Error::Config(format!(
                        "MIGRATE_SOURCE_TYPE: unknown source type '{}' (expected mongodb or json_dump)",
                        other
                    )))
                }
            }
        }

        match &mut self.source {
            SourceConfig::MongoDB(mongo) => {
                if let Some(url) = lookup("MIGRATE_SOURCE_URL") {
                    mongo.data_api_url = url;
                }
                if let Some(key) = lookup("MIGRATE_SOURCE_API_KEY") {
                    mongo.api_key = key;
                }
                if let Some(database) = lookup("MIGRATE_SOURCE_DATABASE") {
                    mongo.database = database;
                }
            }
            SourceConfig::JsonDump(dump) => {
                if let Some(path) = lookup("MIGRATE_SOURCE_PATH") {
                    dump.path = PathBuf::from(path);
                }
            }
        }

        #[cfg(feature = "postgres")]
        if let TargetConfig::Postgres(pg) = &mut self.target {
            if let Some(host) = lookup("MIGRATE_TARGET_HOST") {
                pg.host = host;
            }
            if let Some(port) = lookup("MIGRATE_TARGET_PORT") {
                pg.port = parse_env("MIGRATE_TARGET_PORT", &port)?;
            }
            if let Some(user) = lookup("MIGRATE_TARGET_USER") {
                pg.user = user;
            }
            if let Some(password) = lookup("MIGRATE_TARGET_PASSWORD") {
                pg.password = password;
            }
            if let Some(database) = lookup("MIGRATE_TARGET_DATABASE") {
                pg.database = database;
            }
            if let Some(schema) = lookup("MIGRATE_TARGET_SCHEMA") {
                pg.schema = schema;
            }
        }

        if let Some(batch_size) = lookup("MIGRATE_BATCH_SIZE") {
            self.options.batch_size = parse_env("MIGRATE_BATCH_SIZE", &batch_size)?;
        }

        Ok(())
    }

    /// Entity types to migrate.
    #[must_use]
    pub fn specs(&self) -> Vec<EntityTypeSpec> {
        if self.entities.is_empty() {
            helpdesk()
        } else {
            self.entities.clone()
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.options.batch_size == 0 {
            return Err(Error::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.options.workers == 0 {
            return Err(Error::Config("workers must be greater than 0".to_string()));
        }

        match &self.source {
            SourceConfig::MongoDB(mongo) => {
                if mongo.data_api_url.is_empty() {
                    return Err(Error::Config(
                        "source data_api_url cannot be empty".to_string(),
                    ));
                }
                validate_url(&mongo.data_api_url)?;
                if mongo.database.is_empty() {
                    return Err(Error::Config(
                        "source database cannot be empty".to_string(),
                    ));
                }
            }
            SourceConfig::JsonDump(dump) => {
                if dump.path.as_os_str().is_empty() {
                    return Err(Error::Config(
                        "source path cannot be empty".to_string(),
                    ));
                }
            }
        }

        #[cfg(feature = "postgres")]
        if let TargetConfig::Postgres(pg) = &self.target {
            if pg.host.is_empty() {
                return Err(Error::Config("target host cannot be empty".to_string()));
            }
            if pg.database.is_empty() {
                return Err(Error::Config(
                    "target database cannot be empty".to_string(),
                ));
            }
            if pg.user.is_empty() {
                return Err(Error::Config("target user cannot be empty".to_string()));
            }
        }

        let specs = self.specs();
        for spec in &specs {
            spec.validate()?;
        }
        DependencyGraph::new(&specs)?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{}: '{}' is not a valid number", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn dump_config() -> MigrationConfig {
        MigrationConfig {
            source: SourceConfig::JsonDump(JsonDumpConfig {
                path: PathBuf::from("./dump"),
            }),
            target: TargetConfig::Memory,
            options: MigrationOptions::default(),
            entities: Vec::new(),
        }
    }

    #[test]
    fn test_config_defaults() {
        let options = MigrationOptions::default();
        assert_eq!(options.batch_size, 100);
        assert_eq!(options.batch_delay_ms, 250);
        assert_eq!(options.workers, 1);
        assert_eq!(options.existing_rows, ExistingRowPolicy::Skip);
        assert_eq!(options.max_retries, 0);
        assert_eq!(options.retry_policy(), RetryPolicy::disabled());
        assert!(options.show_progress);
    }

    #[test]
    fn test_config_yaml_parse() {
        let yaml = r#"
source:
  type: json_dump
  path: ./dump
target:
  type: memory
options:
  batch_size: 500
  existing_rows: report
"#;
        let config: MigrationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.options.batch_size, 500);
        assert_eq!(config.options.existing_rows, ExistingRowPolicy::Report);
        assert_eq!(config.options.batch_delay_ms, 250);
        assert_eq!(config.target, TargetConfig::Memory);
        assert_eq!(config.specs().len(), 6);
        config.validate().unwrap();
    }

    #[test]
    fn test_example_config_parses() {
        let config: MigrationConfig = serde_yaml::from_str(EXAMPLE_CONFIG).unwrap();
        assert!(matches!(config.source, SourceConfig::MongoDB(_)));
        assert!(config.entities.is_empty());
        assert_eq!(config.options, MigrationOptions::default());
    }

    #[test]
    fn test_config_validate_batch_size() {
        let mut config = dump_config();
        config.options.batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = dump_config();
        config.options.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_rejects_bad_scheme() {
        let mut config = dump_config();
        config.source = SourceConfig::MongoDB(MongoDbConfig {
            data_api_url: "ftp://example.com/data".to_string(),
            api_key: "key".to_string(),
            database: "helpdesk".to_string(),
            data_source: default_data_source(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_rejects_cyclic_entities() {
        let yaml = r#"
source:
  type: json_dump
  path: ./dump
target:
  type: memory
entities:
  - name: a
    source_collection: a
    target_table: a
    dependencies: [b]
    columns: [{ source: id }]
  - name: b
    source_collection: b
    target_table: b
    dependencies: [a]
    columns: [{ source: id }]
"#;
        let config: MigrationConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(Error::CyclicDependency(_))
        ));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = dump_config();
        config
            .apply_env(env(&[
                ("MIGRATE_SOURCE_PATH", "/data/export"),
                ("MIGRATE_BATCH_SIZE", "250"),
            ]))
            .unwrap();

        assert_eq!(
            config.source,
            SourceConfig::JsonDump(JsonDumpConfig {
                path: PathBuf::from("/data/export")
            })
        );
        assert_eq!(config.options.batch_size, 250);
    }

    #[test]
    fn test_env_switches_source_type() {
        let mut config = dump_config();
        config
            .apply_env(env(&[
                ("MIGRATE_SOURCE_TYPE", "mongodb"),
                ("MIGRATE_SOURCE_URL", "https://data.example.com/v1"),
                ("MIGRATE_SOURCE_API_KEY", "secret"),
                ("MIGRATE_SOURCE_DATABASE", "helpdesk"),
            ]))
            .unwrap();

        match &config.source {
            SourceConfig::MongoDB(mongo) => {
                assert_eq!(mongo.data_api_url, "https://data.example.com/v1");
                assert_eq!(mongo.api_key, "secret");
                assert_eq!(mongo.data_source, "mongodb-atlas");
            }
            other => panic!("unexpected source {:?}", other),
        }
        config.validate().unwrap();
    }

    #[test]
    fn test_env_rejects_bad_values() {
        let mut config = dump_config();
        assert!(config
            .apply_env(env(&[("MIGRATE_BATCH_SIZE", "lots")]))
            .is_err());
        assert!(config
            .apply_env(env(&[("MIGRATE_SOURCE_TYPE", "firestore")]))
            .is_err());
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn test_env_target_overrides() {
        let mut config = MigrationConfig::blank();
        config
            .apply_env(env(&[
                ("MIGRATE_SOURCE_URL", "https://data.example.com/v1"),
                ("MIGRATE_SOURCE_DATABASE", "helpdesk"),
                ("MIGRATE_TARGET_HOST", "db.internal"),
                ("MIGRATE_TARGET_PORT", "6543"),
                ("MIGRATE_TARGET_USER", "migrator"),
                ("MIGRATE_TARGET_DATABASE", "helpdesk"),
            ]))
            .unwrap();

        match &config.target {
            TargetConfig::Postgres(pg) => {
                assert_eq!(pg.host, "db.internal");
                assert_eq!(pg.port, 6543);
                assert_eq!(pg.schema, "public");
            }
            TargetConfig::Memory => panic!("expected postgres target"),
        }
        config.validate().unwrap();
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn test_blank_config_is_invalid() {
        let config = MigrationConfig::blank();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
