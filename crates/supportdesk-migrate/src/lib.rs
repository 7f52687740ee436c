// Migration tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # Supportdesk Migration Tool
//!
//! `supportdesk-migrate` is a CLI tool and library that moves a helpdesk
//! application's data (accounts, tickets, comments, audit entries, feedback
//! and role assignments) from a document store into a relational database,
//! then verifies the result.
//!
//! ## Pipeline
//!
//! | Stage | Module | Notes |
//! |-------|--------|-------|
//! | Registry | [`registry`] | Entity declarations: collection, table, columns, foreign keys |
//! | Ordering | [`graph`] | Parents before children, cycles rejected up front |
//! | Pre-flight | [`preflight`] | Every collection reachable, every table present |
//! | Extraction | [`reader`] | Offset pagination ordered by creation time |
//! | Transformation | [`transform`] | Flat, type-normalized rows |
//! | Loading | [`writer`] | Idempotent inserts, row failures isolated |
//! | Verification | [`verify`] | Counts, required fields, orphans, JSON validity |
//!
//! ## Supported Stores
//!
//! | Store | Role | Notes |
//! |-------|------|-------|
//! | MongoDB | source | Data API over HTTPS |
//! | JSON dump | source | `mongoexport --jsonArray` files |
//! | PostgreSQL | target | Requires `postgres` feature (default) |
//! | Memory | target | Dry runs and tests |
//!
//! ## Quick Start
//!
//! ```bash
//! supportdesk-migrate init --output migration.yaml
//! supportdesk-migrate --config migration.yaml schema > schema.sql
//! supportdesk-migrate --config migration.yaml check
//! supportdesk-migrate --config migration.yaml run --verify
//! ```
//!
//! ## Library Use
//!
//! ```no_run
//! use supportdesk_migrate::connectors::json_dump::{JsonDumpConfig, JsonDumpSource};
//! use supportdesk_migrate::target::memory::MemoryTarget;
//! use supportdesk_migrate::{helpdesk, IntegrityVerifier, MigrationOptions, MigrationOrchestrator};
//!
//! # async fn demo() -> supportdesk_migrate::Result<()> {
//! let specs = helpdesk();
//! let source = JsonDumpSource::new(JsonDumpConfig { path: "./dump".into() });
//! let target = MemoryTarget::from_registry(&specs);
//!
//! let report = MigrationOrchestrator::new(&source, &target, &specs, MigrationOptions::default())
//!     .run()
//!     .await?;
//! println!("{}", report.render_table());
//!
//! let findings = IntegrityVerifier::new(&target, &specs)
//!     .with_source(&source)
//!     .verify()
//!     .await?;
//! println!("{}", findings.render_table());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod connectors;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod preflight;
pub mod reader;
pub mod registry;
pub mod report;
pub mod retry;
pub mod target;
pub mod transform;
pub mod verify;
pub mod writer;

pub use config::{MigrationConfig, MigrationOptions, SourceConfig, TargetConfig};
pub use connectors::{create_source, DocumentSource, PageRequest, SourcePage};
pub use error::{Error, Result};
pub use graph::DependencyGraph;
pub use pipeline::{EntityPhase, MigrationOrchestrator, MigrationProgress};
pub use preflight::PreflightReport;
pub use reader::SourceReader;
pub use registry::{helpdesk, ColumnKind, ColumnSpec, EntityTypeSpec};
pub use report::{EntityReport, EntityStatus, MigrationReport};
pub use target::{create_target, TargetStore};
pub use transform::{CanonicalRow, CanonicalValue, RawRecord, TransformRegistry};
pub use verify::{IntegrityVerifier, VerificationFinding, VerificationReport};
pub use writer::{ExistingRowPolicy, TargetWriter};
