//! Migration pipeline orchestration.
//!
//! Entity types are migrated in dependency order, page by page:
//! fetch, transform, write. Row-level failures are counted and logged; any
//! other failure aborts the run with the partial report attached.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::MigrationOptions;
use crate::connectors::DocumentSource;
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::preflight;
use crate::reader::SourceReader;
use crate::registry::EntityTypeSpec;
use crate::report::{EntityReport, EntityStatus, MigrationReport, MAX_ERROR_SAMPLES};
use crate::retry::RetryPolicy;
use crate::target::TargetStore;
use crate::transform::transform_record;
use crate::writer::{ExistingRowPolicy, TargetWriter};

/// Where an entity type's migration currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntityPhase {
    /// Not picked up yet.
    #[default]
    NotStarted,
    /// Waiting on a source page.
    Fetching,
    /// Coercing the page's records.
    Transforming,
    /// Inserting the page's rows.
    Writing,
    /// Every page processed.
    Completed,
    /// Stopped by a fatal error.
    Aborted,
}

/// Counters for one entity type, owned by the task migrating it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationProgress {
    /// Current phase.
    pub phase: EntityPhase,
    /// Offset of the next page.
    pub offset: u64,
    /// Rows migrated.
    pub migrated: u64,
    /// Rows that failed.
    pub errors: u64,
    /// Source record count.
    pub total: u64,
    /// Rows already present (`report` policy).
    pub already_present: u64,
    /// Enum fallbacks applied.
    pub fallbacks: u64,
    /// Non-empty pages processed.
    pub pages: u64,
    /// First few row-error messages.
    pub error_samples: Vec<String>,
}

impl MigrationProgress {
    /// Moves to `next`, logging the transition.
    pub fn transition(&mut self, next: EntityPhase) {
        if self.phase != next {
            debug!(from = ?self.phase, to = ?next, offset = self.offset, "Phase change");
            self.phase = next;
        }
    }

    /// Counts a row error, keeping the first messages.
    pub fn record_error(&mut self, message: String) {
        self.errors += 1;
        if self.error_samples.len() < MAX_ERROR_SAMPLES {
            self.error_samples.push(message);
        }
    }

    fn to_report(&self, spec: &EntityTypeSpec, status: EntityStatus) -> EntityReport {
        self.clone().into_report(spec, status)
    }

    fn into_report(self, spec: &EntityTypeSpec, status: EntityStatus) -> EntityReport {
        EntityReport {
            name: spec.name.clone(),
            target_table: spec.target_table.clone(),
            total: self.total,
            migrated: self.migrated,
            errors: self.errors,
            already_present: self.already_present,
            fallbacks: self.fallbacks,
            status,
            error_samples: self.error_samples,
        }
    }
}

/// A fatal error raised while migrating one entity type.
struct EntityFailure {
    report: EntityReport,
    operation: &'static str,
    error: Error,
}

impl EntityFailure {
    fn new(
        mut progress: MigrationProgress,
        spec: &EntityTypeSpec,
        operation: &'static str,
        error: Error,
    ) -> Self {
        progress.transition(EntityPhase::Aborted);
        error!(operation, error = %error, offset = progress.offset, "Entity type aborted");
        Self {
            report: progress.into_report(spec, EntityStatus::Aborted),
            operation,
            error,
        }
    }
}

/// Drives a full migration between two connected stores.
///
/// The stores are borrowed so the caller keeps them for cleanup when a run
/// is interrupted. Per-entity counters are published after every page, so
/// [`MigrationOrchestrator::snapshot`] can report a run that never returned.
pub struct MigrationOrchestrator<'a> {
    source: &'a dyn DocumentSource,
    target: &'a dyn TargetStore,
    specs: Vec<EntityTypeSpec>,
    options: MigrationOptions,
    retry: RetryPolicy,
    progress: MultiProgress,
    live: Mutex<Vec<EntityReport>>,
    created_at: DateTime<Utc>,
    created: Instant,
}

impl<'a> MigrationOrchestrator<'a> {
    /// Creates an orchestrator for the given entity types.
    pub fn new(
        source: &'a dyn DocumentSource,
        target: &'a dyn TargetStore,
        specs: &[EntityTypeSpec],
        options: MigrationOptions,
    ) -> Self {
        let progress = if options.show_progress {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        Self {
            source,
            target,
            specs: specs.to_vec(),
            retry: options.retry_policy(),
            options,
            progress,
            live: Mutex::new(Vec::new()),
            created_at: Utc::now(),
            created: Instant::now(),
        }
    }

    /// Report of the entity types picked up so far.
    ///
    /// Types still migrating are marked [`EntityStatus::Interrupted`] with
    /// the counters of their last processed page.
    #[must_use]
    pub fn snapshot(&self) -> MigrationReport {
        let entities = self
            .live
            .lock()
            .map(|live| live.clone())
            .unwrap_or_default();
        MigrationReport {
            run_id: Uuid::new_v4(),
            started_at: self.created_at,
            completed_at: Utc::now(),
            duration_seconds: self.created.elapsed().as_secs_f64(),
            entities,
        }
    }

    fn publish(&self, report: EntityReport) {
        if let Ok(mut live) = self.live.lock() {
            match live.iter_mut().find(|e| e.name == report.name) {
                Some(slot) => *slot = report,
                None => live.push(report),
            }
        }
    }

    /// Run the migration.
    ///
    /// Referential checks are suspended for the duration of the run and
    /// restored afterwards, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`], [`Error::UnknownDependency`] or
    ///   [`Error::CyclicDependency`] for a bad registry
    /// - [`Error::Preflight`] when target tables are missing
    /// - [`Error::Aborted`] when a fatal error stops the run; it carries the
    ///   partial report
    pub async fn run(&self) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let start = Instant::now();

        for spec in &self.specs {
            spec.validate()?;
        }
        let graph = DependencyGraph::new(&self.specs)?;
        if let Ok(mut live) = self.live.lock() {
            live.clear();
        }
        info!(
            order = ?graph.names(),
            workers = self.options.workers,
            batch_size = self.options.batch_size,
            "Starting migration"
        );

        let preflight = preflight::check(self.source, self.target, graph.order()).await?;
        if !preflight.is_ready() {
            return Err(Error::Preflight(format!(
                "missing target tables: {}",
                preflight.missing_tables.join(", ")
            )));
        }
        let expected: HashMap<String, u64> = preflight
            .collections
            .into_iter()
            .map(|probe| (probe.collection, probe.count))
            .collect();

        self.target.disable_referential_checks().await?;
        let outcome = self.migrate_all(&graph, &expected).await;
        let restored = self.target.enable_referential_checks().await;

        let finish = |entities: Vec<EntityReport>| MigrationReport {
            run_id: Uuid::new_v4(),
            started_at,
            completed_at: Utc::now(),
            duration_seconds: start.elapsed().as_secs_f64(),
            entities,
        };

        match outcome {
            Ok(entities) => {
                restored?;
                let report = finish(entities);
                info!(
                    migrated = report.total_migrated(),
                    errors = report.total_errors(),
                    duration_secs = report.duration_seconds,
                    "Migration complete"
                );
                Ok(report)
            }
            Err((mut entities, failure)) => {
                if let Err(e) = restored {
                    error!(error = %e, "Could not restore referential checks");
                }
                let entity = failure.report.name.clone();
                entities.push(failure.report);
                Err(Error::Aborted {
                    entity,
                    operation: failure.operation,
                    partial: Box::new(finish(entities)),
                    source: Box::new(failure.error),
                })
            }
        }
    }

    /// Migrates every entity type. On failure returns the reports gathered
    /// so far together with the failure.
    async fn migrate_all(
        &self,
        graph: &DependencyGraph,
        expected: &HashMap<String, u64>,
    ) -> std::result::Result<Vec<EntityReport>, (Vec<EntityReport>, EntityFailure)> {
        let mut reports = Vec::with_capacity(graph.order().len());

        if self.options.workers <= 1 {
            for spec in graph.order() {
                match self.migrate_entity(spec, expected).await {
                    Ok(report) => reports.push(report),
                    Err(failure) => return Err((reports, failure)),
                }
            }
            return Ok(reports);
        }

        for (depth, level) in graph.levels().into_iter().enumerate() {
            debug!(depth, entities = level.len(), "Starting dependency level");
            let results: Vec<_> = stream::iter(level)
                .map(|spec| self.migrate_entity(spec, expected))
                .buffered(self.options.workers)
                .collect()
                .await;

            let mut first_failure = None;
            for result in results {
                match result {
                    Ok(report) => reports.push(report),
                    Err(failure) if first_failure.is_none() => first_failure = Some(failure),
                    Err(failure) => reports.push(failure.report),
                }
            }
            if let Some(failure) = first_failure {
                return Err((reports, failure));
            }
        }
        Ok(reports)
    }

    async fn migrate_entity(
        &self,
        spec: &EntityTypeSpec,
        expected: &HashMap<String, u64>,
    ) -> std::result::Result<EntityReport, EntityFailure> {
        let span = info_span!("entity", name = %spec.name);
        let total = expected.get(&spec.source_collection).copied().unwrap_or(0);
        let result = self.migrate_pages(spec, total).instrument(span).await;
        match &result {
            Ok(report) => self.publish(report.clone()),
            Err(failure) => self.publish(failure.report.clone()),
        }
        result
    }

    async fn migrate_pages(
        &self,
        spec: &EntityTypeSpec,
        total: u64,
    ) -> std::result::Result<EntityReport, EntityFailure> {
        let mut progress = MigrationProgress {
            total,
            ..MigrationProgress::default()
        };
        let mut reader = SourceReader::new(self.source, spec, self.options.batch_size, &self.retry);
        let writer = TargetWriter::new(self.target, self.options.existing_rows);
        let bar = self.progress.add(create_progress_bar(total));
        bar.set_message(spec.name.clone());

        info!(
            collection = %spec.source_collection,
            table = %spec.target_table,
            total,
            "Migrating entity type"
        );
        self.publish(progress.to_report(spec, EntityStatus::Interrupted));

        loop {
            progress.transition(EntityPhase::Fetching);
            let page = match reader.next_page().await {
                Ok(page) => page,
                Err(e) => {
                    bar.abandon();
                    return Err(EntityFailure::new(progress, spec, "fetch", e));
                }
            };
            progress.total = page.total_count;
            if page.is_end() {
                break;
            }
            progress.pages += 1;

            for message in page.rejected {
                warn!(error = %message, "Item rejected");
                progress.record_error(message);
            }

            progress.transition(EntityPhase::Transforming);
            let mut rows = Vec::with_capacity(page.records.len());
            for record in &page.records {
                match transform_record(spec, record) {
                    Ok(outcome) => {
                        for fallback in &outcome.fallbacks {
                            debug!(
                                column = %fallback.column,
                                original = %fallback.original,
                                fallback = %fallback.fallback,
                                "Enum value replaced by fallback"
                            );
                        }
                        progress.fallbacks += outcome.fallbacks.len() as u64;
                        rows.push(outcome.row);
                    }
                    Err(e) if e.is_row_level() => {
                        let payload = Value::Object(record.clone());
                        warn!(error = %e, payload = %payload, "Record rejected");
                        progress.record_error(e.to_string());
                    }
                    Err(e) => {
                        bar.abandon();
                        return Err(EntityFailure::new(progress, spec, "transform", e));
                    }
                }
            }

            progress.transition(EntityPhase::Writing);
            let outcome = match writer
                .write_batch(&spec.target_table, rows, &spec.primary_key)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    bar.abandon();
                    return Err(EntityFailure::new(progress, spec, "write", e));
                }
            };
            progress.migrated += outcome.inserted;
            match writer.policy() {
                ExistingRowPolicy::Skip => progress.migrated += outcome.skipped,
                ExistingRowPolicy::Report => progress.already_present += outcome.skipped,
            }
            for row_error in outcome.errors {
                progress.record_error(format!("{}: {}", row_error.key, row_error.message));
            }

            progress.offset = reader.offset();
            bar.set_position(progress.offset);
            self.publish(progress.to_report(spec, EntityStatus::Interrupted));
            debug!(
                page = progress.pages,
                offset = progress.offset,
                migrated = progress.migrated,
                errors = progress.errors,
                "Page processed"
            );

            if self.options.batch_delay_ms > 0 {
                tokio::time::sleep(self.options.batch_delay()).await;
            }
        }

        progress.transition(EntityPhase::Completed);
        bar.finish_with_message(format!("{} done", spec.name));

        if progress.errors > 0 {
            warn!(
                migrated = progress.migrated,
                errors = progress.errors,
                "Entity type migrated with row errors"
            );
        } else {
            info!(
                migrated = progress.migrated,
                already_present = progress.already_present,
                fallbacks = progress.fallbacks,
                "Entity type migrated"
            );
        }
        Ok(progress.into_report(spec, EntityStatus::Completed))
    }
}

fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = if total > 0 {
        ProgressBar::new(total)
    } else {
        ProgressBar::new_spinner()
    };

    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} {msg:18} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    pb
}
