//! Supportdesk Migration CLI
//!
//! Moves helpdesk data from a document store into PostgreSQL and verifies
//! the result.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use supportdesk_migrate::config::EXAMPLE_CONFIG;
use supportdesk_migrate::registry::ddl::schema_script;
use supportdesk_migrate::{
    create_source, create_target, helpdesk, preflight, DependencyGraph, DocumentSource,
    ExistingRowPolicy, IntegrityVerifier, MigrationConfig, MigrationOrchestrator, TargetConfig,
    TargetStore,
};

const EXIT_OK: u8 = 0;
const EXIT_FATAL: u8 = 1;
const EXIT_FINDINGS: u8 = 2;
const EXIT_ROW_ERRORS: u8 = 3;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "supportdesk-migrate")]
#[command(author = "Supportdesk Team")]
#[command(version)]
#[command(about = "Migrate helpdesk data from a document store into PostgreSQL", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MIGRATE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log filter (e.g. info, debug, supportdesk_migrate=trace)
    #[arg(long, env = "MIGRATE_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration
    Run {
        /// Write to in-memory tables instead of the configured target
        #[arg(long)]
        dry_run: bool,

        /// Verify the target after migrating
        #[arg(long)]
        verify: bool,

        /// Batch size override
        #[arg(long)]
        batch_size: Option<usize>,

        /// Concurrent entity types per dependency level
        #[arg(long)]
        workers: Option<usize>,

        /// Rows already in the target: skip or report
        #[arg(long, value_parser = ["skip", "report"])]
        existing_rows: Option<String>,

        /// Disable progress bars
        #[arg(long)]
        no_progress: bool,

        /// Write the report as JSON
        #[arg(long, value_name = "FILE")]
        report_json: Option<PathBuf>,
    },

    /// Verify an already migrated target
    Verify {
        /// Do not reconcile record counts with the source
        #[arg(long)]
        skip_counts: bool,

        /// Write the findings as JSON
        #[arg(long, value_name = "FILE")]
        report_json: Option<PathBuf>,
    },

    /// Probe source collections and target tables
    Check,

    /// Print PostgreSQL DDL for the registry
    Schema,

    /// Generate example configuration
    Init {
        /// Output file path
        #[arg(short, long, default_value = "migration.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("Error: cannot initialize logging: {}", e);
        return ExitCode::from(EXIT_FATAL);
    }

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<supportdesk_migrate::Error>() {
                Some(err) => {
                    error!(error = %err, "Migration failed");
                    eprintln!("{}", err.format_detailed());
                }
                None => {
                    error!(error = %e, "Command failed");
                    eprintln!("Error: {:#}", e);
                }
            }
            EXIT_FATAL
        }
    };

    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    ExitCode::from(code)
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" })),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match cli.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!(e))
}

async fn execute(cli: Cli) -> anyhow::Result<u8> {
    match cli.command {
        Commands::Run {
            dry_run,
            verify,
            batch_size,
            workers,
            existing_rows,
            no_progress,
            report_json,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(bs) = batch_size {
                config.options.batch_size = bs;
            }
            if let Some(w) = workers {
                config.options.workers = w;
            }
            if let Some(policy) = existing_rows {
                config.options.existing_rows = policy.parse::<ExistingRowPolicy>()?;
            }
            if no_progress || matches!(cli.log_format, LogFormat::Json) {
                config.options.show_progress = false;
            }
            if dry_run {
                info!("Dry run mode - writing to in-memory tables");
                config.target = TargetConfig::Memory;
            }
            config.validate()?;
            run_migration(config, verify, report_json.as_deref()).await
        }
        Commands::Verify {
            skip_counts,
            report_json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            config.validate()?;
            verify_target(config, skip_counts, report_json.as_deref()).await
        }
        Commands::Check => {
            let config = load_config(cli.config.as_deref())?;
            config.validate()?;
            check_stores(config).await
        }
        Commands::Schema => print_schema(cli.config.as_deref()),
        Commands::Init { output, force } => generate_config(&output, force),
    }
}

/// File first, then `MIGRATE_*` overrides; environment only without a file.
fn load_config(path: Option<&Path>) -> anyhow::Result<MigrationConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            let mut config = MigrationConfig::from_file(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            Ok(config)
        }
        None => {
            info!("No configuration file, reading MIGRATE_* environment variables");
            Ok(MigrationConfig::from_env()?)
        }
    }
}

async fn connect_source(config: &MigrationConfig) -> anyhow::Result<Box<dyn DocumentSource>> {
    let mut source = create_source(&config.source)?;
    source.connect().await?;
    info!(source = source.source_type(), "Connected to source");
    Ok(source)
}

async fn run_migration(
    config: MigrationConfig,
    verify: bool,
    report_json: Option<&Path>,
) -> anyhow::Result<u8> {
    let specs = config.specs();
    let mut source = connect_source(&config).await?;
    let target = create_target(&config.target, &specs).await?;
    info!(target = target.target_type(), "Connected to target");

    let (outcome, interrupted) = {
        let orchestrator = MigrationOrchestrator::new(
            source.as_ref(),
            target.as_ref(),
            &specs,
            config.options.clone(),
        );
        let outcome = tokio::select! {
            result = orchestrator.run() => Some(result),
            _ = shutdown_signal() => None,
        };
        let interrupted = outcome.is_none().then(|| orchestrator.snapshot());
        (outcome, interrupted)
    };

    let report = match outcome {
        Some(Ok(report)) => report,
        Some(Err(e)) => {
            if let Some(partial) = e.partial_report() {
                println!("{}", partial.render_table());
                if let Some(path) = report_json {
                    std::fs::write(path, partial.to_json()?)?;
                }
            }
            shutdown(source.as_mut(), target.as_ref()).await;
            return Err(e.into());
        }
        None => {
            warn!("Interrupted, restoring referential checks");
            if let Err(e) = target.enable_referential_checks().await {
                error!(error = %e, "Could not restore referential checks");
            }
            if let Some(partial) = interrupted {
                println!("{}", partial.render_table());
                if let Some(path) = report_json {
                    std::fs::write(path, partial.to_json()?)?;
                }
            }
            shutdown(source.as_mut(), target.as_ref()).await;
            return Ok(EXIT_INTERRUPTED);
        }
    };

    println!("{}", report.render_table());

    let mut code = if report.is_success() {
        EXIT_OK
    } else {
        EXIT_ROW_ERRORS
    };

    let verification = if verify {
        let verifier = IntegrityVerifier::new(target.as_ref(), &specs).with_source(source.as_ref());
        let findings = tokio::select! {
            result = verifier.verify() => Some(result),
            _ = shutdown_signal() => None,
        };
        match findings {
            Some(Ok(findings)) => {
                println!("{}", findings.render_table());
                if !findings.is_clean() {
                    code = EXIT_FINDINGS;
                }
                Some(findings)
            }
            Some(Err(e)) => {
                shutdown(source.as_mut(), target.as_ref()).await;
                return Err(e.into());
            }
            None => {
                shutdown(source.as_mut(), target.as_ref()).await;
                return Ok(EXIT_INTERRUPTED);
            }
        }
    } else {
        None
    };

    if let Some(path) = report_json {
        let json = match &verification {
            Some(findings) => serde_json::to_string_pretty(&serde_json::json!({
                "migration": report,
                "verification": findings,
            }))?,
            None => report.to_json()?,
        };
        std::fs::write(path, json)?;
        info!("Report written to {:?}", path);
    }

    shutdown(source.as_mut(), target.as_ref()).await;
    Ok(code)
}

async fn verify_target(
    config: MigrationConfig,
    skip_counts: bool,
    report_json: Option<&Path>,
) -> anyhow::Result<u8> {
    let specs = config.specs();
    let mut source = if skip_counts {
        None
    } else {
        Some(connect_source(&config).await?)
    };
    let target = create_target(&config.target, &specs).await?;

    let outcome = {
        let mut verifier = IntegrityVerifier::new(target.as_ref(), &specs);
        if let Some(source) = &source {
            verifier = verifier.with_source(source.as_ref());
        }
        tokio::select! {
            result = verifier.verify() => Some(result),
            _ = shutdown_signal() => None,
        }
    };

    let result = match outcome {
        Some(Ok(report)) => {
            println!("{}", report.render_table());
            if let Some(path) = report_json {
                std::fs::write(path, report.to_json()?)?;
            }
            Ok(if report.is_clean() {
                EXIT_OK
            } else {
                EXIT_FINDINGS
            })
        }
        Some(Err(e)) => Err(e.into()),
        None => Ok(EXIT_INTERRUPTED),
    };

    if let Err(e) = target.close().await {
        warn!(error = %e, "Could not close target");
    }
    if let Some(source) = source.as_mut() {
        if let Err(e) = source.close().await {
            warn!(error = %e, "Could not close source");
        }
    }
    result
}

async fn check_stores(config: MigrationConfig) -> anyhow::Result<u8> {
    let specs = config.specs();
    let graph = DependencyGraph::new(&specs)?;
    let mut source = connect_source(&config).await?;
    let target = create_target(&config.target, &specs).await?;

    let report = preflight::check(source.as_ref(), target.as_ref(), graph.order()).await;
    shutdown(source.as_mut(), target.as_ref()).await;
    let report = report?;

    println!("{}", report.render_table());
    Ok(if report.is_ready() { EXIT_OK } else { EXIT_FATAL })
}

fn print_schema(config_path: Option<&Path>) -> anyhow::Result<u8> {
    let specs = match config_path {
        Some(path) => MigrationConfig::from_file(path)?.specs(),
        None => helpdesk(),
    };
    let graph = DependencyGraph::new(&specs)?;
    println!("{}", schema_script(graph.order()));
    Ok(EXIT_OK)
}

fn generate_config(output: &Path, force: bool) -> anyhow::Result<u8> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }
    std::fs::write(output, EXAMPLE_CONFIG)?;
    println!("Generated configuration: {}", output.display());
    println!(
        "Edit the file and run: supportdesk-migrate --config {} run",
        output.display()
    );
    Ok(EXIT_OK)
}

/// Closes both stores, logging failures.
async fn shutdown(source: &mut dyn DocumentSource, target: &dyn TargetStore) {
    if let Err(e) = target.close().await {
        warn!(error = %e, "Could not close target");
    }
    if let Err(e) = source.close().await {
        warn!(error = %e, "Could not close source");
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
