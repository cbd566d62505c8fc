//! hepm-migrator - legacy record migration
//!
//! Runs the ingest → migrate → reindex pipeline once per command, or
//! continuously with an optional health endpoint.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use hepm_common::events::{EventBus, PipelineStep};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hepm_migrator::config::MigratorConfig;
use hepm_migrator::db::mirror;
use hepm_migrator::decoder;
use hepm_migrator::identifiers::IdentifierManager;
use hepm_migrator::importer::ArticleImporter;
use hepm_migrator::model::{PidKey, SelectionMode};
use hepm_migrator::orchestrator::{MigrateReport, RunReport};
use hepm_migrator::{AppState, Migrator, RunOptions};

/// Command-line arguments for hepm-migrator
#[derive(Parser, Debug)]
#[command(name = "hepm-migrator")]
#[command(about = "Migrate legacy MARCXML records into the record store")]
#[command(version)]
struct Cli {
    /// Config file (overrides HEPM_CONFIG and the default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database file (overrides the configured path)
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a legacy dump, then migrate and reindex its records
    File {
        path: PathBuf,
        /// Stop after populating the mirror
        #[arg(long)]
        mirror_only: bool,
    },
    /// Migrate mirror rows (step 2)
    Mirror {
        #[command(flatten)]
        selection: Selection,
    },
    /// Run a single pipeline step
    Step {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=3))]
        step: u8,
        /// Input for step 1
        #[arg(long)]
        file: Option<PathBuf>,
        #[command(flatten)]
        selection: Selection,
    },
    /// Migrate the records of a file immediately
    Record { path: PathBuf },
    /// Poll and migrate until interrupted
    Continuously,
    /// Fetch a new article from arXiv or CrossRef
    Import { identifier: String },
    /// Follow an identifier to its record
    Resolve { pid_type: String, pid_value: String },
    /// List broken mirror rows
    Broken,
}

#[derive(clap::Args, Debug)]
struct Selection {
    /// Re-migrate every mirror row
    #[arg(long, conflicts_with = "broken")]
    all: bool,
    /// Only retry broken mirror rows
    #[arg(long)]
    broken: bool,
    /// Only rows updated on or after this date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    date_from: Option<DateTime<Utc>>,
}

impl Selection {
    fn options(&self, input: Option<PathBuf>) -> RunOptions {
        let mode = if self.all {
            SelectionMode::All
        } else if self.broken {
            SelectionMode::Broken
        } else {
            SelectionMode::Default
        };
        RunOptions {
            mode,
            date_from: self.date_from,
            input,
        }
    }
}

fn parse_date(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    hepm_common::time::parse_date_start(value).ok_or_else(|| format!("expected YYYY-MM-DD, got {:?}", value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = MigratorConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("hepm_migrator={0},hepm_common={0},tower_http=info", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting hepm-migrator {} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE"),
    );
    info!(database = %config.database_path.display(), "Opening database");

    let db = hepm_common::db::init_database(&config.database_path)
        .await
        .context("Failed to open database")?;
    let event_bus = EventBus::default();

    match cli.command {
        Command::File { path, mirror_only } => {
            let migrator = Migrator::from_config(db, config, event_bus)?;
            let report = if mirror_only {
                RunReport {
                    ingest: Some(migrator.ingest_file(&path).await?),
                    ..Default::default()
                }
            } else {
                migrator.run_full(&path, &RunOptions::default()).await?
            };
            print_report(&report);
        }
        Command::Mirror { selection } => {
            let migrator = Migrator::from_config(db, config, event_bus)?;
            let report = migrator
                .run_step(PipelineStep::Migrate, &selection.options(None))
                .await?;
            print_report(&report);
        }
        Command::Step { step, file, selection } => {
            let Some(step) = PipelineStep::from_number(step) else {
                bail!("unknown step {}", step);
            };
            let migrator = Migrator::from_config(db, config, event_bus)?;
            let report = migrator.run_step(step, &selection.options(file)).await?;
            print_report(&report);
        }
        Command::Record { path } => {
            let migrator = Migrator::from_config(db, config, event_bus)?;
            let report = migrate_records(&migrator, &path).await?;
            print_report(&report);
        }
        Command::Continuously => {
            run_continuously(db, config, event_bus).await?;
        }
        Command::Import { identifier } => {
            let importer = ArticleImporter::new(db, &config.importer)?;
            let article = importer.import_article(&identifier).await?;
            println!("{}", serde_json::to_string_pretty(&article)?);
        }
        Command::Resolve { pid_type, pid_value } => {
            let identifiers = IdentifierManager::new(config.features.enable_pid_redirection);
            let mut conn = db.acquire().await?;
            let resolved = identifiers
                .resolve_terminal(&mut conn, &PidKey::new(pid_type, pid_value))
                .await?;
            println!("{} -> {} ({} hops)", resolved.key, resolved.uuid, resolved.hops);
        }
        Command::Broken => {
            let rows = mirror::list_broken(&db).await?;
            for (legacy_id, error) in &rows {
                println!("{}\t{}", legacy_id, error.as_deref().unwrap_or(""));
            }
            println!("broken={}", rows.len());
        }
    }

    Ok(())
}

async fn migrate_records(migrator: &Migrator, path: &Path) -> Result<RunReport> {
    let (mut batches, reader) = decoder::stream_input_file(path.to_path_buf());

    let mut migrate = MigrateReport::default();
    while let Some(fragments) = batches.recv().await {
        for raw in &fragments {
            let report = migrator.migrate_record(raw).await?;
            migrate.processed.extend(report.processed);
            migrate.migrated += report.migrated;
            migrate.broken += report.broken;
            migrate.records.extend(report.records);
            migrate.reindex.extend(report.reindex);
        }
    }
    reader
        .await?
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(RunReport {
        migrate: Some(migrate),
        ..Default::default()
    })
}

async fn run_continuously(db: sqlx::SqlitePool, config: MigratorConfig, event_bus: EventBus) -> Result<()> {
    let cancel = CancellationToken::new();
    let state = AppState::new(db.clone(), event_bus.clone());
    let bridge = state.spawn_event_bridge();

    let server = match config.health.bind {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind health endpoint to {}", addr))?;
            info!("Health check: http://{}/health", addr);
            let app = hepm_migrator::build_router(state);
            let shutdown = cancel.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
            }))
        }
        None => None,
    };

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let migrator = Migrator::from_config(db, config, event_bus)?;
    let cycles = migrator.run_continuously(cancel.clone()).await?;
    cancel.cancel();

    if let Some(server) = server {
        server.await?.context("Health server error")?;
    }
    bridge.abort();

    info!(cycles, "Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing current cycle");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing current cycle");
        },
    }
}

fn print_report(report: &RunReport) {
    if let Some(ingest) = &report.ingest {
        println!(
            "ingest: written={} stale={} invalid={} skipped={}",
            ingest.written, ingest.stale, ingest.invalid, ingest.skipped
        );
    }
    if let Some(reindex) = &report.reindex {
        println!("reindex: indexed={} removed={}", reindex.indexed, reindex.removed);
    }
    println!("{}", report.summary());
}
