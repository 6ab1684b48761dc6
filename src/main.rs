//! Dispatch Engine - command-line front end
//!
//! Loads a day's schedule from the configured repository, runs the requested
//! command and persists the result through the debounced persister.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dispatch_engine::cli::{Cli, Command};
use dispatch_engine::config::Config;
use dispatch_engine::db;
use dispatch_engine::db::queries::schedule::PgScheduleRepository;
use dispatch_engine::services::geocoding::{create_geocoder, CachedGeocoder, GeocodeCache};
use dispatch_engine::services::outputs::notification_payload;
use dispatch_engine::services::persistence::{DebouncedPersister, FileScheduleRepository, RangeView, ScheduleRepository};
use dispatch_engine::services::planner::{self, PlanProgress, Planner};
use dispatch_engine::services::roster::{default_roster, effective_roster};
use dispatch_engine::services::routing::{create_routing_service_with_fallback, MatrixBuilder};
use dispatch_engine::services::store::ScheduleStore;
use dispatch_engine::services::conflicts::detect_conflicts;
use dispatch_engine::types::{ExternalBooking, Roster};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs directory - use LOGS_DIR env var or default to ./logs
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "./logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "dispatch.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,dispatch_engine=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)) // stderr, stdout carries results
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    let config = Config::from_env()?;
    info!("Configuration loaded");

    let repository = open_repository(&config).await?;
    let persister = DebouncedPersister::spawn(repository.clone(), Duration::from_millis(config.persist_debounce_ms));

    let result = run(cli.command, &config, repository, &persister).await;

    // flushes whatever the command queued
    persister.shutdown().await;
    result
}

async fn open_repository(config: &Config) -> Result<Arc<dyn ScheduleRepository>> {
    match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            info!("Connected to PostgreSQL");
            db::ensure_schema(&pool).await?;
            Ok(Arc::new(PgScheduleRepository::new(pool)))
        }
        None => {
            info!("DATABASE_URL not set, storing schedules in {}", config.data_dir.display());
            Ok(Arc::new(FileScheduleRepository::new(&config.data_dir)))
        }
    }
}

async fn load_store(repository: &dyn ScheduleRepository, config: &Config, date: NaiveDate) -> Result<ScheduleStore> {
    let store = match repository.load(date).await? {
        Some(document) => {
            info!("Loaded schedule for {} (revision {})", date, document.revision);
            ScheduleStore::from_document(document, config.day_window)
        }
        None => {
            info!("No stored schedule for {}, starting from the default roster", date);
            ScheduleStore::empty(date, default_roster(), config.day_window)
        }
    };
    Ok(store)
}

async fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {} {}", what, path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {} {}", what, path.display()))
}

async fn run(
    command: Command,
    config: &Config,
    repository: Arc<dyn ScheduleRepository>,
    persister: &DebouncedPersister,
) -> Result<()> {
    match command {
        Command::Optimize { date, feed, roster } => {
            let mut store = load_store(repository.as_ref(), config, date).await?;

            if let Some(path) = roster {
                let roster: Roster = read_json(&path, "roster").await?;
                if store.set_roster(effective_roster(Some(roster))).is_applied() {
                    info!("Rebuilt lanes from roster {}", path.display());
                }
            }

            if let Some(path) = feed {
                let bookings: Vec<ExternalBooking> = read_json(&path, "booking feed").await?;
                let report = store.merge_external(&bookings);
                info!(
                    "Merged feed: {} added, {} attached, {} already present",
                    report.added, report.attached, report.skipped
                );
            }

            let geocoder = CachedGeocoder::new(
                create_geocoder(&config.geocoder_backend, &config.nominatim_url),
                Arc::new(GeocodeCache::new()),
            );
            let routing = create_routing_service_with_fallback(config.valhalla_url.clone()).await;
            let planner = Planner::new(geocoder, MatrixBuilder::new(routing), config.depot);

            let shared = planner::shared(store);
            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<PlanProgress>();
            let reporter = tokio::spawn(async move {
                while let Some(event) = progress_rx.recv().await {
                    match serde_json::to_string(&event) {
                        Ok(json) => info!("progress {}", json),
                        Err(e) => warn!("Unprintable progress event: {}", e),
                    }
                }
            });

            let summary = planner.optimize_day(&shared, Some(&progress_tx)).await;
            drop(progress_tx);
            reporter.await.ok();

            let mut store = shared.lock();
            for advisory in store.advisories() {
                println!("advisory: {}", advisory.message);
            }
            for warning in store.conflicts() {
                println!("warning: {}", warning.message());
            }
            println!(
                "{}: {} lane(s) routed, {} skipped, {} job(s) clustered",
                date,
                summary.routed.len(),
                summary.skipped.len(),
                summary.clustered
            );
            store.persist_if_changed(persister);
        }
        Command::Conflicts { date } => {
            let store = load_store(repository.as_ref(), config, date).await?;
            let warnings = store.conflicts();
            if warnings.is_empty() {
                println!("{}: no conflicts", date);
            }
            for warning in warnings {
                println!("{}", warning.message());
            }
        }
        Command::Finalize { date } => {
            let mut store = load_store(repository.as_ref(), config, date).await?;
            let records = store.finalize();
            println!("{}", serde_json::to_string_pretty(&records)?);
            store.persist_if_changed(persister);
        }
        Command::Notify { date } => {
            let store = load_store(repository.as_ref(), config, date).await?;
            let payload = notification_payload(store.schedule(), store.drive_times(), store.window());
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Command::Week { date, days } => {
            let view = RangeView::new(repository, persister.subscribe());
            let documents = view.load(date, days).await?;
            for document in documents.iter() {
                let conflicts = detect_conflicts(&document.schedule, &document.drive_times, &config.day_window);
                println!(
                    "{}  {:>3} job(s)  {:>2} conflict(s)  {}",
                    document.date,
                    document.schedule.job_count(),
                    conflicts.len(),
                    if document.schedule.finalized { "finalized" } else { "draft" }
                );
            }
        }
    }
    Ok(())
}
