//! # Video Ingest
//!
//! Collects metadata about recently published videos from a fixed roster of
//! institutional portals, stores each video once in SQLite, and submits new
//! ones to a video analysis service.
//!
//! ## Sources
//!
//! EU Commission, EU Parliament, Greenpeace and the European Central Bank
//! (YouTube), Council of Europe (Vimeo embeds) and NATO Multimedia (login
//! required). See [`sources`].
//!
//! ## Usage
//!
//! ```sh
//! video_ingest --database videos.db --source eu-commission --source nato
//! ```
//!
//! ## Architecture
//!
//! 1. **Ingestion**: one [`pipeline::IngestionPipeline`] run per selected
//!    source, all sources concurrently, each with its own page driver
//! 2. **Submission**: one [`submitter::AnalysisSubmitter`] run over every
//!    stored video still lacking an analysis id
//!
//! The process exits non-zero only when settings or the database cannot be
//! loaded, or when a source fails to authenticate.

use clap::Parser;
use futures::future::join_all;
use itertools::Itertools;
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod analysis;
mod cli;
mod config;
mod driver;
mod error;
mod models;
mod normalize;
mod pipeline;
mod retry;
mod sources;
mod store;
mod submitter;
mod utils;

use analysis::HttpAnalysisClient;
use cli::Cli;
use config::Settings;
use driver::{HttpPageDriver, PageDriver};
use error::PipelineError;
use pipeline::{IngestionPipeline, RunSummary};
use sources::council_of_europe::CouncilOfEurope;
use sources::eu_commission::EuCommission;
use sources::eu_parliament::EuParliament;
use sources::nato::{Credentials, Nato};
use sources::youtube::YouTubeChannel;
use sources::{SourceName, Timeouts};
use store::SqliteRecordStore;
use submitter::AnalysisSubmitter;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    let dotenv = dotenvy::dotenv();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("video_ingest starting up");

    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Ignoring unreadable .env"),
    }

    let args = Cli::parse();
    debug!(database = %args.database, sources = ?args.sources, "Parsed CLI arguments");

    let mut settings = match &args.config {
        Some(path) => Settings::load(path).inspect_err(|e| error!(error = %e, "Invalid settings file"))?,
        None => Settings::default(),
    };
    args.apply(&mut settings);

    let store = SqliteRecordStore::open(&args.database).inspect_err(|e| {
        error!(path = %args.database, error = %e, "Could not open the record store");
    })?;

    let mut auth_failures = Vec::new();

    // ---- Ingestion ----
    if args.skip_ingest {
        info!("Ingestion skipped");
    } else {
        let (pause_min, pause_max) = settings.pause_range();
        let pipeline = IngestionPipeline::new(settings.retry.policy(), settings.limit)
            .with_pause(pause_min, pause_max);
        let timeouts = Timeouts::new(settings.navigation_timeout());
        let credentials =
            Credentials::from_parts(args.nato_email.clone(), args.nato_password.clone());

        let sources = args.selected_sources();
        info!(sources = %sources.iter().join(", "), "Starting ingestion");

        #[cfg(feature = "browser")]
        let use_browser = args.browser;
        #[cfg(not(feature = "browser"))]
        let use_browser = false;

        let runs = sources.iter().map(|&name| {
            let credentials = credentials.clone();
            let pipeline = &pipeline;
            let store = &store;
            async move {
                let result =
                    run_source(name, pipeline, store, timeouts, credentials, use_browser).await;
                (name, result)
            }
        });

        let mut inserted = 0;
        for (name, result) in join_all(runs).await {
            match result {
                Ok(summary) => inserted += summary.inserted,
                Err(e) => {
                    error!(source = %name, error = %e, "Source run aborted");
                    auth_failures.push(name);
                }
            }
        }
        info!(inserted, "Ingestion finished");
    }

    // ---- Submission ----
    if args.skip_submit {
        info!("Submission skipped");
    } else {
        match (&args.analysis_url, &args.api_token) {
            (Some(url), Some(token)) => {
                let client = HttpAnalysisClient::new(
                    url.as_str(),
                    token.as_str(),
                    settings.analysis.workspace.as_str(),
                    settings.analysis_timeout(),
                )?;
                AnalysisSubmitter::new(settings.batch_size, settings.analysis.clone())
                    .run(&store, &client)
                    .await;
            }
            _ => warn!("ANALYSIS_URL or API_TOKEN not set; skipping submission"),
        }
    }

    info!(
        elapsed_ms = start_time.elapsed().as_millis(),
        "video_ingest finished"
    );

    if !auth_failures.is_empty() {
        return Err(format!(
            "authentication failed for: {}",
            auth_failures.iter().join(", ")
        )
        .into());
    }
    Ok(())
}

/// Build a fresh driver for `name` and run its adapter over it.
async fn run_source(
    name: SourceName,
    pipeline: &IngestionPipeline,
    store: &SqliteRecordStore,
    timeouts: Timeouts,
    credentials: Option<Credentials>,
    use_browser: bool,
) -> Result<RunSummary, PipelineError> {
    #[cfg(feature = "browser")]
    if use_browser {
        return match driver::BrowserPageDriver::launch(timeouts.navigation).await {
            Ok(driver) => run_adapter(name, driver, pipeline, store, timeouts, credentials).await,
            Err(e) => {
                error!(source = %name, error = %e, "Could not launch browser");
                Ok(RunSummary::default())
            }
        };
    }
    #[cfg(not(feature = "browser"))]
    let _ = use_browser;

    match HttpPageDriver::new(timeouts.navigation) {
        Ok(driver) => run_adapter(name, driver, pipeline, store, timeouts, credentials).await,
        Err(e) => {
            error!(source = %name, error = %e, "Could not build page driver");
            Ok(RunSummary::default())
        }
    }
}

async fn run_adapter<D: PageDriver>(
    name: SourceName,
    driver: D,
    pipeline: &IngestionPipeline,
    store: &SqliteRecordStore,
    timeouts: Timeouts,
    credentials: Option<Credentials>,
) -> Result<RunSummary, PipelineError> {
    match name {
        SourceName::EuCommission => pipeline.run(&EuCommission::new(driver, timeouts), store).await,
        SourceName::EuParliament => pipeline.run(&EuParliament::new(driver, timeouts), store).await,
        SourceName::Greenpeace => {
            pipeline
                .run(&YouTubeChannel::greenpeace(driver, timeouts), store)
                .await
        }
        SourceName::Ecb => pipeline.run(&YouTubeChannel::ecb(driver, timeouts), store).await,
        SourceName::CouncilOfEurope => {
            pipeline
                .run(&CouncilOfEurope::new(driver, timeouts), store)
                .await
        }
        SourceName::Nato => {
            pipeline
                .run(&Nato::new(driver, timeouts, credentials), store)
                .await
        }
    }
}
