//! # Featured Article Sync
//!
//! Pulls a rolling window of featured and most-read articles from the
//! Wikimedia feed API. It can tag each article with its Wikipedia
//! categories, and it upserts everything into a document store in a single
//! atomic batch.
//!
//! ## Usage
//!
//! ```sh
//! # Firestore, credentials from the environment
//! featured_article_sync
//!
//! # Local JSON files, no category lookups
//! featured_article_sync --store-dir ./articles --no-enrich
//! ```
//!
//! ## Architecture
//!
//! 1. **Feed**: walk the day window, retrying failed days from a shared budget
//! 2. **Categories**: look up non-hidden categories per article (optional)
//! 3. **Store**: stage one upsert per article and commit the batch once
//!
//! On success the process prints `Stored N articles.` and exits 0. Any
//! failure is logged, printed, and turned into a non-zero exit status.

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod categories;
mod cli;
mod errors;
mod feed;
mod http;
mod models;
mod store;
mod sync;
mod utils;

use cli::Cli;
use http::HttpFetcher;
use store::{Backend, DocumentStore, FirestoreStore, LocalStore, MemoryStore};

#[tokio::main]
async fn main() -> ExitCode {
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
    info!("featured_article_sync starting up");

    let args = Cli::parse();
    debug!(days = args.days, dry_run = args.dry_run, store_dir = ?args.store_dir, "Parsed CLI arguments");

    match run(&args).await {
        Ok(count) => {
            let elapsed = start_time.elapsed();
            info!(count, ?elapsed, "Execution complete");
            println!("Stored {count} articles.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "sync failed");
            eprintln!("sync failed! {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Cli) -> Result<usize, Box<dyn Error>> {
    let store = open_store(args).await?;
    info!(backend = store.backend_tag(), "Document store ready");

    let fetcher = HttpFetcher::new()?;
    let settings = args.sync_settings();
    let anchor = Utc::now().date_naive();

    let count = sync::update_articles(&fetcher, &store, &settings, anchor).await?;
    Ok(count)
}

/// Build the one store handle this process uses.
async fn open_store(args: &Cli) -> Result<Backend, Box<dyn Error>> {
    if args.dry_run {
        return Ok(Backend::Memory(MemoryStore::new()));
    }
    if let Some(dir) = &args.store_dir {
        let store = LocalStore::open(dir).await?;
        info!(root = %store.root().display(), "Using local document store");
        return Ok(Backend::Local(store));
    }
    let account = args.service_account()?;
    info!(project = %account.project_id, "Using Firestore document store");
    Ok(Backend::Firestore(FirestoreStore::new(account)?))
}
