//! The sync run: feed window → categories → one batch commit.
//!
//! Everything is awaited in order. Each feed day, each category lookup, and
//! the final commit suspend the run one at a time.
//!
//! A record without a page id is skipped before enrichment, so no lookup is
//! spent on it. Enrichment problems never stop a run. The only fatal step is
//! the commit, and after a failed commit nothing is stored, even though the
//! staged count was nonzero.

use crate::categories::categories_for;
use crate::errors::SyncError;
use crate::feed::{FeedSettings, RetryBudget, fetch_window};
use crate::http::FetchJson;
use crate::models::ArticleRecord;
use crate::store::{DocumentStore, WriteBatch};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use tracing::{error, info, instrument, warn};

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Feed endpoint, window size and retry delay.
    pub feed: FeedSettings,
    /// Attempts shared by every day of the window.
    pub max_iterations: usize,
    /// MediaWiki API endpoint for category lookups.
    pub wiki_api: String,
    /// Look up categories for each article.
    pub enrich: bool,
}

/// Fetch the window ending at `anchor`, enrich, and commit to `store`.
///
/// Returns the number of staged writes. Writes that share an id are all
/// counted.
///
/// # Errors
///
/// Fails if a record cannot be encoded or the commit is rejected. In both
/// cases nothing from this run is stored.
#[instrument(level = "info", skip_all, fields(backend = store.backend_tag(), %anchor, enrich = settings.enrich))]
pub async fn update_articles<F, S>(
    fetcher: &F,
    store: &S,
    settings: &SyncSettings,
    anchor: NaiveDate,
) -> Result<usize, SyncError>
where
    F: FetchJson,
    S: DocumentStore,
{
    let mut budget = RetryBudget::new(settings.max_iterations);
    let candidates = fetch_window(fetcher, &settings.feed, anchor, &mut budget).await;
    let total = candidates.len();

    let enriched: Vec<ArticleRecord> = stream::iter(candidates)
        .filter(|record| {
            let keep = record.storage_id().is_some();
            if !keep {
                warn!(title = %record.title, "Missing pageid for article; skipping");
            }
            std::future::ready(keep)
        })
        .then(|mut record| async move {
            if settings.enrich {
                let categories = categories_for(fetcher, &settings.wiki_api, &record.title).await;
                record.set_categories(categories);
            }
            record
        })
        .collect()
        .await;

    let mut batch = WriteBatch::new();
    for record in &enriched {
        batch.stage_article(record).map_err(|source| SyncError::Encode {
            id: record.id.clone().unwrap_or_default(),
            source,
        })?;
    }

    let staged = batch.len();
    if batch.is_empty() {
        warn!(candidates = total, "No articles staged; committing empty batch");
    } else {
        info!(candidates = total, staged, "Committing batch");
    }
    if let Err(source) = store.commit(batch).await {
        error!(staged, error = %source, "Commit failed; no articles stored");
        return Err(SyncError::Commit { staged, source });
    }

    info!(staged, "Sync complete");
    Ok(staged)
}
