//! Date-windowed retrieval from the Wikimedia featured feed.
//!
//! For each day in the window the loop requests
//! `{feed_base}/{YYYY}/{MM}/{DD}` until a usable JSON body comes back, then pulls
//! articles out of three facets in a fixed order:
//!
//! 1. `tfa`, the single "today's featured article"
//! 2. `mostread.articles`
//! 3. `featured.articles`
//!
//! # Retry budget
//!
//! Every attempt, successful or not, spends one unit of a [`RetryBudget`]
//! shared by the whole window. The budget is never refilled, so a day that
//! burns through it leaves the remaining days unattempted. Callers see a
//! shorter list, not an error.
//!
//! # Date walk
//!
//! One date accumulator is shifted back by `i` months on iteration `i`, so
//! the offsets compound: 0, 1, 3, 6, 10, ... months behind the anchor.
//! Shifts use calendar rollover (March 31 minus one month is March 2 or 3,
//! not the end of February).

use crate::http::FetchJson;
use crate::models::ArticleRecord;
use chrono::{Datelike, Days, NaiveDate};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Default featured feed base URL (English Wikipedia).
pub const FEED_API: &str = "https://api.wikimedia.org/feed/v1/wikipedia/en/featured";
pub const DAYS_TO_FETCH: u32 = 10;
/// Default attempts shared by the whole window.
pub const MAX_ITERATIONS: usize = 1000;
pub const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Where and how far back to read the feed.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Feed endpoint without the trailing date path.
    pub base_url: String,
    /// Number of days to walk back from the anchor.
    pub days: u32,
    /// Pause after a failed attempt before the next one.
    pub retry_delay: Duration,
}

/// Attempts left for the whole window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: usize,
}

impl RetryBudget {
    /// Creates a budget for the whole window.
    ///
    /// # Arguments
    ///
    /// * `attempts` - Total fetch attempts allowed, successful ones included
    ///
    /// # Returns
    ///
    /// A `RetryBudget` with `attempts` units remaining.
    pub fn new(attempts: usize) -> Self {
        Self { remaining: attempts }
    }

    /// Spend one attempt. Returns `false` once the budget is exhausted.
    pub fn take(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    /// Attempts not yet spent.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Whether every attempt has been spent.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

/// Shift `date` back by `months`, rolling an overflowing day into the next month.
///
/// Returns `None` only if the result falls outside chrono's date range.
pub fn shift_months_back(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    let total = date.year() * 12 + date.month0() as i32 - i32::try_from(months).ok()?;
    let first = NaiveDate::from_ymd_opt(total.div_euclid(12), total.rem_euclid(12) as u32 + 1, 1)?;
    first.checked_add_days(Days::new(u64::from(date.day() - 1)))
}

/// Feed URL for one day, in `YYYY/MM/DD` form.
pub fn feed_url(base_url: &str, date: NaiveDate) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), date.format("%Y/%m/%d"))
}

/// Pull the valid articles out of one day's feed body, in facet order.
///
/// Missing facets, and facets whose `articles` is missing or `null`,
/// contribute nothing. A body that is not an object (an array, a string)
/// has no facets and yields an empty day.
///
/// # Returns
///
/// `None` when the body is `null` or a facet's `articles` is present but is
/// not a list. The loop treats `None` like a failed fetch and retries the day.
pub fn extract_day(body: &Value) -> Option<Vec<ArticleRecord>> {
    if body.is_null() {
        return None;
    }
    let Some(body) = body.as_object() else {
        return Some(Vec::new());
    };

    let tfa = body.get("tfa").into_iter();
    let most_read = facet_articles(body.get("mostread"))?;
    let featured = facet_articles(body.get("featured"))?;

    Some(
        tfa.chain(most_read)
            .chain(featured)
            .filter_map(ArticleRecord::from_feed_entry)
            .collect(),
    )
}

/// Entries of a facet's `articles` list; `None` if `articles` is not a list.
fn facet_articles(facet: Option<&Value>) -> Option<&[Value]> {
    match facet.and_then(|f| f.get("articles")) {
        None | Some(Value::Null) => Some(&[][..]),
        Some(Value::Array(entries)) => Some(entries.as_slice()),
        Some(_) => None,
    }
}

/// Fetch every day in the window, most recent first.
///
/// Never fails: days that could not be fetched before the budget ran out
/// are simply absent from the result.
#[instrument(level = "info", skip(fetcher, budget), fields(days = settings.days, base = %settings.base_url))]
pub async fn fetch_window<F: FetchJson>(
    fetcher: &F,
    settings: &FeedSettings,
    anchor: NaiveDate,
    budget: &mut RetryBudget,
) -> Vec<ArticleRecord> {
    let mut date = anchor;
    let mut articles = Vec::new();

    for i in 0..settings.days {
        date = match shift_months_back(date, i) {
            Some(shifted) => shifted,
            None => {
                warn!(%date, offset = i, "Date walk left the calendar range; stopping");
                break;
            }
        };
        let url = feed_url(&settings.base_url, date);

        while budget.take() {
            match fetcher.fetch_json(&url).await {
                Ok(body) => match extract_day(&body) {
                    Some(day) => {
                        info!(%date, count = day.len(), remaining = budget.remaining(), "Fetched feed day");
                        articles.extend(day);
                        break;
                    }
                    None => {
                        sleep(settings.retry_delay).await;
                        warn!(%date, %url, "Feed body is malformed; retrying");
                    }
                },
                Err(e) => {
                    sleep(settings.retry_delay).await;
                    warn!(%date, %url, error = %e, "Error grabbing articles; retrying");
                }
            }
        }

        if budget.is_exhausted() {
            debug!(%date, offset = i, "Retry budget exhausted");
        }
    }

    info!(count = articles.len(), "Collected candidate articles");
    articles
}
