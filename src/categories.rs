//! Category enrichment from the Wikipedia query API.
//!
//! For a normalized title the lookup asks for the page's non-hidden
//! categories, strips the `Category:` prefix, and drops every category whose
//! name contains the title itself (case-insensitive). "Ada Lovelace" thus
//! loses "Ada Lovelace family" but keeps "English mathematicians".
//!
//! Enrichment is best-effort. Every failure, whether network, non-JSON body,
//! or unexpected payload shape, is logged and yields an empty list.

use crate::http::FetchJson;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

/// Default MediaWiki API endpoint (English Wikipedia).
pub const WIKI_API: &str = "https://en.wikipedia.org/w/api.php";
pub const CATEGORY_PREFIX: &str = "Category:";

/// Ways a categories response can deviate from the expected shape.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("response has no `query` object")]
    MissingQuery,
    #[error("response has no `query.pages` object")]
    MissingPages,
    #[error("`query.pages` holds no page")]
    NoPage,
    #[error("page {page} has no `categories` list")]
    MissingCategories { page: String },
    #[error("category entry {index} has no string `title`")]
    MalformedCategory { index: usize },
}

impl ShapeError {
    /// Shapes the API legitimately returns for uncategorised or missing pages.
    fn is_expected(&self) -> bool {
        !matches!(self, ShapeError::MalformedCategory { .. })
    }
}

/// Query URL asking for every non-hidden category of `title`.
pub fn categories_url(api_base: &str, title: &str) -> Result<Url, url::ParseError> {
    Url::parse_with_params(
        api_base,
        &[
            ("action", "query"),
            ("titles", title),
            ("prop", "categories"),
            ("cllimit", "max"),
            ("clshow", "!hidden"),
            ("format", "json"),
            ("origin", "*"),
        ],
    )
}

/// Raw category titles of whichever single page the response carries.
///
/// The API keys pages by an opaque id (`"-1"` for missing pages), so the
/// first key present is used.
pub fn page_categories(body: &Value) -> Result<Vec<String>, ShapeError> {
    let Some(query) = body.get("query") else {
        return Err(ShapeError::MissingQuery);
    };
    let Some(pages) = query.get("pages").and_then(Value::as_object) else {
        return Err(ShapeError::MissingPages);
    };
    let Some((page_key, page)) = pages.iter().next() else {
        return Err(ShapeError::NoPage);
    };
    let Some(categories) = page.get("categories").and_then(Value::as_array) else {
        return Err(ShapeError::MissingCategories {
            page: page_key.clone(),
        });
    };

    categories
        .iter()
        .enumerate()
        .map(|(index, c)| {
            c.get("title")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(ShapeError::MalformedCategory { index })
        })
        .collect()
}

/// Strip the namespace prefix and drop categories that name the article itself.
pub fn without_eponymous(categories: Vec<String>, title: &str) -> Vec<String> {
    let needle = title.to_lowercase();
    categories
        .into_iter()
        .map(|c| c.replacen(CATEGORY_PREFIX, "", 1))
        .filter(|name| !name.to_lowercase().contains(&needle))
        .collect()
}

/// Look up the filtered categories for `title`. Never fails.
#[instrument(level = "info", skip(fetcher, api_base))]
pub async fn categories_for<F: FetchJson>(fetcher: &F, api_base: &str, title: &str) -> Vec<String> {
    let url = match categories_url(api_base, title) {
        Ok(url) => url,
        Err(e) => {
            warn!(api_base, error = %e, "Invalid categories endpoint");
            return Vec::new();
        }
    };

    let body = match fetcher.fetch_json(url.as_str()).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "Failed to fetch categories");
            return Vec::new();
        }
    };

    match page_categories(&body) {
        Ok(raw) => {
            let total = raw.len();
            let kept = without_eponymous(raw, title);
            debug!(total, kept = kept.len(), "Resolved categories");
            kept
        }
        Err(e) if e.is_expected() => {
            debug!(reason = %e, "No categories in response");
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "Malformed categories response");
            Vec::new()
        }
    }
}
