//! Article records as they come off the featured feed.
//!
//! Feed entries are loosely shaped JSON. [`is_article`] decides whether an
//! entry is usable at all, and [`ArticleRecord::from_feed_entry`] lifts the
//! fields the pipeline cares about into typed slots while carrying every
//! other source field along untouched.
//!
//! Field names on the wire follow the feed (`pageid`, `normalizedtitle`,
//! `timestamp`), so a stored document looks like the entry it came from plus
//! `categories` and `cachedAt`.

use serde::Serialize;
use serde_json::{Map, Value};

/// Feed key holding the stable page id.
pub const ID_FIELD: &str = "pageid";
/// Feed key holding the normalized display title.
pub const TITLE_FIELD: &str = "normalizedtitle";
const DESCRIPTION_FIELD: &str = "description";
const OBSERVED_AT_FIELD: &str = "timestamp";
/// Keys owned by the pipeline; source values under these names are discarded.
const RESERVED_FIELDS: [&str; 2] = ["categories", "cachedAt"];

/// Returns `true` when `value` is an object whose `normalizedtitle` is a string.
///
/// Everything else (null, arrays, scalars, objects without a string title)
/// is rejected. The title may be empty.
pub fn is_article(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|entry| entry.get(TITLE_FIELD))
        .is_some_and(Value::is_string)
}

/// One featured or most-read article, ready for enrichment and storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleRecord {
    /// Source page id, stringified. `None` when the entry had no usable id.
    #[serde(rename = "pageid", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "normalizedtitle")]
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "timestamp", skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    /// Remaining source fields (`titles`, `thumbnail`, `views`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ArticleRecord {
    /// Build a record from a raw feed entry, or `None` if [`is_article`] rejects it.
    ///
    /// Numeric and string page ids are both accepted and stored as strings.
    /// A `description` or `timestamp` that is not a string stays in
    /// [`extra`](Self::extra) under its original key.
    pub fn from_feed_entry(entry: &Value) -> Option<Self> {
        if !is_article(entry) {
            return None;
        }
        let mut extra = entry.as_object()?.clone();

        let title = match extra.remove(TITLE_FIELD) {
            Some(Value::String(title)) => title,
            _ => return None,
        };
        let id = match extra.remove(ID_FIELD) {
            Some(Value::String(id)) => Some(id),
            Some(Value::Number(id)) => Some(id.to_string()),
            Some(other) => {
                extra.insert(ID_FIELD.to_string(), other);
                None
            }
            None => None,
        };
        let description = take_string(&mut extra, DESCRIPTION_FIELD);
        let observed_at = take_string(&mut extra, OBSERVED_AT_FIELD);
        for key in RESERVED_FIELDS {
            extra.remove(key);
        }

        Some(Self {
            id,
            title,
            description,
            observed_at,
            categories: None,
            extra,
        })
    }

    /// Storage identifier, or `None` if the id is missing or empty.
    pub fn storage_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Attach enrichment output. An empty list leaves `categories` unset.
    pub fn set_categories(&mut self, categories: Vec<String>) {
        self.categories = (!categories.is_empty()).then_some(categories);
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            fields.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}
