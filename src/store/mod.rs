//! Persistence sink: staged writes committed to a document store in one unit.
//!
//! A [`WriteBatch`] collects upserts addressed by path (`articles/{id}`).
//! [`DocumentStore::commit`] applies the whole batch atomically: after an
//! `Err`, nothing from the batch is durable.
//!
//! # Backends
//!
//! | Backend | Module | Selected by |
//! |---------|--------|-------------|
//! | Firestore | [`firestore`] | default, needs service-account env |
//! | Local JSON directory | [`local`] | `--store-dir` |
//! | In-memory | [`memory`] | `--dry-run`, tests |
//!
//! Each staged write fully replaces the document at its path. When a path is
//! staged twice, the later write wins.

pub mod firestore;
pub mod local;
pub mod memory;

use crate::errors::StoreError;
use crate::models::ArticleRecord;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde_json::{Map, Value};
use tracing::warn;

pub use firestore::{FirestoreStore, ServiceAccount};
pub use local::LocalStore;
pub use memory::MemoryStore;

/// Collection every article document lives in.
pub const ARTICLES_COLLECTION: &str = "articles";
/// Stored field carrying the staging time.
pub const CACHED_AT_FIELD: &str = "cachedAt";

/// Document path for an article id.
pub fn article_path(id: &str) -> String {
    format!("{ARTICLES_COLLECTION}/{id}")
}

/// The full field set of one stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Serialized article, without `cachedAt`.
    pub fields: Map<String, Value>,
    /// When the document was staged.
    pub cached_at: DateTime<Utc>,
}

impl Document {
    /// Document for `record`, stamped now.
    pub fn stamped(record: &ArticleRecord) -> Result<Self, serde_json::Error> {
        let fields = match serde_json::to_value(record)? {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        Ok(Self {
            fields,
            cached_at: Utc::now(),
        })
    }

    /// Fields plus `cachedAt` as an RFC 3339 string.
    pub fn to_json(&self) -> Value {
        let mut fields = self.fields.clone();
        fields.insert(
            CACHED_AT_FIELD.to_string(),
            Value::String(self.cached_at.to_rfc3339()),
        );
        Value::Object(fields)
    }
}

/// One upsert in a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub struct StagedWrite {
    /// Document path, `articles/{id}`.
    pub path: String,
    /// Replacement for whatever is stored at `path`.
    pub document: Document,
}

/// Upserts waiting for a single commit.
#[derive(Debug, Default)]
pub struct WriteBatch {
    writes: Vec<StagedWrite>,
}

impl WriteBatch {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a full replacement of the document at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Document path, e.g. `articles/12345`
    /// * `document` - Complete field set to store there
    ///
    /// A later `set` on the same path wins at commit time.
    pub fn set(&mut self, path: String, document: Document) {
        self.writes.push(StagedWrite { path, document });
    }

    /// Stage `record` at `articles/{id}` with a fresh `cachedAt`.
    ///
    /// Returns `Ok(false)` and stages nothing when the record has no id.
    pub fn stage_article(&mut self, record: &ArticleRecord) -> Result<bool, serde_json::Error> {
        let Some(id) = record.storage_id() else {
            warn!(title = %record.title, "Missing pageid for article; not staged");
            return Ok(false);
        };
        let document = Document::stamped(record)?;
        self.set(article_path(id), document);
        Ok(true)
    }

    /// Number of staged writes, duplicates included.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    #[cfg(test)]
    pub fn writes(&self) -> &[StagedWrite] {
        &self.writes
    }

    /// One write per path, keeping the last one staged, in staging order.
    pub fn into_latest_writes(self) -> Vec<StagedWrite> {
        let mut latest: Vec<StagedWrite> = self
            .writes
            .into_iter()
            .rev()
            .unique_by(|w| w.path.clone())
            .collect();
        latest.reverse();
        latest
    }
}

/// A document store that can commit a [`WriteBatch`] atomically.
pub trait DocumentStore {
    /// Short name of the backend, for logs.
    fn backend_tag(&self) -> &'static str;

    /// Apply every write in `batch`, or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}

/// The backend chosen at startup.
#[derive(Debug)]
pub enum Backend {
    Firestore(FirestoreStore),
    Local(LocalStore),
    Memory(MemoryStore),
}

impl DocumentStore for Backend {
    fn backend_tag(&self) -> &'static str {
        match self {
            Backend::Firestore(store) => store.backend_tag(),
            Backend::Local(store) => store.backend_tag(),
            Backend::Memory(store) => store.backend_tag(),
        }
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        match self {
            Backend::Firestore(store) => store.commit(batch).await,
            Backend::Local(store) => store.commit(batch).await,
            Backend::Memory(store) => store.commit(batch).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;
    use std::time::Duration;

    fn record(id: Option<&str>, description: &str) -> ArticleRecord {
        let mut entry = json!({"normalizedtitle": "Rust", "description": description});
        if let Some(id) = id {
            entry["pageid"] = json!(id);
        }
        ArticleRecord::from_feed_entry(&entry).unwrap()
    }

    #[test]
    fn test_article_path() {
        assert_eq!(article_path("12345"), "articles/12345");
    }

    #[test]
    fn test_stage_article_skips_missing_ids() {
        let mut batch = WriteBatch::new();
        assert!(!batch.stage_article(&record(None, "a")).unwrap());
        assert!(!batch.stage_article(&record(Some(""), "b")).unwrap());
        assert!(batch.stage_article(&record(Some("1"), "c")).unwrap());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.writes()[0].path, "articles/1");
    }

    #[test]
    fn test_stamped_document_carries_full_field_set() {
        let mut rec = record(Some("9"), "lang");
        rec.extra.insert("views".to_string(), json!(10));
        let doc = Document::stamped(&rec).unwrap();

        assert_eq!(doc.fields.get("pageid"), Some(&json!("9")));
        assert_eq!(doc.fields.get("views"), Some(&json!(10)));
        assert!(!doc.fields.contains_key(CACHED_AT_FIELD));
        assert!(doc.to_json().get(CACHED_AT_FIELD).unwrap().is_string());
    }

    #[test]
    fn test_each_staged_write_gets_its_own_timestamp() {
        let mut batch = WriteBatch::new();
        batch.stage_article(&record(Some("1"), "a")).unwrap();
        thread::sleep(Duration::from_millis(5));
        batch.stage_article(&record(Some("2"), "b")).unwrap();
        let writes = batch.writes();
        assert!(writes[0].document.cached_at < writes[1].document.cached_at);
    }

    #[test]
    fn test_into_latest_writes_keeps_last_per_path() {
        let mut batch = WriteBatch::new();
        batch.stage_article(&record(Some("1"), "first")).unwrap();
        batch.stage_article(&record(Some("2"), "other")).unwrap();
        batch.stage_article(&record(Some("1"), "second")).unwrap();
        assert_eq!(batch.len(), 3);

        let latest = batch.into_latest_writes();
        let summary: Vec<_> = latest
            .iter()
            .map(|w| (w.path.as_str(), w.document.fields["description"].as_str().unwrap()))
            .collect();
        assert_eq!(summary, [("articles/2", "other"), ("articles/1", "second")]);
    }
}
