//! In-memory document store for dry runs and tests.

use super::{Document, DocumentStore, WriteBatch};
use crate::errors::StoreError;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// [`DocumentStore`] keeping documents in a map keyed by path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<String, Document>>,
    commits: AtomicUsize,
    reject_commits: bool,
}

impl MemoryStore {
    /// An empty store that accepts every commit.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every commit fails and leaves it unchanged.
    #[cfg(test)]
    pub fn rejecting() -> Self {
        Self {
            reject_commits: true,
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn document(&self, path: &str) -> Option<Document> {
        self.documents.lock().ok()?.get(path).cloned()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.documents.lock().map(|docs| docs.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::Relaxed)
    }
}

impl DocumentStore for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if self.reject_commits {
            return Err(StoreError::Commit("store is rejecting commits".to_string()));
        }
        let staged = batch.len();
        let mut documents = self
            .documents
            .lock()
            .map_err(|_| StoreError::Commit("memory store lock poisoned".to_string()))?;
        for write in batch.into_latest_writes() {
            documents.insert(write.path, write.document);
        }
        self.commits.fetch_add(1, Ordering::Relaxed);
        info!(staged, stored = documents.len(), "Committed batch in memory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArticleRecord;
    use serde_json::json;
    use std::thread;
    use std::time::Duration;

    fn record(id: &str, description: &str) -> ArticleRecord {
        ArticleRecord::from_feed_entry(
            &json!({"pageid": id, "normalizedtitle": "T", "description": description}),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_restaging_same_id_replaces_document() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.stage_article(&record("12345", "before")).unwrap();
        thread::sleep(Duration::from_millis(5));
        batch.stage_article(&record("12345", "after")).unwrap();
        let first_stamp = batch.writes()[0].document.cached_at;

        store.commit(batch).await.unwrap();

        assert_eq!(store.len(), 1);
        let doc = store.document("articles/12345").unwrap();
        assert_eq!(doc.fields["description"], json!("after"));
        assert!(doc.cached_at > first_stamp);
    }

    #[tokio::test]
    async fn test_later_commit_replaces_field_set() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        let mut first = record("1", "a");
        first.extra.insert("views".to_string(), json!(5));
        batch.stage_article(&first).unwrap();
        store.commit(batch).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.stage_article(&record("1", "b")).unwrap();
        store.commit(batch).await.unwrap();

        let doc = store.document("articles/1").unwrap();
        assert!(!doc.fields.contains_key("views"));
        assert_eq!(store.commits(), 2);
    }

    #[tokio::test]
    async fn test_rejecting_store_writes_nothing() {
        let store = MemoryStore::rejecting();
        let mut batch = WriteBatch::new();
        batch.stage_article(&record("1", "a")).unwrap();

        assert!(matches!(store.commit(batch).await, Err(StoreError::Commit(_))));
        assert!(store.is_empty());
        assert_eq!(store.commits(), 0);
    }
}
