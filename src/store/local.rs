//! Document store backed by a directory of JSON files.
//!
//! # Layout
//!
//! ```text
//! store_dir/
//! └── articles/
//!     ├── 12345.json
//!     └── 67890.json
//! ```
//!
//! Path segments are percent-encoded, so any id maps to a single file name.
//!
//! # Commit
//!
//! Every document is written to a `.json.tmp` sibling first. Only when all
//! of them are on disk are they renamed into place. A failure during the
//! write phase removes the temporaries and leaves the store as it was. A
//! failure during the rename phase keeps the documents already moved and
//! removes every temporary still waiting.

use super::{DocumentStore, StagedWrite, WriteBatch};
use crate::errors::StoreError;
use crate::utils::ensure_writable_dir;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// [`DocumentStore`] writing one pretty-printed JSON file per document.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open (and create if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or is not writable.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        ensure_writable_dir(&root)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", root.display())))?;
        Ok(Self { root })
    }

    /// Directory the store was opened on.
    ///
    /// # Returns
    ///
    /// The root path, as given to [`LocalStore::open`].
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the document at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Document path such as `articles/12345`
    ///
    /// # Returns
    ///
    /// `root/articles/12345.json`, with each segment percent-encoded.
    pub fn file_for(&self, path: &str) -> PathBuf {
        let mut file = self.root.clone();
        let mut segments = path.split('/').peekable();
        while let Some(segment) = segments.next() {
            let segment = urlencoding::encode(segment);
            if segments.peek().is_some() {
                file.push(&*segment);
            } else {
                file.push(format!("{segment}.json"));
            }
        }
        file
    }

    async fn write_temp(&self, write: &StagedWrite) -> Result<(PathBuf, PathBuf), StoreError> {
        let target = self.file_for(&write.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp = target.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(&write.document.to_json())?;
        fs::write(&temp, json).await?;
        Ok((temp, target))
    }
}

impl DocumentStore for LocalStore {
    fn backend_tag(&self) -> &'static str {
        "local"
    }

    #[instrument(level = "info", skip_all, fields(root = %self.root.display(), staged = batch.len()))]
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let writes = batch.into_latest_writes();
        let mut pending = Vec::with_capacity(writes.len());

        for write in &writes {
            match self.write_temp(write).await {
                Ok(paths) => pending.push(paths),
                Err(e) => {
                    error!(path = %write.path, error = %e, "Failed staging document; rolling back");
                    for (temp, _) in &pending {
                        let _ = fs::remove_file(temp).await;
                    }
                    let _ = fs::remove_file(self.file_for(&write.path).with_extension("json.tmp")).await;
                    return Err(e);
                }
            }
        }

        for (i, (temp, target)) in pending.iter().enumerate() {
            if let Err(e) = fs::rename(temp, target).await {
                error!(
                    target = %target.display(),
                    error = %e,
                    renamed = i,
                    "Failed moving document into place; removing temporaries"
                );
                for (leftover, _) in &pending[i..] {
                    let _ = fs::remove_file(leftover).await;
                }
                return Err(e.into());
            }
        }
        info!(documents = pending.len(), "Committed batch to local store");
        Ok(())
    }
}
