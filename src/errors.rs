//! Error types for the persistence sink and the sync run.
//!
//! Fetch and enrichment failures never surface here: the feed loop retries
//! them and the category lookup absorbs them. What remains are the failures
//! that end a run.

use std::io;

use thiserror::Error;

/// Failures raised by a [`DocumentStore`](crate::store::DocumentStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store credentials are unusable: {0}")]
    Credentials(String),
    #[error("store is unavailable: {0}")]
    Unavailable(String),
    #[error("access token exchange failed: {0}")]
    Token(String),
    #[error("batch commit rejected: {0}")]
    Commit(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Failures that end a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Nothing was written, even though `staged` writes were queued.
    #[error("commit of {staged} staged articles failed: {source}")]
    Commit {
        staged: usize,
        #[source]
        source: StoreError,
    },
    #[error("article {id} could not be encoded: {source}")]
    Encode {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}
