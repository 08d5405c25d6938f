//! # contract: interfaces to the collaborators the sync core depends on
//!
//! The synchronisation core never talks to Dropbox, Google Drive, iCloud or a
//! database directly. It needs two narrow capabilities:
//!
//! - [`Provider`]: list the files in a blog's folder and read one of them.
//! - [`KeyValueStore`]: the persistence substrate entries are written to.
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall` so tests can script providers and
//!   stores deterministically (`MockProvider`, `MockKeyValueStore`).
//!
//! ## Adding New Providers
//! - Implement [`Provider`] for the client. Listings may include junk; the
//!   reconciler runs every path through [`crate::ignore::should_ignore`].
//! - Map every upstream failure to a [`ProviderError`]. The core does not retry;
//!   the caller re-runs the sync, which is idempotent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// One file in a blog's remote folder, as reported by a provider listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Path relative to the blog folder, with a leading `/`.
    pub path: String,
    /// Last modification time reported by the provider.
    pub modified: DateTime<Utc>,
    /// Content hash. Any stable digest works as long as one provider is consistent.
    pub hash: String,
    pub size: u64,
}

/// Failure talking to a provider. Treated as transient: the caller retries.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("provider I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("provider request failed: {0}")]
    Other(String),
}

/// Failure reading or writing the key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend failed: {0}")]
    Backend(String),
    #[error("stored record under {key} is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Trait for reading a blog's folder from wherever it is synced from.
/// Implemented by provider clients (local folder, cloud bridges) and by mocks.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// List every file currently in the blog's folder.
    async fn list_remote(&self, blog_id: &str) -> Result<Vec<RemoteFile>, ProviderError>;

    /// Read the contents of one file.
    async fn read_remote(&self, blog_id: &str, path: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Trait for the persistence substrate beneath the entry model.
///
/// Values are opaque strings (the entry model stores JSON). Each `set` must be
/// atomic for its key; no cross-key transactions are required.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// All keys starting with `prefix`, in ascending order.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}
