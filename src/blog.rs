//! Blog-level settings the sync core needs, and the blog's cache timestamp.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contract::{KeyValueStore, StoreError};
use crate::store::cache_id_key;

/// The slice of a blog record the pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blog {
    pub id: String,
    /// Enabled plugins, in the order they run.
    #[serde(default)]
    pub plugins: Vec<String>,
    /// Offset applied to dates written without one (e.g. `Date: 2024-05-01`).
    #[serde(default)]
    pub timezone_offset_minutes: i32,
}

impl Blog {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            plugins: Vec::new(),
            timezone_offset_minutes: 0,
        }
    }

    pub fn with_plugins<I, S>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plugins = plugins.into_iter().map(Into::into).collect();
        self
    }

    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.timezone_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

/// Current cache id for a blog, or 0 if it was never bumped.
pub async fn cache_id(store: &dyn KeyValueStore, blog_id: &str) -> Result<i64, StoreError> {
    Ok(store
        .get(&cache_id_key(blog_id))
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

/// Refreshes the blog's cache id. The new value is never lower than the old
/// one plus one, even if the clock went backwards.
pub async fn bump_cache_id(
    store: &dyn KeyValueStore,
    blog_id: &str,
    now: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let previous = cache_id(store, blog_id).await?;
    let next = now.timestamp_millis().max(previous + 1);
    store.set(&cache_id_key(blog_id), next.to_string()).await?;
    debug!(blog_id, cache_id = next, "[ENTRY] Bumped blog cache id");
    Ok(next)
}
