//! Key layout and an in-memory [`KeyValueStore`].
//!
//! Entry records live under `blog:{blog_id}:entry:{normalized path}` and the
//! blog's cache timestamp under `blog:{blog_id}:cache_id`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::contract::{KeyValueStore, StoreError};

/// Normalise a folder path into the form used for addressing.
///
/// Providers disagree on case and on slashes, so `/Posts//Hello.txt/` and
/// `posts/hello.txt` address the same entry.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segments.join("/")).to_lowercase()
}

pub fn entry_prefix(blog_id: &str) -> String {
    format!("blog:{blog_id}:entry:")
}

pub fn entry_key(blog_id: &str, path: &str) -> String {
    format!("{}{}", entry_prefix(blog_id), normalize_path(path))
}

pub fn cache_id_key(blog_id: &str) -> String {
    format!("blog:{blog_id}:cache_id")
}

/// Extracts the blog id back out of an entry key.
pub fn blog_id_from_entry_key(key: &str) -> Option<&str> {
    let rest = key.strip_prefix("blog:")?;
    let (blog_id, tail) = rest.split_once(':')?;
    tail.starts_with("entry:").then_some(blog_id)
}

/// Process-local store. Everything is lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-filled with the given records.
    pub fn from_map(data: BTreeMap<String, String>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Copy of every record, in key order.
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.data.read().await.clone()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
