//! `LocalFolder`: a [`Provider`] over directories on this machine.
//!
//! Each configured blog maps to one directory. Listings walk the directory
//! tree, skip anything the ignore rules reject (hidden folders included, so
//! `.git` is never descended into), and hash every file with SHA-256.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use blot_sync::contract::{Provider, ProviderError, RemoteFile};
use blot_sync::ignore::should_ignore;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct LocalFolder {
    folders: BTreeMap<String, PathBuf>,
}

impl LocalFolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_folder(mut self, blog_id: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        self.folders.insert(blog_id.into(), folder.into());
        self
    }

    fn folder(&self, blog_id: &str) -> Result<&PathBuf, ProviderError> {
        self.folders
            .get(blog_id)
            .ok_or_else(|| ProviderError::Other(format!("no folder configured for blog {blog_id}")))
    }
}

fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Blog-relative path with `/` separators and a leading `/`.
fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!segments.is_empty()).then(|| format!("/{}", segments.join("/")))
}

fn visit_dir(root: &Path, dir: &Path, results: &mut Vec<RemoteFile>) -> Result<(), ProviderError> {
    for entry_res in std::fs::read_dir(dir)? {
        let entry = entry_res?;
        let path = entry.path();
        let Some(rel) = relative(root, &path) else {
            continue;
        };
        if should_ignore(&rel) {
            debug!(path = %rel, "Skipping ignored path");
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            visit_dir(root, &path, results)?;
        } else if file_type.is_file() {
            let metadata = entry.metadata()?;
            let content = std::fs::read(&path)?;
            let modified: DateTime<Utc> = metadata.modified()?.into();
            results.push(RemoteFile {
                path: rel,
                modified,
                hash: hash_bytes(&content),
                size: metadata.len(),
            });
        }
    }
    Ok(())
}

/// Joins a blog-relative path onto `root`, refusing anything that would
/// escape it.
fn contained(root: &Path, path: &str) -> Result<PathBuf, ProviderError> {
    let rel = Path::new(path.trim_start_matches('/'));
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(ProviderError::NotFound(path.to_string()));
    }
    Ok(root.join(rel))
}

#[async_trait]
impl Provider for LocalFolder {
    async fn list_remote(&self, blog_id: &str) -> Result<Vec<RemoteFile>, ProviderError> {
        let root = self.folder(blog_id)?.clone();
        let files = tokio::task::spawn_blocking(move || {
            let mut results = Vec::new();
            visit_dir(&root, &root, &mut results).map(|_| results)
        })
        .await
        .map_err(|e| ProviderError::Other(format!("listing task failed: {e}")))??;
        info!(blog_id, files = files.len(), "Listed local folder");
        Ok(files)
    }

    async fn read_remote(&self, blog_id: &str, path: &str) -> Result<Vec<u8>, ProviderError> {
        let full = contained(self.folder(blog_id)?, path)?;
        match tokio::fs::read(&full).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ProviderError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
