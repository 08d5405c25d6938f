//! High-level pipeline: reconciles a blog's folder listing against its entries.
//!
//! A pass over one blog:
//!   - Drops ignored paths and folds text bundles into their primary document
//!   - Diffs the listing against the persisted entries ([`plan`]): creates,
//!     updates, deletes, and renames detected by equal content hash. Files
//!     with no entry format only feed dependency tracking
//!   - Applies each operation: read the file, build it, write the entry
//!   - Aggregates a [`SyncReport`] of what was applied and what failed
//!
//! # Concurrency
//! At most one pass runs per blog; see [`ContentionMode`] for what a second
//! request does. Different blogs reconcile independently.
//!
//! # Error Handling
//! A failing operation never aborts the pass. It is logged, skipped, and listed
//! in [`SyncReport::failed`]; the entry keeps its previous state. Re-running a
//! pass with the same listing is safe and converges.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::blog::Blog;
use crate::build::format::{bundle_root, is_bundle_document};
use crate::build::{ConvertError, Format, Pipeline};
use crate::config::{ContentionMode, SyncConfig};
use crate::contract::{Provider, ProviderError, RemoteFile};
use crate::entry::{Entries, Entry, EntryError, EntryFields, ListFilter};
use crate::ignore::should_ignore;
use crate::locks::KeyedLocks;
use crate::store::normalize_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpKind {
    Delete,
    Rename,
    Create,
    Update,
}

/// One change to apply. For renames `old_path` is where the entry was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OpKind,
    pub path: String,
    pub old_path: Option<String>,
}

impl Operation {
    fn new(kind: OpKind, path: &str) -> Self {
        Self {
            kind,
            path: path.to_string(),
            old_path: None,
        }
    }

    fn rename(old_path: &str, path: &str) -> Self {
        Self {
            kind: OpKind::Rename,
            path: path.to_string(),
            old_path: Some(old_path.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedOperation {
    pub operation: Operation,
    pub error: String,
}

/// Outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub blog_id: String,
    pub applied: Vec<Operation>,
    pub failed: Vec<FailedOperation>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_paths(&self) -> Vec<&str> {
        self.failed
            .iter()
            .map(|f| f.operation.path.as_str())
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("blog {blog_id} is already synchronising")]
    LockContention { blog_id: String },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Entry(#[from] EntryError),
}

/// Why a single operation failed.
#[derive(Debug, thiserror::Error)]
enum OperationError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error(transparent)]
    Entry(#[from] EntryError),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Folds the members of each `*.textbundle` into one descriptor addressed by
/// the bundle's primary document. The folded hash covers every member, so
/// changing a sidecar asset updates the bundle's entry. Bundles without a
/// primary document are dropped.
pub fn collapse_bundles(listing: Vec<RemoteFile>) -> Vec<RemoteFile> {
    let mut plain = Vec::new();
    let mut bundles: BTreeMap<String, Vec<RemoteFile>> = BTreeMap::new();
    for file in listing {
        match bundle_root(&file.path) {
            Some(root) => bundles.entry(normalize_path(root)).or_default().push(file),
            None => plain.push(file),
        }
    }

    for (root, mut members) in bundles {
        members.sort_by(|a, b| normalize_path(&a.path).cmp(&normalize_path(&b.path)));
        let Some(primary) = members.iter().find(|m| is_bundle_document(&m.path)) else {
            debug!(bundle = %root, "[SYNC] Text bundle has no primary document, skipping");
            continue;
        };
        let mut hasher = Sha256::new();
        for member in &members {
            hasher.update(normalize_path(&member.path).as_bytes());
            hasher.update([0]);
            hasher.update(member.hash.as_bytes());
            hasher.update([0]);
        }
        plain.push(RemoteFile {
            path: primary.path.clone(),
            modified: members
                .iter()
                .map(|m| m.modified)
                .max()
                .unwrap_or(primary.modified),
            hash: format!("{:x}", hasher.finalize()),
            size: members.iter().map(|m| m.size).sum(),
        });
    }
    plain
}

/// Filters a raw provider listing down to visible files, one descriptor per
/// normalised path. Files with no entry format stay in, as possible
/// dependencies of other entries.
pub fn prepare_listing(listing: Vec<RemoteFile>) -> Vec<RemoteFile> {
    let visible: Vec<RemoteFile> = listing
        .into_iter()
        .filter(|file| !should_ignore(&file.path))
        .collect();
    let unique: BTreeMap<String, RemoteFile> = collapse_bundles(visible)
        .into_iter()
        .map(|file| (normalize_path(&file.path), file))
        .collect();
    unique.into_values().collect()
}

fn becomes_entry(path: &str) -> bool {
    Format::resolve(path).is_some()
}

fn changed(entry: &Entry, file: &RemoteFile) -> bool {
    entry.hash != file.hash || entry.modified != file.modified || entry.path != file.path
}

/// Hashes of the dependencies in `dependencies` that are plain files rather
/// than entries, as they appear in `files`.
fn dependency_hashes<'a>(
    dependencies: impl IntoIterator<Item = &'a String>,
    files: &BTreeMap<String, &RemoteFile>,
) -> BTreeMap<String, String> {
    dependencies
        .into_iter()
        .map(|dep| normalize_path(dep))
        .filter(|dep| !becomes_entry(dep))
        .filter_map(|dep| files.get(&dep).map(|f| (dep, f.hash.clone())))
        .collect()
}

/// The pure diff between known entries and a prepared listing.
///
/// Deleted paths whose content hash equals a created path's hash become one
/// rename (matched in path order). Entries that depend on any changed path are
/// rebuilt too, including plain files whose hash differs from the one recorded
/// at the entry's last build. Operations come out ordered deletes, renames,
/// creates, updates, then by path.
pub fn plan(known: &[Entry], listing: &[RemoteFile]) -> Vec<Operation> {
    let live: BTreeMap<String, &Entry> = known
        .iter()
        .filter(|e| !e.deleted)
        .map(|e| (normalize_path(&e.path), e))
        .collect();
    let files: BTreeMap<String, &RemoteFile> = listing
        .iter()
        .map(|f| (normalize_path(&f.path), f))
        .collect();
    let remote: BTreeMap<String, &RemoteFile> = files
        .iter()
        .filter(|(key, _)| becomes_entry(key))
        .map(|(key, f)| (key.clone(), *f))
        .collect();

    let mut operations = Vec::new();
    let mut creates: Vec<&RemoteFile> = Vec::new();
    for (key, file) in &remote {
        match live.get(key) {
            None => creates.push(*file),
            Some(entry) if changed(entry, file) => {
                operations.push(Operation::new(OpKind::Update, &file.path))
            }
            Some(_) => {}
        }
    }

    for (key, entry) in &live {
        if remote.contains_key(key) {
            continue;
        }
        let matched = (!entry.hash.is_empty())
            .then(|| creates.iter().position(|f| f.hash == entry.hash))
            .flatten();
        match matched {
            Some(idx) => {
                let file = creates.remove(idx);
                operations.push(Operation::rename(&entry.path, &file.path));
            }
            None => operations.push(Operation::new(OpKind::Delete, &entry.path)),
        }
    }
    operations.extend(
        creates
            .into_iter()
            .map(|f| Operation::new(OpKind::Create, &f.path)),
    );

    let touched: BTreeSet<String> = operations
        .iter()
        .flat_map(|op| std::iter::once(&op.path).chain(op.old_path.as_ref()))
        .map(|p| normalize_path(p))
        .collect();
    for (key, entry) in &live {
        if touched.contains(key) || !remote.contains_key(key) {
            continue;
        }
        let entry_dependency_touched = entry
            .dependencies
            .iter()
            .any(|dep| touched.contains(&normalize_path(dep)));
        if entry_dependency_touched
            || dependency_hashes(&entry.dependencies, &files) != entry.dependency_hashes
        {
            operations.push(Operation::new(OpKind::Update, &entry.path));
        }
    }

    operations.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| normalize_path(&a.path).cmp(&normalize_path(&b.path)))
    });
    operations
}

/// Applies folder changes to the entry model. Construct one per process.
pub struct Reconciler {
    entries: Entries,
    provider: Arc<dyn Provider>,
    pipeline: Pipeline,
    config: SyncConfig,
    locks: KeyedLocks,
}

impl Reconciler {
    pub fn new(
        entries: Entries,
        provider: Arc<dyn Provider>,
        pipeline: Pipeline,
        config: SyncConfig,
    ) -> Self {
        Self {
            entries,
            provider,
            pipeline,
            config,
            locks: KeyedLocks::new(),
        }
    }

    pub fn entries(&self) -> &Entries {
        &self.entries
    }

    /// Lists the blog's folder through the provider, then reconciles.
    pub async fn sync(&self, blog: &Blog) -> Result<SyncReport, SyncError> {
        info!(blog_id = %blog.id, "[SYNC] Listing remote folder");
        let listing = self.provider.list_remote(&blog.id).await.map_err(|e| {
            error!(blog_id = %blog.id, error = ?e, "[SYNC][ERROR] Listing failed");
            e
        })?;
        self.reconcile(blog, listing).await
    }

    /// Reconciles `listing` against the blog's entries and applies the result.
    pub async fn reconcile(
        &self,
        blog: &Blog,
        listing: Vec<RemoteFile>,
    ) -> Result<SyncReport, SyncError> {
        let _guard = match self.config.contention {
            ContentionMode::Queue => self.locks.lock(&blog.id).await,
            ContentionMode::Reject => match self.locks.try_lock(&blog.id) {
                Some(guard) => guard,
                None => {
                    warn!(blog_id = %blog.id, "[SYNC] Pass already running, rejecting");
                    return Err(SyncError::LockContention {
                        blog_id: blog.id.clone(),
                    });
                }
            },
        };

        let listing = prepare_listing(listing);
        let known = self.entries.list(&blog.id, ListFilter::All).await?;
        let operations = plan(&known, &listing);
        info!(
            blog_id = %blog.id,
            files = listing.len(),
            entries = known.len(),
            operations = operations.len(),
            "[SYNC] Planned reconciliation"
        );

        let files: BTreeMap<String, &RemoteFile> = listing
            .iter()
            .map(|f| (normalize_path(&f.path), f))
            .collect();

        let mut report = SyncReport {
            blog_id: blog.id.clone(),
            ..SyncReport::default()
        };
        let timeout = self.config.operation_timeout();
        for operation in operations {
            let outcome = tokio::time::timeout(timeout, self.apply(blog, &operation, &files))
                .await
                .unwrap_or(Err(OperationError::Timeout(timeout)));
            match outcome {
                Ok(()) => {
                    debug!(blog_id = %blog.id, op = ?operation.kind, path = %operation.path, "[SYNC] Applied");
                    report.applied.push(operation);
                }
                Err(e) => {
                    error!(
                        blog_id = %blog.id,
                        op = ?operation.kind,
                        path = %operation.path,
                        error = %e,
                        "[SYNC][ERROR] Operation failed, skipping"
                    );
                    report.failed.push(FailedOperation {
                        operation,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            blog_id = %blog.id,
            applied = report.applied.len(),
            failed = report.failed.len(),
            "[SYNC] Reconciliation finished"
        );
        Ok(report)
    }

    async fn build(
        &self,
        blog: &Blog,
        operation: &Operation,
        files: &BTreeMap<String, &RemoteFile>,
    ) -> Result<EntryFields, OperationError> {
        let file = files
            .get(&normalize_path(&operation.path))
            .ok_or_else(|| ProviderError::NotFound(operation.path.clone()))?;
        let raw = self.provider.read_remote(&blog.id, &file.path).await?;
        let mut fields = self.pipeline.build(blog, file, &raw)?;
        fields.dependency_hashes = Some(dependency_hashes(
            fields.dependencies.iter().flatten(),
            files,
        ));
        Ok(fields)
    }

    async fn apply(
        &self,
        blog: &Blog,
        operation: &Operation,
        files: &BTreeMap<String, &RemoteFile>,
    ) -> Result<(), OperationError> {
        match operation.kind {
            OpKind::Delete => self.entries.drop_entry(&blog.id, &operation.path).await?,
            OpKind::Create | OpKind::Update => {
                let fields = self.build(blog, operation, files).await?;
                self.entries.set(&blog.id, &operation.path, fields).await?;
            }
            OpKind::Rename => {
                let old_path = operation.old_path.as_deref().unwrap_or_default();
                let mut fields = self.build(blog, operation, files).await?;
                if let Some(previous) = self.entries.get(&blog.id, old_path).await? {
                    fields.guid = Some(previous.guid);
                    fields.created = Some(previous.created);
                }
                // The old path is only tombstoned once the new one holds the
                // entry; a failure in between leaves both live and the next
                // pass deletes the old one.
                self.entries.set(&blog.id, &operation.path, fields).await?;
                self.entries.drop_entry(&blog.id, old_path).await?;
                info!(blog_id = %blog.id, from = %old_path, to = %operation.path, "[SYNC] Renamed entry");
            }
        }
        Ok(())
    }
}

