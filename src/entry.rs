//! # entry: the Entry Model
//!
//! An [`Entry`] is one unit of published (or draft, scheduled, deleted) content,
//! addressed by its path inside a blog's folder. This module exclusively owns
//! entry persistence: everything else reads and writes entries through
//! [`Entries::get`], [`Entries::set`] and [`Entries::drop_entry`].
//!
//! # Post-commit hooks
//! Every write that changes visible content runs an explicit, ordered list of
//! [`CommitHook`]s after the record is persisted. The default list is:
//!
//! 1. [`ScheduleHook`]: registers or cancels the entry's publication job.
//! 2. [`CacheIdHook`]: bumps the blog's cache id.
//!
//! Hooks run while the entry's write lock is still held, so two writes to the
//! same path always see their hooks run in write order.
//!
//! # Tombstones
//! Entries are never physically removed. Dropping an entry keeps its identity
//! fields (`id`, `guid`, `url`, `permalink`, `title`, `slug`, `name`, `path`,
//! timestamps and the content `hash`) and empties everything else.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::blog::bump_cache_id;
use crate::build::html;
use crate::clock::Clock;
use crate::contract::{KeyValueStore, StoreError};
use crate::locks::KeyedLocks;
use crate::scheduler::SchedulerRegistry;
use crate::store::{blog_id_from_entry_key, entry_key, entry_prefix, normalize_path};

const SUMMARY_LENGTH: usize = 150;
const MORE_MARKER: &str = "<!-- more -->";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Entry {
    /// Normalised path; the addressing key inside the blog.
    pub id: String,
    /// Stable identifier, carried across renames.
    pub guid: String,
    /// Path as the user named it.
    pub path: String,
    pub url: String,
    pub permalink: String,
    pub title: String,
    pub title_tag: String,
    pub slug: String,
    pub name: String,
    pub html: String,
    pub body: String,
    pub summary: String,
    pub teaser: String,
    pub tags: BTreeSet<String>,
    /// Paths this entry was built from besides its own file.
    pub dependencies: BTreeSet<String>,
    /// Content hashes of the dependencies that are not entries themselves,
    /// keyed by normalised path, as of the last build.
    pub dependency_hashes: BTreeMap<String, String>,
    pub internal_links: BTreeSet<String>,
    pub backlinks: BTreeSet<String>,
    pub menu: bool,
    pub page: bool,
    pub draft: bool,
    pub scheduled: bool,
    pub deleted: bool,
    pub size: u64,
    /// Content hash of the file the entry was last built from.
    pub hash: String,
    /// Modification time of that file.
    pub modified: DateTime<Utc>,
    pub date_stamp: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
    pub exif: BTreeMap<String, String>,
}

impl Entry {
    /// Visible in public listings at `now`.
    pub fn is_published(&self, now: DateTime<Utc>) -> bool {
        !self.deleted && !self.draft && !self.page && self.date_stamp <= now
    }

    fn tombstone(&self) -> Entry {
        Entry {
            id: self.id.clone(),
            guid: self.guid.clone(),
            path: self.path.clone(),
            url: self.url.clone(),
            permalink: self.permalink.clone(),
            title: self.title.clone(),
            slug: self.slug.clone(),
            name: self.name.clone(),
            hash: self.hash.clone(),
            modified: self.modified,
            date_stamp: self.date_stamp,
            created: self.created,
            updated: self.updated,
            deleted: true,
            ..Entry::default()
        }
    }
}

/// A partial update for [`Entries::set`]. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryFields {
    pub guid: Option<String>,
    pub path: Option<String>,
    pub url: Option<String>,
    pub permalink: Option<String>,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub html: Option<String>,
    pub body: Option<String>,
    pub summary: Option<String>,
    pub teaser: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub dependencies: Option<BTreeSet<String>>,
    pub dependency_hashes: Option<BTreeMap<String, String>>,
    pub internal_links: Option<BTreeSet<String>>,
    pub backlinks: Option<BTreeSet<String>>,
    pub menu: Option<bool>,
    pub page: Option<bool>,
    pub draft: Option<bool>,
    pub size: Option<u64>,
    pub hash: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    pub date_stamp: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub metadata: Option<BTreeMap<String, String>>,
    pub exif: Option<BTreeMap<String, String>>,
}

impl EntryFields {
    fn apply(self, entry: &mut Entry) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field {
                    entry.$field = value;
                })*
            };
        }
        merge!(
            guid, path, url, permalink, title, slug, html, body, summary, teaser, tags,
            dependencies, dependency_hashes, internal_links, backlinks, menu, page, draft, size,
            hash, modified, date_stamp, created, metadata, exif,
        );
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("invalid entry: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to serialise entry {path}: {source}")]
    Serialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Which entries [`Entries::list`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    /// Public posts, newest first.
    Published,
    Scheduled,
    Drafts,
    Pages,
    Deleted,
    /// Everything, tombstones included.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    Set,
    Drop,
}

/// A persisted change, handed to every [`CommitHook`].
#[derive(Debug, Clone)]
pub struct Commit {
    pub blog_id: String,
    pub kind: CommitKind,
    pub entry: Entry,
}

/// Runs after an entry write is persisted.
#[async_trait]
pub trait CommitHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn after_commit(&self, entries: &Entries, commit: &Commit) -> Result<(), EntryError>;
}

/// Keeps the scheduler in step with the entry's publish date.
pub struct ScheduleHook;

#[async_trait]
impl CommitHook for ScheduleHook {
    fn name(&self) -> &'static str {
        "schedule"
    }

    async fn after_commit(&self, entries: &Entries, commit: &Commit) -> Result<(), EntryError> {
        entries.schedule(&commit.blog_id, &commit.entry);
        Ok(())
    }
}

/// Refreshes the blog's cache id so rendered pages are rebuilt.
pub struct CacheIdHook;

#[async_trait]
impl CommitHook for CacheIdHook {
    fn name(&self) -> &'static str {
        "cache_id"
    }

    async fn after_commit(&self, entries: &Entries, commit: &Commit) -> Result<(), EntryError> {
        bump_cache_id(entries.store(), &commit.blog_id, entries.now()).await?;
        Ok(())
    }
}

struct Inner {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<SchedulerRegistry>,
    hooks: Vec<Arc<dyn CommitHook>>,
    locks: KeyedLocks,
}

/// Handle to the entry model. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Entries {
    inner: Arc<Inner>,
}

impl Entries {
    /// Entry model with the default hooks: schedule, then cache id.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<SchedulerRegistry>,
    ) -> Self {
        Self::with_hooks(
            store,
            clock,
            scheduler,
            vec![Arc::new(ScheduleHook), Arc::new(CacheIdHook)],
        )
    }

    pub fn with_hooks(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<SchedulerRegistry>,
        hooks: Vec<Arc<dyn CommitHook>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                scheduler,
                hooks,
                locks: KeyedLocks::new(),
            }),
        }
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.inner.store.as_ref()
    }

    pub fn scheduler(&self) -> &SchedulerRegistry {
        &self.inner.scheduler
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// The entry at `path`, tombstones included. Absence is not an error.
    pub async fn get(&self, blog_id: &str, path: &str) -> Result<Option<Entry>, EntryError> {
        let key = entry_key(blog_id, path);
        match self.inner.store.get(&key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Corrupt { key, source }.into()),
            None => Ok(None),
        }
    }

    /// Merges `fields` onto the stored entry (or a new one), recomputes derived
    /// fields, persists it and runs the commit hooks.
    pub async fn set(
        &self,
        blog_id: &str,
        path: &str,
        fields: EntryFields,
    ) -> Result<Entry, EntryError> {
        validate(blog_id, path, &fields)?;
        let _guard = self.inner.locks.lock(&entry_key(blog_id, path)).await;

        let now = self.now();
        let existing = self.get(blog_id, path).await?;
        let created = existing.is_none();
        let mut entry = existing.unwrap_or_else(|| Entry {
            path: path.to_string(),
            created: now,
            date_stamp: now,
            modified: now,
            ..Entry::default()
        });

        fields.apply(&mut entry);
        derive(&mut entry, now);

        self.persist(blog_id, &entry).await?;
        info!(
            blog_id,
            path = %entry.path,
            guid = %entry.guid,
            created,
            scheduled = entry.scheduled,
            "[ENTRY] Saved entry"
        );

        self.run_hooks(Commit {
            blog_id: blog_id.to_string(),
            kind: CommitKind::Set,
            entry: entry.clone(),
        })
        .await?;
        Ok(entry)
    }

    /// Tombstones the entry at `path`. Missing or already-deleted entries are a
    /// no-op, so calling this twice leaves the same state as calling it once.
    pub async fn drop_entry(&self, blog_id: &str, path: &str) -> Result<(), EntryError> {
        validate(blog_id, path, &EntryFields::default())?;
        let _guard = self.inner.locks.lock(&entry_key(blog_id, path)).await;

        let Some(existing) = self.get(blog_id, path).await? else {
            debug!(blog_id, path, "[ENTRY] Drop of unknown entry is a no-op");
            return Ok(());
        };
        if existing.deleted {
            debug!(blog_id, path, "[ENTRY] Entry already deleted");
            return Ok(());
        }

        let mut tombstone = existing.tombstone();
        tombstone.updated = self.now();
        self.persist(blog_id, &tombstone).await?;
        info!(blog_id, path = %tombstone.path, guid = %tombstone.guid, "[ENTRY] Dropped entry");

        self.run_hooks(Commit {
            blog_id: blog_id.to_string(),
            kind: CommitKind::Drop,
            entry: tombstone,
        })
        .await
    }

    /// Re-saves an entry without changing any field, recomputing `scheduled`.
    /// Deleted and missing entries are left alone.
    pub async fn resave(&self, blog_id: &str, path: &str) -> Result<Option<Entry>, EntryError> {
        match self.get(blog_id, path).await? {
            Some(entry) if !entry.deleted => self
                .set(blog_id, path, EntryFields::default())
                .await
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Entries of one blog matching `filter`, newest `date_stamp` first.
    pub async fn list(&self, blog_id: &str, filter: ListFilter) -> Result<Vec<Entry>, EntryError> {
        let now = self.now();
        let mut entries = Vec::new();
        for key in self.inner.store.keys(&entry_prefix(blog_id)).await? {
            let Some(raw) = self.inner.store.get(&key).await? else {
                continue;
            };
            let entry: Entry = match serde_json::from_str(&raw) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(blog_id, key = %key, error = ?e, "[ENTRY] Skipping corrupt entry record");
                    continue;
                }
            };
            let keep = match filter {
                ListFilter::Published => entry.is_published(now),
                ListFilter::Scheduled => !entry.deleted && entry.scheduled,
                ListFilter::Drafts => !entry.deleted && entry.draft,
                ListFilter::Pages => !entry.deleted && entry.page,
                ListFilter::Deleted => entry.deleted,
                ListFilter::All => true,
            };
            if keep {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| b.date_stamp.cmp(&a.date_stamp).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    /// Every blog id with at least one entry record.
    pub async fn blog_ids(&self) -> Result<Vec<String>, EntryError> {
        let ids: BTreeSet<String> = self
            .inner
            .store
            .keys("blog:")
            .await?
            .iter()
            .filter_map(|key| blog_id_from_entry_key(key))
            .map(str::to_string)
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// Restart recovery: registers a job for every entry still marked
    /// scheduled. Returns how many jobs were registered.
    pub async fn recover_schedule(&self) -> Result<usize, EntryError> {
        let mut registered = 0;
        for blog_id in self.blog_ids().await? {
            for entry in self.list(&blog_id, ListFilter::Scheduled).await? {
                if self.schedule(&blog_id, &entry) {
                    registered += 1;
                } else {
                    // Date passed while we were down: flip the flag now.
                    self.resave(&blog_id, &entry.path).await?;
                }
            }
        }
        info!(registered, "[SCHEDULE] Recovered scheduled entries");
        Ok(registered)
    }

    /// Registers or cancels the publication job for `entry`.
    fn schedule(&self, blog_id: &str, entry: &Entry) -> bool {
        let scheduler = self.scheduler();
        if entry.deleted || !entry.scheduled {
            scheduler.cancel(blog_id, &entry.path);
            return false;
        }

        let entries = self.clone();
        let blog = blog_id.to_string();
        let path = entry.path.clone();
        scheduler.register(
            blog_id,
            &entry.path,
            entry.date_stamp,
            Box::new(move || {
                Box::pin(async move {
                    if let Err(e) = entries.resave(&blog, &path).await {
                        error!(blog_id = %blog, path = %path, error = ?e, "[SCHEDULE] Re-save of scheduled entry failed");
                    }
                })
            }),
        )
    }

    async fn persist(&self, blog_id: &str, entry: &Entry) -> Result<(), EntryError> {
        let raw = serde_json::to_string(entry).map_err(|source| EntryError::Serialize {
            path: entry.path.clone(),
            source,
        })?;
        self.inner
            .store
            .set(&entry_key(blog_id, &entry.path), raw)
            .await?;
        Ok(())
    }

    async fn run_hooks(&self, commit: Commit) -> Result<(), EntryError> {
        for hook in &self.inner.hooks {
            if let Err(e) = hook.after_commit(self, &commit).await {
                error!(
                    blog_id = %commit.blog_id,
                    path = %commit.entry.path,
                    hook = hook.name(),
                    error = ?e,
                    "[ENTRY] Post-commit hook failed"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

fn validate(blog_id: &str, path: &str, fields: &EntryFields) -> Result<(), EntryError> {
    if blog_id.trim().is_empty() {
        return Err(EntryError::Validation("blog id is missing".into()));
    }
    if normalize_path(path) == "/" {
        return Err(EntryError::Validation("entry path is missing".into()));
    }
    if let Some(other) = &fields.path {
        if normalize_path(other) != normalize_path(path) {
            return Err(EntryError::Validation(format!(
                "path field {other} does not match {path}"
            )));
        }
    }
    if matches!(&fields.guid, Some(guid) if guid.trim().is_empty()) {
        return Err(EntryError::Validation("guid may not be blank".into()));
    }
    Ok(())
}

/// Recomputes every derived field. Values the caller supplied win.
fn derive(entry: &mut Entry, now: DateTime<Utc>) {
    entry.id = normalize_path(&entry.path);
    if entry.guid.is_empty() {
        entry.guid = format!("entry_{}", uuid::Uuid::new_v4().simple());
    }
    if entry.name.is_empty() {
        entry.name = entry
            .path
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .to_string();
    }
    if entry.title.is_empty() {
        entry.title = html::first_h1(&entry.html)
            .map(html::strip_tags)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| file_stem(&entry.name).to_string());
    }
    if entry.slug.is_empty() {
        entry.slug = html::slugify(&entry.title);
        if entry.slug.is_empty() {
            entry.slug = html::slugify(file_stem(&entry.name));
        }
    }
    if entry.permalink.is_empty() {
        entry.permalink = if entry.url.is_empty() {
            format!("/{}", entry.slug)
        } else {
            entry.url.clone()
        };
    }
    if entry.url.is_empty() {
        entry.url = entry.permalink.clone();
    }
    entry.title_tag = match html::first_h1(&entry.html) {
        Some(tag) => tag.to_string(),
        None => format!("<h1>{}</h1>", html::escape(&entry.title)),
    };
    if entry.summary.is_empty() {
        let source = html::first_paragraph(&entry.html).unwrap_or(&entry.html);
        entry.summary = html::truncate_words(&html::strip_tags(source), SUMMARY_LENGTH);
    }
    if entry.teaser.is_empty() {
        entry.teaser = match entry.html.find(MORE_MARKER) {
            Some(idx) => entry.html[..idx].trim_end().to_string(),
            None => html::first_paragraph(&entry.html)
                .unwrap_or(&entry.html)
                .to_string(),
        };
    }
    entry.scheduled = entry.date_stamp > now;
    entry.deleted = false;
    entry.updated = now;
}

fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}
