use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

use blot_sync::blog::Blog;
use blot_sync::build::Pipeline;
use blot_sync::clock::ManualClock;
use blot_sync::config::{ContentionMode, SyncConfig};
use blot_sync::contract::{
    KeyValueStore, MockProvider, Provider, ProviderError, RemoteFile, StoreError,
};
use blot_sync::entry::{Entries, ListFilter};
use blot_sync::scheduler::SchedulerRegistry;
use blot_sync::store::MemoryStore;
use blot_sync::sync::{OpKind, Operation, Reconciler, SyncError};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn file(path: &str, hash: &str) -> RemoteFile {
    RemoteFile {
        path: path.to_string(),
        modified: start() - chrono::Duration::days(1),
        hash: hash.to_string(),
        size: 10,
    }
}

/// Provider whose reads are served from a fixed table of contents.
fn provider_with(contents: &[(&str, &[u8])]) -> MockProvider {
    let table: BTreeMap<String, Vec<u8>> = contents
        .iter()
        .map(|(path, bytes)| (path.to_string(), bytes.to_vec()))
        .collect();
    let mut provider = MockProvider::new();
    provider
        .expect_read_remote()
        .returning(move |_, path| {
            table
                .get(path)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound(path.to_string()))
        });
    provider
}

fn reconciler(provider: impl Provider + 'static, config: SyncConfig) -> Reconciler {
    reconciler_on(Arc::new(MemoryStore::new()), provider, config)
}

fn reconciler_on(
    store: Arc<dyn KeyValueStore>,
    provider: impl Provider + 'static,
    config: SyncConfig,
) -> Reconciler {
    let clock = Arc::new(ManualClock::new(start()));
    let scheduler = Arc::new(SchedulerRegistry::new(clock.clone()));
    let entries = Entries::new(store, clock, scheduler);
    Reconciler::new(entries, Arc::new(provider), Pipeline::default(), config)
}

fn kinds(operations: &[Operation]) -> Vec<(OpKind, &str)> {
    operations
        .iter()
        .map(|op| (op.kind, op.path.as_str()))
        .collect()
}

#[tokio::test]
async fn test_first_pass_creates_entry_for_text_file() {
    let provider = provider_with(&[("/a.txt", b"Hello\nworld")]);
    let sync = reconciler(provider, SyncConfig::default());
    let blog = Blog::new("blog1");

    let report = sync
        .reconcile(&blog, vec![file("/a.txt", "h1")])
        .await
        .expect("reconcile should succeed");

    assert!(report.is_success());
    assert_eq!(
        report.applied,
        vec![Operation {
            kind: OpKind::Create,
            path: "/a.txt".into(),
            old_path: None,
        }]
    );

    let entry = sync
        .entries()
        .get("blog1", "/a.txt")
        .await
        .unwrap()
        .expect("entry should exist");
    assert_eq!(entry.id, "/a.txt");
    assert_eq!(entry.hash, "h1");
    assert_eq!(entry.html, "<p>Hello<br />\nworld</p>\n");
    assert!(!entry.deleted);
    assert!(!entry.scheduled);
    assert!(entry.guid.starts_with("entry_"));
}

#[tokio::test]
async fn test_second_pass_with_same_listing_is_a_fixed_point() {
    let provider = provider_with(&[
        ("/a.md", b"# A\n\nFirst."),
        ("/posts/b.md", b"Title: B\n\nSecond."),
        ("/photo.jpg", b"\xff\xd8\xff"),
    ]);
    let sync = reconciler(provider, SyncConfig::default());
    let blog = Blog::new("blog1");
    let listing = vec![
        file("/a.md", "h-a"),
        file("/posts/b.md", "h-b"),
        file("/photo.jpg", "h-photo"),
    ];

    let first = sync.reconcile(&blog, listing.clone()).await.unwrap();
    assert_eq!(first.applied.len(), 3);

    let second = sync.reconcile(&blog, listing).await.unwrap();
    assert!(second.applied.is_empty(), "got {:?}", second.applied);
    assert!(second.failed.is_empty());
}

#[tokio::test]
async fn test_rename_keeps_guid_and_is_a_single_operation() {
    let provider = provider_with(&[("/old.md", b"# Post"), ("/new.md", b"# Post")]);
    let sync = reconciler(provider, SyncConfig::default());
    let blog = Blog::new("blog1");

    sync.reconcile(&blog, vec![file("/old.md", "same")])
        .await
        .unwrap();
    let before = sync
        .entries()
        .get("blog1", "/old.md")
        .await
        .unwrap()
        .unwrap();

    let report = sync
        .reconcile(&blog, vec![file("/new.md", "same")])
        .await
        .unwrap();
    assert_eq!(
        report.applied,
        vec![Operation {
            kind: OpKind::Rename,
            path: "/new.md".into(),
            old_path: Some("/old.md".into()),
        }]
    );

    let after = sync
        .entries()
        .get("blog1", "/new.md")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.guid, before.guid);
    assert_eq!(after.created, before.created);

    let old = sync
        .entries()
        .get("blog1", "/old.md")
        .await
        .unwrap()
        .unwrap();
    assert!(old.deleted);

    let again = sync
        .reconcile(&blog, vec![file("/new.md", "same")])
        .await
        .unwrap();
    assert!(again.applied.is_empty());
}

#[tokio::test]
async fn test_deleted_file_is_tombstoned() {
    let provider = provider_with(&[("/a.md", b"# A"), ("/b.md", b"# B")]);
    let sync = reconciler(provider, SyncConfig::default());
    let blog = Blog::new("blog1");

    sync.reconcile(&blog, vec![file("/a.md", "1"), file("/b.md", "2")])
        .await
        .unwrap();
    let report = sync
        .reconcile(&blog, vec![file("/a.md", "1")])
        .await
        .unwrap();

    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].kind, OpKind::Delete);
    let published = sync
        .entries()
        .list("blog1", ListFilter::Published)
        .await
        .unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].path, "/a.md");
    let deleted = sync
        .entries()
        .list("blog1", ListFilter::Deleted)
        .await
        .unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].title, "B");
}

#[tokio::test]
async fn test_failing_file_is_reported_and_rest_applied() {
    let provider = provider_with(&[("/good.md", b"fine"), ("/bad.md", b"\xff\xfe\xfd")]);
    let sync = reconciler(provider, SyncConfig::default());
    let blog = Blog::new("blog1");

    let report = sync
        .reconcile(&blog, vec![file("/good.md", "g"), file("/bad.md", "b")])
        .await
        .expect("a failing file must not abort the pass");

    assert!(!report.is_success());
    assert_eq!(report.failed_paths(), vec!["/bad.md"]);
    assert_eq!(report.applied.len(), 1);
    assert!(sync
        .entries()
        .get("blog1", "/bad.md")
        .await
        .unwrap()
        .is_none());

    // Nothing was written for the failing file, so the next pass retries it.
    let retry = sync
        .reconcile(&blog, vec![file("/good.md", "g"), file("/bad.md", "b")])
        .await
        .unwrap();
    assert_eq!(retry.failed_paths(), vec!["/bad.md"]);
    assert!(retry.applied.is_empty());
}

#[tokio::test]
async fn test_ignored_and_unsupported_files_never_become_entries() {
    let provider = provider_with(&[("/keep.md", b"kept")]);
    let sync = reconciler(provider, SyncConfig::default());
    let blog = Blog::new("blog1");

    let report = sync
        .reconcile(
            &blog,
            vec![
                file("/keep.md", "k"),
                file("/.DS_Store", "x"),
                file("/_drafts-private/a.md", "x"),
                file("/~$report.docx", "x"),
                file("/archive.zip", "x"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(report.applied.len(), 1);
    let all = sync.entries().list("blog1", ListFilter::All).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].path, "/keep.md");
}

#[tokio::test]
async fn test_text_bundle_becomes_one_entry_and_tracks_its_assets() {
    let provider = provider_with(&[(
        "/Trip.textbundle/text.md",
        b"# Trip\n\n![view](assets/view.png)",
    )]);
    let sync = reconciler(provider, SyncConfig::default());
    let blog = Blog::new("blog1");
    let listing = |asset_hash: &str| {
        vec![
            file("/Trip.textbundle/text.md", "doc"),
            file("/Trip.textbundle/assets/view.png", asset_hash),
            file("/Trip.textbundle/info.json", "info"),
        ]
    };

    let first = sync.reconcile(&blog, listing("v1")).await.unwrap();
    assert_eq!(first.applied.len(), 1);
    let entry = sync
        .entries()
        .get("blog1", "/Trip.textbundle/text.md")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.title, "Trip");
    assert!(entry
        .html
        .contains("/Trip.textbundle/assets/view.png"));
    assert_eq!(
        sync.entries().list("blog1", ListFilter::All).await.unwrap().len(),
        1
    );

    let unchanged = sync.reconcile(&blog, listing("v1")).await.unwrap();
    assert!(unchanged.applied.is_empty());

    let changed = sync.reconcile(&blog, listing("v2")).await.unwrap();
    assert_eq!(changed.applied.len(), 1);
    assert_eq!(changed.applied[0].kind, OpKind::Update);
}

#[tokio::test]
async fn test_sync_lists_through_provider() {
    let mut provider = provider_with(&[("/a.md", b"# A")]);
    provider
        .expect_list_remote()
        .times(1)
        .returning(|_| Ok(vec![file("/a.md", "1")]));
    let sync = reconciler(provider, SyncConfig::default());

    let report = sync.sync(&Blog::new("blog1")).await.unwrap();
    assert_eq!(report.applied.len(), 1);
}

#[tokio::test]
async fn test_listing_failure_aborts_pass() {
    let mut provider = MockProvider::new();
    provider
        .expect_list_remote()
        .returning(|_| Err(ProviderError::Other("offline".into())));
    let sync = reconciler(provider, SyncConfig::default());

    let result = sync.sync(&Blog::new("blog1")).await;
    assert!(matches!(result, Err(SyncError::Provider(_))));
}

/// Blocks every read until released, signalling when the first read starts.
struct GatedProvider {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Provider for GatedProvider {
    async fn list_remote(&self, _: &str) -> Result<Vec<RemoteFile>, ProviderError> {
        Ok(Vec::new())
    }

    async fn read_remote(&self, _: &str, _: &str) -> Result<Vec<u8>, ProviderError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(b"# Gated".to_vec())
    }
}

#[tokio::test]
async fn test_reject_mode_refuses_concurrent_pass_for_same_blog() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let provider = GatedProvider {
        started: started.clone(),
        release: release.clone(),
    };
    let config = SyncConfig {
        contention: ContentionMode::Reject,
        ..SyncConfig::default()
    };
    let sync = Arc::new(reconciler(provider, config));
    let blog = Blog::new("blog1");

    let running = {
        let sync = sync.clone();
        let blog = blog.clone();
        tokio::spawn(async move { sync.reconcile(&blog, vec![file("/a.md", "1")]).await })
    };
    started.notified().await;

    let second = sync.reconcile(&blog, vec![file("/a.md", "1")]).await;
    assert!(matches!(
        second,
        Err(SyncError::LockContention { ref blog_id }) if blog_id == "blog1"
    ));

    // Other blogs are not held up.
    let other = sync.reconcile(&Blog::new("blog2"), Vec::new()).await;
    assert!(other.is_ok());

    release.notify_one();
    let first = running.await.unwrap().unwrap();
    assert_eq!(first.applied.len(), 1);
}

#[tokio::test]
async fn test_queue_mode_runs_passes_one_after_another() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let provider = GatedProvider {
        started: started.clone(),
        release: release.clone(),
    };
    let sync = Arc::new(reconciler(provider, SyncConfig::default()));
    let blog = Blog::new("blog1");

    let running = {
        let sync = sync.clone();
        let blog = blog.clone();
        tokio::spawn(async move { sync.reconcile(&blog, vec![file("/a.md", "1")]).await })
    };
    started.notified().await;

    let queued = {
        let sync = sync.clone();
        let blog = blog.clone();
        tokio::spawn(async move { sync.reconcile(&blog, vec![file("/a.md", "1")]).await })
    };
    release.notify_one();

    let first = running.await.unwrap().unwrap();
    let second = queued.await.unwrap().unwrap();
    assert_eq!(first.applied.len(), 1);
    assert!(second.applied.is_empty(), "queued pass sees the first pass's result");
}

/// Never answers a read within any reasonable time.
struct StalledProvider;

#[async_trait]
impl Provider for StalledProvider {
    async fn list_remote(&self, _: &str) -> Result<Vec<RemoteFile>, ProviderError> {
        Ok(Vec::new())
    }

    async fn read_remote(&self, _: &str, _: &str) -> Result<Vec<u8>, ProviderError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_read_times_out_as_failed_operation() {
    let config = SyncConfig {
        operation_timeout_secs: 2,
        ..SyncConfig::default()
    };
    let sync = reconciler(StalledProvider, config);

    let report = sync
        .reconcile(&Blog::new("blog1"), vec![file("/slow.md", "1")])
        .await
        .unwrap();

    assert_eq!(report.failed_paths(), vec!["/slow.md"]);
    assert!(report.failed[0].error.contains("timed out"));
}

/// Memory store that refuses writes to keys ending in `suffix` while `refusing`.
struct RefusingStore {
    inner: MemoryStore,
    suffix: &'static str,
    refusing: AtomicBool,
}

#[async_trait]
impl KeyValueStore for RefusingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        if self.refusing.load(Ordering::SeqCst) && key.ends_with(self.suffix) {
            return Err(StoreError::Backend("disk full".into()));
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys(prefix).await
    }
}

#[tokio::test]
async fn test_rename_that_cannot_write_new_path_keeps_old_entry_and_guid() {
    let store = Arc::new(RefusingStore {
        inner: MemoryStore::new(),
        suffix: "/new.md",
        refusing: AtomicBool::new(false),
    });
    let provider = provider_with(&[("/old.md", b"# Post"), ("/new.md", b"# Post")]);
    let sync = reconciler_on(store.clone(), provider, SyncConfig::default());
    let blog = Blog::new("blog1");

    sync.reconcile(&blog, vec![file("/old.md", "same")])
        .await
        .unwrap();
    let original = sync
        .entries()
        .get("blog1", "/old.md")
        .await
        .unwrap()
        .unwrap();

    store.refusing.store(true, Ordering::SeqCst);
    let failed = sync
        .reconcile(&blog, vec![file("/new.md", "same")])
        .await
        .unwrap();
    assert_eq!(failed.failed_paths(), vec!["/new.md"]);
    let old = sync
        .entries()
        .get("blog1", "/old.md")
        .await
        .unwrap()
        .unwrap();
    assert!(!old.deleted, "old entry must survive a failed rename");
    assert!(sync
        .entries()
        .get("blog1", "/new.md")
        .await
        .unwrap()
        .is_none());

    store.refusing.store(false, Ordering::SeqCst);
    let retried = sync
        .reconcile(&blog, vec![file("/new.md", "same")])
        .await
        .unwrap();
    assert_eq!(
        retried.applied,
        vec![Operation {
            kind: OpKind::Rename,
            path: "/new.md".into(),
            old_path: Some("/old.md".into()),
        }]
    );
    let moved = sync
        .entries()
        .get("blog1", "/new.md")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved.guid, original.guid);
    assert_eq!(moved.created, original.created);
}

#[tokio::test]
async fn test_one_batch_applies_deletes_renames_creates_then_updates() {
    let provider = provider_with(&[
        ("/a.md", b"# A"),
        ("/b.md", b"# B"),
        ("/c.md", b"# C"),
        ("/d.md", b"# D"),
        ("/e.md", b"# D"),
    ]);
    let sync = reconciler(provider, SyncConfig::default());
    let blog = Blog::new("blog1");

    sync.reconcile(
        &blog,
        vec![file("/a.md", "a"), file("/b.md", "b"), file("/d.md", "d")],
    )
    .await
    .unwrap();

    let report = sync
        .reconcile(
            &blog,
            vec![file("/a.md", "a2"), file("/c.md", "c"), file("/e.md", "d")],
        )
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(
        kinds(&report.applied),
        vec![
            (OpKind::Delete, "/b.md"),
            (OpKind::Rename, "/e.md"),
            (OpKind::Create, "/c.md"),
            (OpKind::Update, "/a.md"),
        ]
    );
    assert_eq!(report.applied[1].old_path.as_deref(), Some("/d.md"));
}

#[tokio::test]
async fn test_changed_wikilink_target_rebuilds_linking_entry() {
    let provider = provider_with(&[
        ("/notes.md", b"# Notes\n\nSee [[Other]]."),
        ("/Other.md", b"# Other"),
    ]);
    let sync = reconciler(provider, SyncConfig::default());
    let blog = Blog::new("blog1").with_plugins(["wikilinks"]);
    let listing =
        |other: &str| vec![file("/notes.md", "n"), file("/Other.md", other)];

    sync.reconcile(&blog, listing("o1")).await.unwrap();
    let notes = sync
        .entries()
        .get("blog1", "/notes.md")
        .await
        .unwrap()
        .unwrap();
    assert!(notes.dependencies.contains("/Other.md"));

    let report = sync.reconcile(&blog, listing("o2")).await.unwrap();
    assert_eq!(
        kinds(&report.applied),
        vec![(OpKind::Update, "/notes.md"), (OpKind::Update, "/Other.md")]
    );

    let settled = sync.reconcile(&blog, listing("o2")).await.unwrap();
    assert!(settled.applied.is_empty());
}

#[tokio::test]
async fn test_changed_or_removed_plain_asset_rebuilds_dependent_entry() {
    let provider = provider_with(&[(
        "/post.md",
        b"# Post\n\n![diagram](img.svg)\n\n[slides](doc.pdf)",
    )]);
    let sync = reconciler(provider, SyncConfig::default());
    let blog = Blog::new("blog1");

    let first = sync
        .reconcile(
            &blog,
            vec![file("/post.md", "p"), file("/img.svg", "s1"), file("/doc.pdf", "d1")],
        )
        .await
        .unwrap();
    assert_eq!(kinds(&first.applied), vec![(OpKind::Create, "/post.md")]);
    let post = sync
        .entries()
        .get("blog1", "/post.md")
        .await
        .unwrap()
        .unwrap();
    assert!(post.dependencies.contains("/img.svg"));
    assert!(post.dependencies.contains("/doc.pdf"));

    let svg_changed = sync
        .reconcile(
            &blog,
            vec![file("/post.md", "p"), file("/img.svg", "s2"), file("/doc.pdf", "d1")],
        )
        .await
        .unwrap();
    assert_eq!(kinds(&svg_changed.applied), vec![(OpKind::Update, "/post.md")]);

    let settled = sync
        .reconcile(
            &blog,
            vec![file("/post.md", "p"), file("/img.svg", "s2"), file("/doc.pdf", "d1")],
        )
        .await
        .unwrap();
    assert!(settled.applied.is_empty());

    let pdf_removed = sync
        .reconcile(&blog, vec![file("/post.md", "p"), file("/img.svg", "s2")])
        .await
        .unwrap();
    assert_eq!(kinds(&pdf_removed.applied), vec![(OpKind::Update, "/post.md")]);

    let settled = sync
        .reconcile(&blog, vec![file("/post.md", "p"), file("/img.svg", "s2")])
        .await
        .unwrap();
    assert!(settled.applied.is_empty());
}

#[tokio::test]
async fn test_case_only_rename_updates_stored_path() {
    let provider = provider_with(&[("/Post.md", b"# Post"), ("/post.md", b"# Post")]);
    let sync = reconciler(provider, SyncConfig::default());
    let blog = Blog::new("blog1");

    sync.reconcile(&blog, vec![file("/Post.md", "same")])
        .await
        .unwrap();
    let before = sync
        .entries()
        .get("blog1", "/Post.md")
        .await
        .unwrap()
        .unwrap();

    let report = sync
        .reconcile(&blog, vec![file("/post.md", "same")])
        .await
        .unwrap();
    assert_eq!(kinds(&report.applied), vec![(OpKind::Update, "/post.md")]);

    let after = sync
        .entries()
        .get("blog1", "/post.md")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.path, "/post.md");
    assert_eq!(after.guid, before.guid);

    let settled = sync
        .reconcile(&blog, vec![file("/post.md", "same")])
        .await
        .unwrap();
    assert!(settled.applied.is_empty());
}
