use std::fs::{create_dir_all, write};

use blot::json_store::JsonFileStore;
use blot::local::LocalFolder;
use blot_sync::contract::{KeyValueStore, Provider, ProviderError, StoreError};
use tempfile::TempDir;

#[tokio::test]
async fn test_listing_walks_folders_and_skips_ignored_paths() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    create_dir_all(root.join("Posts/2024")).unwrap();
    create_dir_all(root.join(".obsidian")).unwrap();
    write(root.join("Posts/2024/trip.md"), "# Trip").unwrap();
    write(root.join("about.txt"), "About").unwrap();
    write(root.join(".DS_Store"), "junk").unwrap();
    write(root.join(".obsidian/workspace.json"), "{}").unwrap();
    write(root.join("draft.md.swp"), "swap").unwrap();

    let provider = LocalFolder::new().with_folder("blog1", root);
    let mut listing = provider.list_remote("blog1").await.unwrap();
    listing.sort_by(|a, b| a.path.cmp(&b.path));

    let paths: Vec<&str> = listing.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["/Posts/2024/trip.md", "/about.txt"]);
    assert_eq!(listing[1].size, 5);
    // SHA-256 of "About".
    assert_eq!(listing[1].hash.len(), 64);
    assert_ne!(listing[0].hash, listing[1].hash);

    let content = provider.read_remote("blog1", "/Posts/2024/trip.md").await.unwrap();
    assert_eq!(content, b"# Trip");
}

#[tokio::test]
async fn test_reads_outside_the_folder_are_refused() {
    let dir = TempDir::new().unwrap();
    let provider = LocalFolder::new().with_folder("blog1", dir.path());

    let escaped = provider.read_remote("blog1", "/../etc/passwd").await;
    assert!(matches!(escaped, Err(ProviderError::NotFound(_))));

    let missing = provider.read_remote("blog1", "/nope.md").await;
    assert!(matches!(missing, Err(ProviderError::NotFound(_))));

    let unknown = provider.list_remote("blog2").await;
    assert!(matches!(unknown, Err(ProviderError::Other(_))));
}

#[tokio::test]
async fn test_json_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/state.json");

    let store = JsonFileStore::open(&path).await.unwrap();
    store.set("blog:b:entry:/a.md", "{}".into()).await.unwrap();
    store.set("blog:b:entry:/b.md", "{}".into()).await.unwrap();
    store.set("blog:c:entry:/a.md", "{}".into()).await.unwrap();
    store.remove("blog:b:entry:/b.md").await.unwrap();
    store.remove("blog:b:entry:/never.md").await.unwrap();
    drop(store);

    let reopened = JsonFileStore::open(&path).await.unwrap();
    assert_eq!(
        reopened.keys("blog:b:").await.unwrap(),
        vec!["blog:b:entry:/a.md".to_string()]
    );
    assert_eq!(
        reopened.get("blog:c:entry:/a.md").await.unwrap().as_deref(),
        Some("{}")
    );
    assert!(!dir.path().join("nested/state.json.tmp").exists());
}

#[tokio::test]
async fn test_json_store_rejects_corrupt_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    write(&path, "not json").unwrap();

    let result = JsonFileStore::open(&path).await;
    assert!(matches!(result, Err(StoreError::Corrupt { .. })));
}
