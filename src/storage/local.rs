//! Local filesystem storage implementation.
//!
//! Posts and the watermark are kept as JSON documents under one root
//! directory. Every write goes to a temporary file first and is renamed into
//! place, so a crash mid-write leaves the previous document intact.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── posts.json        # PostsData: newest-first post list
//! └── watermark.json    # WatermarkData: last successful update time
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result, StoreError};
use crate::models::Post;
use crate::storage::{ItemStore, ItemStoreHandle, StoreResult, WatermarkStore};

const POSTS_KEY: &str = "posts.json";
const WATERMARK_KEY: &str = "watermark.json";

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Contents of `posts.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostsData {
    /// Time of the last write
    pub updated_at: Option<DateTime<Utc>>,
    /// Total post count
    pub count: usize,
    /// Posts, newest first
    pub posts: Vec<Post>,
}

/// Contents of `watermark.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WatermarkData {
    last_updated: DateTime<Utc>,
}

/// Item store persisted as a single JSON document.
#[derive(Debug, Clone)]
pub struct LocalItemStore {
    storage: LocalStorage,
}

impl LocalItemStore {
    pub fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ItemStore for LocalItemStore {
    async fn open(&self) -> StoreResult<Box<dyn ItemStoreHandle>> {
        let data = self
            .storage
            .read_json::<PostsData>(POSTS_KEY)
            .await
            .map_err(StoreError::open)?
            .unwrap_or_default();

        log::debug!(
            "Opened item store at {} ({} posts)",
            self.storage.root().display(),
            data.posts.len()
        );

        Ok(Box::new(LocalItemStoreHandle {
            storage: self.storage.clone(),
            posts: data.posts,
            open: true,
        }))
    }
}

/// Open handle on a [`LocalItemStore`]. Reads are served from the document
/// as of the last open or write; writes merge into the file on disk.
struct LocalItemStoreHandle {
    storage: LocalStorage,
    posts: Vec<Post>,
    open: bool,
}

impl LocalItemStoreHandle {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(StoreError::open("handle already closed"))
        }
    }
}

#[async_trait]
impl ItemStoreHandle for LocalItemStoreHandle {
    async fn query_latest(&mut self, limit: usize) -> StoreResult<Vec<Post>> {
        self.ensure_open()?;
        Ok(self.posts.iter().take(limit).cloned().collect())
    }

    async fn insert_all(&mut self, posts: &[Post]) -> StoreResult<usize> {
        self.ensure_open()?;

        // Merge against the file, not the snapshot taken at open.
        let mut merged = self
            .storage
            .read_json::<PostsData>(POSTS_KEY)
            .await
            .map_err(StoreError::write)?
            .unwrap_or_default()
            .posts;
        let mut ids: HashSet<String> = merged.iter().map(Post::canonical_id).collect();
        let mut inserted = 0;
        for post in posts {
            if ids.insert(post.canonical_id()) {
                merged.push(post.clone());
                inserted += 1;
            }
        }

        if inserted == 0 {
            self.posts = merged;
            return Ok(0);
        }

        // Newest first
        merged.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        let data = PostsData {
            updated_at: Some(Utc::now()),
            count: merged.len(),
            posts: merged,
        };
        self.storage
            .write_json(POSTS_KEY, &data)
            .await
            .map_err(StoreError::write)?;

        self.posts = data.posts;
        Ok(inserted)
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            log::debug!("Closed item store at {}", self.storage.root().display());
        }
    }
}

/// Watermark persisted as `watermark.json`.
#[derive(Debug, Clone)]
pub struct LocalWatermarkStore {
    storage: LocalStorage,
}

impl LocalWatermarkStore {
    pub fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl WatermarkStore for LocalWatermarkStore {
    async fn get(&self) -> Option<DateTime<Utc>> {
        match self.storage.read_json::<WatermarkData>(WATERMARK_KEY).await {
            Ok(data) => data.map(|d| d.last_updated),
            Err(e) => {
                log::warn!("Failed to read watermark: {}", e);
                None
            }
        }
    }

    async fn set(&self, at: DateTime<Utc>) -> bool {
        let data = WatermarkData { last_updated: at };
        match self.storage.write_json(WATERMARK_KEY, &data).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to persist watermark: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn post(title: &str, minutes: i64) -> Post {
        Post {
            id: None,
            board: "notice".to_string(),
            title: title.to_string(),
            author: String::new(),
            link: format!("https://example.com/{title}"),
            published_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
                + Duration::minutes(minutes),
        }
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("test.txt", b"hello").await.unwrap();
        let data = storage.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let data = storage.read_bytes("nope.txt").await.unwrap();
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn test_insert_deduplicates_across_handles() {
        let tmp = TempDir::new().unwrap();
        let store = LocalItemStore::new(LocalStorage::new(tmp.path()));

        let mut handle = store.open().await.unwrap();
        assert_eq!(handle.insert_all(&[post("a", 1), post("a", 1)]).await.unwrap(), 1);
        handle.close().await;

        let mut handle = store.open().await.unwrap();
        assert_eq!(handle.insert_all(&[post("a", 1), post("b", 2)]).await.unwrap(), 1);
        handle.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_handles_keep_each_others_posts() {
        let tmp = TempDir::new().unwrap();
        let store = LocalItemStore::new(LocalStorage::new(tmp.path()));

        let mut first = store.open().await.unwrap();
        let mut second = store.open().await.unwrap();

        assert_eq!(first.insert_all(&[post("a", 1)]).await.unwrap(), 1);
        assert_eq!(second.insert_all(&[post("b", 2), post("a", 1)]).await.unwrap(), 1);
        assert_eq!(second.query_latest(10).await.unwrap().len(), 2);
        first.close().await;
        second.close().await;

        let mut handle = store.open().await.unwrap();
        let titles: Vec<String> = handle
            .query_latest(10)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(titles, vec!["b", "a"]);
        handle.close().await;
    }

    #[tokio::test]
    async fn test_query_latest_is_newest_first() {
        let tmp = TempDir::new().unwrap();
        let store = LocalItemStore::new(LocalStorage::new(tmp.path()));

        let mut handle = store.open().await.unwrap();
        handle
            .insert_all(&[post("old", 1), post("new", 30), post("mid", 10)])
            .await
            .unwrap();

        let latest = handle.query_latest(1).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].title, "new");

        let all = handle.query_latest(10).await.unwrap();
        let titles: Vec<_> = all.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, ["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_calls() {
        let tmp = TempDir::new().unwrap();
        let store = LocalItemStore::new(LocalStorage::new(tmp.path()));

        let mut handle = store.open().await.unwrap();
        handle.close().await;
        handle.close().await;
        assert!(matches!(
            handle.query_latest(1).await,
            Err(StoreError::Open(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_posts_file_is_open_failure() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage.write_bytes(POSTS_KEY, b"{not json").await.unwrap();

        let store = LocalItemStore::new(storage);
        assert!(matches!(store.open().await, Err(StoreError::Open(_))));
    }

    #[tokio::test]
    async fn test_watermark_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = LocalWatermarkStore::new(LocalStorage::new(tmp.path()));

        assert_eq!(store.get().await, None);

        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert!(store.set(at).await);
        assert_eq!(store.get().await, Some(at));
    }

    #[tokio::test]
    async fn test_watermark_set_fails_when_root_is_a_file() {
        let tmp = TempDir::new().unwrap();
        let file_path = tmp.path().join("blocker");
        std::fs::write(&file_path, b"x").unwrap();

        let store = LocalWatermarkStore::new(LocalStorage::new(&file_path));
        assert!(!store.set(Utc::now()).await);
        assert_eq!(store.get().await, None);
    }
}
