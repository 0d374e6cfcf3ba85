//! In-memory storage backends.
//!
//! Cloning a store shares its contents, so a caller can keep one clone to
//! inspect what a session wrote. Failures can be switched on to exercise the
//! error paths of the update session.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::Post;
use crate::storage::{ItemStore, ItemStoreHandle, StoreResult, WatermarkStore};

#[derive(Debug, Default)]
struct MemoryItems {
    posts: Vec<Post>,
    ids: HashSet<String>,
}

#[derive(Debug, Default)]
struct ItemStoreState {
    items: Mutex<MemoryItems>,
    fail_open: AtomicBool,
    fail_write: AtomicBool,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Item store held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryItemStore {
    state: Arc<ItemStoreState>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `posts`.
    pub fn with_posts(posts: Vec<Post>) -> Self {
        let store = Self::new();
        {
            let mut items = store.items();
            for post in posts {
                if items.ids.insert(post.canonical_id()) {
                    items.posts.push(post);
                }
            }
            items.posts.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        }
        store
    }

    /// Make subsequent `open` calls fail.
    pub fn fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `insert_all` calls fail.
    pub fn fail_write(&self, fail: bool) {
        self.state.fail_write.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.items().posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of stored posts, newest first.
    pub fn posts(&self) -> Vec<Post> {
        self.items().posts.clone()
    }

    /// Handles opened so far.
    pub fn open_count(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Handles closed so far.
    pub fn close_count(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn items(&self) -> MutexGuard<'_, MemoryItems> {
        self.state
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn open(&self) -> StoreResult<Box<dyn ItemStoreHandle>> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(StoreError::open("memory store configured to fail"));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryItemStoreHandle {
            store: self.clone(),
            open: true,
        }))
    }
}

struct MemoryItemStoreHandle {
    store: MemoryItemStore,
    open: bool,
}

#[async_trait]
impl ItemStoreHandle for MemoryItemStoreHandle {
    async fn query_latest(&mut self, limit: usize) -> StoreResult<Vec<Post>> {
        if !self.open {
            return Err(StoreError::open("handle already closed"));
        }
        Ok(self.store.items().posts.iter().take(limit).cloned().collect())
    }

    async fn insert_all(&mut self, posts: &[Post]) -> StoreResult<usize> {
        if !self.open {
            return Err(StoreError::open("handle already closed"));
        }
        if self.store.state.fail_write.load(Ordering::SeqCst) {
            return Err(StoreError::write("memory store configured to fail"));
        }

        let mut items = self.store.items();
        let mut inserted = 0;
        for post in posts {
            if items.ids.insert(post.canonical_id()) {
                items.posts.push(post.clone());
                inserted += 1;
            }
        }
        items.posts.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(inserted)
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.store.state.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Default)]
struct WatermarkState {
    value: Mutex<Option<DateTime<Utc>>>,
    fail_set: AtomicBool,
    writes: AtomicUsize,
}

/// Watermark held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryWatermarkStore {
    state: Arc<WatermarkState>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(at: DateTime<Utc>) -> Self {
        let store = Self::new();
        *store.value() = Some(at);
        store
    }

    /// Make subsequent `set` calls report failure without storing.
    pub fn fail_set(&self, fail: bool) {
        self.state.fail_set.store(fail, Ordering::SeqCst);
    }

    /// Current stored value.
    pub fn stored(&self) -> Option<DateTime<Utc>> {
        *self.value()
    }

    /// Successful `set` calls so far.
    pub fn write_count(&self) -> usize {
        self.state.writes.load(Ordering::SeqCst)
    }

    fn value(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        self.state
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self) -> Option<DateTime<Utc>> {
        *self.value()
    }

    async fn set(&self, at: DateTime<Utc>) -> bool {
        if self.state.fail_set.load(Ordering::SeqCst) {
            return false;
        }
        *self.value() = Some(at);
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn post(title: &str) -> Post {
        Post {
            id: Some(title.to_string()),
            board: "notice".to_string(),
            title: title.to_string(),
            author: String::new(),
            link: String::new(),
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_clones_share_contents() {
        let store = MemoryItemStore::new();
        let observer = store.clone();

        let mut handle = store.open().await.unwrap();
        assert_eq!(handle.insert_all(&[post("a"), post("b")]).await.unwrap(), 2);
        handle.close().await;

        assert_eq!(observer.len(), 2);
        assert_eq!(observer.open_count(), 1);
        assert_eq!(observer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryItemStore::new();
        store.fail_write(true);
        let mut handle = store.open().await.unwrap();
        assert!(matches!(
            handle.insert_all(&[post("a")]).await,
            Err(StoreError::Write(_))
        ));

        store.fail_open(true);
        assert!(matches!(store.open().await, Err(StoreError::Open(_))));
    }

    #[tokio::test]
    async fn test_watermark_fail_set_keeps_old_value() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let store = MemoryWatermarkStore::with_value(at);
        store.fail_set(true);
        assert!(!store.set(Utc::now()).await);
        assert_eq!(store.get().await, Some(at));
        assert_eq!(store.write_count(), 0);
    }
}
