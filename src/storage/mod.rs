//! Storage abstractions for post and watermark persistence.
//!
//! Two stores back an update session:
//!
//! - [`ItemStore`]: deduplicating sink for posts. Opened once per session and
//!   closed during finalize, whatever the session outcome.
//! - [`WatermarkStore`]: the durable copy of the "last updated" time.
//!
//! ## Directory Structure (local backend)
//!
//! ```text
//! storage/
//! ├── posts.json        # All ingested posts, newest first
//! └── watermark.json    # Last successful update time
//! ```

pub mod local;
#[cfg(any(test, feature = "testing"))]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::Post;

// Re-export for convenience
pub use local::{LocalItemStore, LocalStorage, LocalWatermarkStore};
#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryItemStore, MemoryWatermarkStore};

/// Result type for item store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A durable, deduplicating post store.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Open a handle. Fails with [`StoreError::Open`].
    async fn open(&self) -> StoreResult<Box<dyn ItemStoreHandle>>;
}

/// An open item store.
#[async_trait]
pub trait ItemStoreHandle: Send + Sync {
    /// Newest posts first, at most `limit`.
    async fn query_latest(&mut self, limit: usize) -> StoreResult<Vec<Post>>;

    /// Insert posts that are not stored yet and return how many were new.
    async fn insert_all(&mut self, posts: &[Post]) -> StoreResult<usize>;

    /// Release the handle. Idempotent.
    async fn close(&mut self);
}

/// Durable copy of the watermark.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Stored watermark, `None` if never written or unreadable.
    async fn get(&self) -> Option<DateTime<Utc>>;

    /// Persist the watermark. Returns `true` if it reached durable storage.
    async fn set(&self, at: DateTime<Utc>) -> bool;
}
