//! Fetch channels.
//!
//! Both sources of posts implement [`FetchChannel`]:
//! - Remote RPC client (`RemoteChannel`), tried first
//! - Board scraper (`ScraperChannel`), the fallback

mod remote;
mod scraper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::FetchError;
use crate::models::Post;

pub use remote::RemoteChannel;
pub use scraper::{LogPageObserver, PageObserver, ScraperChannel};

/// How much to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Recent posts from the commonly read boards, short timeout
    Quick,
    /// Everything since the watermark, long timeout
    Full,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Quick => "quick",
            Tier::Full => "full",
        }
    }
}

/// Arguments of a single fetch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Only posts newer than this; `None` fetches everything
    pub since: Option<DateTime<Utc>>,
    /// Opaque continuation token, unused by the update session
    pub cursor: Option<String>,
    /// Maximum posts, `-1` for no limit
    pub limit: i64,
    pub tier: Tier,
}

impl FetchRequest {
    /// Unbounded request starting at `since`.
    pub fn new(since: Option<DateTime<Utc>>, tier: Tier) -> Self {
        Self {
            since,
            cursor: None,
            limit: -1,
            tier,
        }
    }

    /// The limit as a count, `None` when unbounded.
    pub fn max_items(&self) -> Option<usize> {
        usize::try_from(self.limit).ok().filter(|n| *n > 0)
    }
}

/// A source of posts.
#[async_trait]
pub trait FetchChannel: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Fetch posts newer than `request.since`, newest first.
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Post>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_is_unbounded() {
        let request = FetchRequest::new(None, Tier::Full);
        assert_eq!(request.limit, -1);
        assert_eq!(request.cursor, None);
        assert_eq!(request.max_items(), None);
    }

    #[test]
    fn test_max_items() {
        let mut request = FetchRequest::new(None, Tier::Quick);
        request.limit = 20;
        assert_eq!(request.max_items(), Some(20));
        request.limit = 0;
        assert_eq!(request.max_items(), None);
    }
}
