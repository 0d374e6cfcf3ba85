//! Post data structure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A post fetched from the remote source or scraped from a board.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    /// Stable id assigned by the source, if it has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Board or category the post was listed under
    #[serde(default)]
    pub board: String,

    /// Post title
    pub title: String,

    /// Author or issuing office
    #[serde(default)]
    pub author: String,

    /// Full URL to the post
    #[serde(default)]
    pub link: String,

    /// Publish time
    pub published_at: DateTime<Utc>,
}

impl Post {
    /// Identity used for deduplication.
    ///
    /// The source id wins when present; otherwise a hash of the publish
    /// time, title and link.
    pub fn canonical_id(&self) -> String {
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            return format!("{}:{}", self.board, id);
        }

        let mut hasher = Sha256::new();
        hasher.update(self.published_at.to_rfc3339().as_bytes());
        hasher.update([0]);
        hasher.update(self.title.as_bytes());
        hasher.update([0]);
        hasher.update(self.link.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Format post for display using a template.
    ///
    /// Supported placeholders: `{board}`, `{title}`, `{author}`, `{date}`, `{link}`
    pub fn format(&self, template: &str) -> String {
        template
            .replace("{board}", &self.board)
            .replace("{title}", &self.title)
            .replace("{author}", &self.author)
            .replace("{date}", &self.published_at.format("%Y-%m-%d %H:%M").to_string())
            .replace("{link}", &self.link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_post() -> Post {
        Post {
            id: None,
            board: "academic".to_string(),
            title: "Exam schedule".to_string(),
            author: "Registrar".to_string(),
            link: "https://example.com/notice/1".to_string(),
            published_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_format() {
        let post = sample_post();
        let result = post.format("[{board}] {title} ({date})");
        assert_eq!(result, "[academic] Exam schedule (2024-03-01 09:30)");
    }

    #[test]
    fn test_canonical_id_prefers_source_id() {
        let mut post = sample_post();
        post.id = Some("42".to_string());
        assert_eq!(post.canonical_id(), "academic:42");
    }

    #[test]
    fn test_canonical_id_hash_is_stable_and_content_sensitive() {
        let a = sample_post();
        let b = sample_post();
        assert_eq!(a.canonical_id(), b.canonical_id());
        assert_eq!(a.canonical_id().len(), 64);

        let mut c = sample_post();
        c.title.push('!');
        assert_ne!(a.canonical_id(), c.canonical_id());
    }

    #[test]
    fn test_empty_source_id_falls_back_to_hash() {
        let mut post = sample_post();
        post.id = Some(String::new());
        assert_eq!(post.canonical_id(), sample_post().canonical_id());
    }
}
