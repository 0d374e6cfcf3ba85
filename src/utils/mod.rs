//! Utility functions and helpers.

pub mod clock;
pub mod http;

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

fn post_id_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        // Common patterns: ?id=123, /notice/123, /view/123, &seq=123
        [
            r"[?&](?:id|seq|no|idx|article_seq|articleNo)=(\d+)",
            r"/(?:view|notice|article|board|post)/(\d+)",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Extract a post ID from a URL (looks for common patterns).
pub fn extract_post_id(url: &str) -> Option<String> {
    post_id_patterns()
        .iter()
        .find_map(|pattern| pattern.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://example.com/path/").unwrap();
        assert_eq!(
            resolve_url(&base, "page.html"),
            "https://example.com/path/page.html"
        );
        assert_eq!(
            resolve_url(&base, "/root.html"),
            "https://example.com/root.html"
        );
        assert_eq!(
            resolve_url(&base, "https://other.com/x"),
            "https://other.com/x"
        );
    }

    #[test]
    fn test_extract_post_id() {
        assert_eq!(
            extract_post_id("https://example.com/view?id=123"),
            Some("123".to_string())
        );
        assert_eq!(
            extract_post_id("https://example.com/notice/456"),
            Some("456".to_string())
        );
        assert_eq!(extract_post_id("https://example.com/about"), None);
    }
}
