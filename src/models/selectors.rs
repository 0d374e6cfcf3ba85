// src/models/selectors.rs

//! CSS selectors for scraping a post board.

use serde::{Deserialize, Serialize};

/// CSS selectors for scraping a post board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSelectors {
    /// Selector for each row/item in the post list
    pub row_selector: String,

    /// Selector for the title element within a row
    pub title_selector: String,

    /// Selector for the date element within a row
    pub date_selector: String,

    /// Selector for the author element within a row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_selector: Option<String>,

    /// HTML attribute name for extracting links (usually "href")
    #[serde(default = "default_attr_name")]
    pub attr_name: String,

    /// Optional selector for the link element (if different from title)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_selector: Option<String>,
}

fn default_attr_name() -> String {
    "href".to_string()
}

impl Default for BoardSelectors {
    /// Generic selectors that work with most table-based boards.
    fn default() -> Self {
        Self {
            row_selector: "table tr:has(a)".to_string(),
            title_selector: "a".to_string(),
            date_selector: "td:last-child".to_string(),
            author_selector: None,
            attr_name: default_attr_name(),
            link_selector: None,
        }
    }
}
