// src/services/scraper.rs

//! Board scraper, the fallback channel.
//!
//! Walks the list pages of each configured board and turns table rows into
//! posts with the board's CSS selectors. A quick update only visits boards
//! flagged `common`; a full update visits all of them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, FetchError, Result};
use crate::models::{BoardConfig, FallbackConfig, Post};
use crate::services::{FetchChannel, FetchRequest, Tier};
use crate::utils::http::create_async_client;
use crate::utils::{extract_post_id, resolve_url};

/// Receives one call per fetched page. Diagnostics only.
pub trait PageObserver: Send + Sync {
    fn on_page(&self, url: &str, status_code: u16, status_message: &str, size: usize);
}

/// Logs every page at trace level.
#[derive(Debug, Default)]
pub struct LogPageObserver;

impl PageObserver for LogPageObserver {
    fn on_page(&self, url: &str, status_code: u16, status_message: &str, size: usize) {
        log::trace!(
            "URL: {} | Status: {} {} | Page size: {} B",
            url,
            status_code,
            status_message,
            size
        );
    }
}

/// Page and byte totals of one scrape.
#[derive(Debug, Default)]
struct PageTally {
    pages: AtomicUsize,
    bytes: AtomicUsize,
}

impl PageTally {
    fn record(&self, size: usize) {
        self.pages.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size, Ordering::Relaxed);
    }
}

/// Compiled selectors for one board.
struct RowSelectors {
    row: Selector,
    title: Selector,
    date: Selector,
    author: Option<Selector>,
    link: Option<Selector>,
}

/// Rows of one list page.
#[derive(Debug, Default)]
struct ParsedPage {
    /// Rows the row selector matched
    matched: usize,
    /// Rows that became posts
    posts: Vec<Post>,
}

/// Fallback channel scraping board list pages.
pub struct ScraperChannel {
    config: Arc<FallbackConfig>,
    client: Client,
    observer: Arc<dyn PageObserver>,
}

impl ScraperChannel {
    /// Create a scraper with the given configuration.
    pub fn new(config: FallbackConfig, user_agent: &str) -> Result<Self> {
        let client = create_async_client(user_agent, Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config: Arc::new(config),
            client,
            observer: Arc::new(LogPageObserver),
        })
    }

    /// Replace the page observer.
    pub fn with_observer(mut self, observer: Arc<dyn PageObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Scrape only the commonly read boards.
    pub async fn fetch_quick_subset(
        &self,
        since: Option<DateTime<Utc>>,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Post>> {
        self.scrape(&Self::request(since, cursor, limit, Tier::Quick))
            .await
    }

    /// Scrape every configured board.
    pub async fn fetch_full(
        &self,
        since: Option<DateTime<Utc>>,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Post>> {
        self.scrape(&Self::request(since, cursor, limit, Tier::Full))
            .await
    }

    fn request(
        since: Option<DateTime<Utc>>,
        cursor: Option<&str>,
        limit: i64,
        tier: Tier,
    ) -> FetchRequest {
        FetchRequest {
            since,
            cursor: cursor.map(str::to_string),
            limit,
            tier,
        }
    }

    async fn scrape(&self, request: &FetchRequest) -> Result<Vec<Post>> {
        let boards: Vec<&BoardConfig> = match request.tier {
            Tier::Quick => self.config.boards.iter().filter(|b| b.common).collect(),
            Tier::Full => self.config.boards.iter().collect(),
        };
        if boards.is_empty() {
            return Err(AppError::config(format!(
                "no boards to scrape for a {} update",
                request.tier.as_str()
            )));
        }
        if let Some(cursor) = request.cursor.as_deref() {
            // List pages have no continuation token.
            log::debug!("Ignoring cursor '{}' for board scraping", cursor);
        }

        let tally = PageTally::default();
        let concurrency = self.config.max_concurrent.max(1);

        // One failed board fails the whole scrape: advancing the watermark
        // past a board we could not read would skip its posts for good.
        let tasks: Vec<_> = boards
            .into_iter()
            .map(|board| self.scrape_board(board, request.since, &tally))
            .collect();
        let per_board: Vec<Vec<Post>> = stream::iter(tasks)
            .buffered(concurrency)
            .try_collect()
            .await?;

        let mut posts: Vec<Post> = per_board.into_iter().flatten().collect();
        posts.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        if let Some(max) = request.max_items() {
            posts.truncate(max);
        }

        log::info!(
            "Scraped {} posts, {} pages, {:.1} KB",
            posts.len(),
            tally.pages.load(Ordering::Relaxed),
            tally.bytes.load(Ordering::Relaxed) as f64 / 1024.0
        );
        Ok(posts)
    }

    /// Walk list pages until an empty page, an already-seen date, or `max_pages`.
    async fn scrape_board(
        &self,
        board: &BoardConfig,
        since: Option<DateTime<Utc>>,
        tally: &PageTally,
    ) -> Result<Vec<Post>> {
        // Fail on bad selectors before any request goes out.
        let selectors = Self::compile(board)?;
        let delay = Duration::from_millis(self.config.request_delay_ms);
        let mut posts = Vec::new();

        for page in 1..=self.config.max_pages {
            let url = board.page_url(page);
            let html = self.fetch_page(&url, tally).await?;
            let parsed = Self::parse_page(board, &selectors, &html, &Url::parse(&url)?);
            if parsed.matched == 0 {
                break;
            }
            if parsed.posts.is_empty() {
                // Rows but no posts: the layout or date format changed.
                return Err(FetchError::Protocol(format!(
                    "board {}: none of {} rows on {} could be parsed",
                    board.id, parsed.matched, url
                ))
                .into());
            }

            let mut reached_known = false;
            for post in parsed.posts {
                if is_new(&post, since) {
                    posts.push(post);
                } else {
                    reached_known = true;
                }
            }
            if reached_known {
                break;
            }

            if page < self.config.max_pages && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        log::debug!("Board {}: {} candidate posts", board.id, posts.len());
        Ok(posts)
    }

    async fn fetch_page(&self, url: &str, tally: &PageTally) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        tally.record(body.len());
        self.observer.on_page(
            url,
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            body.len(),
        );

        if !status.is_success() {
            return Err(FetchError::Protocol(format!("{} returned HTTP {}", url, status)).into());
        }
        Ok(body)
    }

    fn compile(board: &BoardConfig) -> Result<RowSelectors> {
        let s = &board.selectors;
        Ok(RowSelectors {
            row: Self::parse_selector(&s.row_selector)?,
            title: Self::parse_selector(&s.title_selector)?,
            date: Self::parse_selector(&s.date_selector)?,
            author: s
                .author_selector
                .as_deref()
                .map(Self::parse_selector)
                .transpose()?,
            link: s
                .link_selector
                .as_deref()
                .map(Self::parse_selector)
                .transpose()?,
        })
    }

    /// Rows of one list page, in page order.
    fn parse_page(
        board: &BoardConfig,
        selectors: &RowSelectors,
        html: &str,
        base_url: &Url,
    ) -> ParsedPage {
        let document = Html::parse_document(html);
        let mut parsed = ParsedPage::default();
        for row in document.select(&selectors.row) {
            parsed.matched += 1;
            if let Some(post) = Self::parse_row(board, selectors, &row, base_url) {
                parsed.posts.push(post);
            }
        }
        parsed
    }

    fn parse_row(
        board: &BoardConfig,
        selectors: &RowSelectors,
        row: &ElementRef,
        base_url: &Url,
    ) -> Option<Post> {
        let title_elem = row.select(&selectors.title).next()?;
        let date_elem = row.select(&selectors.date).next()?;

        let title = normalize_whitespace(&title_elem.text().collect::<String>());
        if title.is_empty() {
            return None;
        }

        let raw_date = normalize_whitespace(&date_elem.text().collect::<String>());
        let Some(published_at) = parse_date(&raw_date, &board.date_format) else {
            log::warn!(
                "Board {}: unparseable date '{}' for '{}'",
                board.id,
                raw_date,
                title
            );
            return None;
        };

        let author = selectors
            .author
            .as_ref()
            .and_then(|sel| row.select(sel).next())
            .map(|el| normalize_whitespace(&el.text().collect::<String>()))
            .unwrap_or_default();

        let link_elem = selectors
            .link
            .as_ref()
            .and_then(|sel| row.select(sel).next())
            .unwrap_or(title_elem);
        let raw_link = link_elem
            .value()
            .attr(&board.selectors.attr_name)
            .unwrap_or("");
        let link = resolve_url(base_url, raw_link);

        Some(Post {
            id: extract_post_id(&link),
            board: board.id.clone(),
            title,
            author,
            link,
            published_at,
        })
    }

    fn parse_selector(s: &str) -> Result<Selector> {
        Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
    }
}

#[async_trait]
impl FetchChannel for ScraperChannel {
    fn name(&self) -> &str {
        "scraper"
    }

    async fn fetch(&self, request: &FetchRequest) -> std::result::Result<Vec<Post>, FetchError> {
        self.scrape(request).await.map_err(into_fetch_error)
    }
}

fn into_fetch_error(error: AppError) -> FetchError {
    match error {
        AppError::Fetch(e) => e,
        AppError::Http(e) => FetchError::from(e),
        other => FetchError::Protocol(other.to_string()),
    }
}

/// List pages usually only show a date, so compare by day and let the item
/// store drop the repeats.
fn is_new(post: &Post, since: Option<DateTime<Utc>>) -> bool {
    since.is_none_or(|since| post.published_at.date_naive() >= since.date_naive())
}

fn parse_date(raw: &str, format: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
