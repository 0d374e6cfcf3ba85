// src/services/remote.rs

//! Remote RPC channel.
//!
//! Calls `getPosts(since, cursor, limit)` on the remote getter service:
//!
//! ```text
//! POST {endpoint}
//! {"method": "getPosts", "params": {"since": "2024-05-01T00:00:00Z", "cursor": null, "limit": -1}}
//!
//! 200 OK
//! {"posts": [ ... ]}
//! ```
//!
//! The request timeout follows the tier, so a quick update gives up much
//! sooner than a full one.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{FetchError, Result};
use crate::models::{Post, RemoteConfig, UpdaterConfig};
use crate::services::{FetchChannel, FetchRequest, Tier};
use crate::utils::http::create_async_client;

#[derive(Debug, Serialize)]
struct RpcCall<'a> {
    method: &'static str,
    params: GetPostsParams<'a>,
}

#[derive(Debug, Serialize)]
struct GetPostsParams<'a> {
    since: Option<DateTime<Utc>>,
    cursor: Option<&'a str>,
    limit: i64,
}

#[derive(Debug, Deserialize)]
struct RpcReply {
    #[serde(default)]
    posts: Vec<Post>,
}

/// Primary channel: JSON RPC over HTTP.
pub struct RemoteChannel {
    client: Client,
    endpoint: String,
    quick_timeout: Duration,
    full_timeout: Duration,
}

impl RemoteChannel {
    /// Create a channel from configuration.
    pub fn new(remote: &RemoteConfig, updater: &UpdaterConfig) -> Result<Self> {
        Self::with_timeouts(
            remote,
            Duration::from_secs(updater.quick_timeout_secs),
            Duration::from_secs(updater.full_timeout_secs),
        )
    }

    /// Create a channel with explicit per-tier timeouts.
    pub fn with_timeouts(
        remote: &RemoteConfig,
        quick_timeout: Duration,
        full_timeout: Duration,
    ) -> Result<Self> {
        let client = create_async_client(&remote.user_agent, full_timeout)?;
        Ok(Self {
            client,
            endpoint: remote.endpoint.clone(),
            quick_timeout,
            full_timeout,
        })
    }

    fn timeout_for(&self, tier: Tier) -> Duration {
        match tier {
            Tier::Quick => self.quick_timeout,
            Tier::Full => self.full_timeout,
        }
    }
}

#[async_trait]
impl FetchChannel for RemoteChannel {
    fn name(&self) -> &str {
        "remote"
    }

    async fn fetch(&self, request: &FetchRequest) -> std::result::Result<Vec<Post>, FetchError> {
        let url = Url::parse(&self.endpoint)
            .map_err(|e| FetchError::malformed_endpoint(&self.endpoint, e))?;

        let call = RpcCall {
            method: "getPosts",
            params: GetPostsParams {
                since: request.since,
                cursor: request.cursor.as_deref(),
                limit: request.limit,
            },
        };

        let response = self
            .client
            .post(url)
            .timeout(self.timeout_for(request.tier))
            .json(&call)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Protocol(format!(
                "getPosts returned HTTP {}",
                status
            )));
        }

        let reply: RpcReply = response.json().await?;
        log::debug!(
            "Remote returned {} posts ({} tier)",
            reply.posts.len(),
            request.tier.as_str()
        );
        Ok(reply.posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn remote_config(endpoint: String) -> RemoteConfig {
        RemoteConfig {
            endpoint,
            ..RemoteConfig::default()
        }
    }

    fn channel(endpoint: String) -> RemoteChannel {
        RemoteChannel::with_timeouts(
            &remote_config(endpoint),
            Duration::from_millis(200),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_returns_posts() {
        let server = MockServer::start().await;
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();

        Mock::given(method("POST"))
            .and(path("/getter"))
            .and(body_partial_json(serde_json::json!({
                "method": "getPosts",
                "params": { "since": "2024-05-01T00:00:00Z", "cursor": null, "limit": -1 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "posts": [{
                    "id": "7",
                    "board": "notice",
                    "title": "Library hours",
                    "link": "https://example.com/notice/7",
                    "published_at": "2024-05-02T08:00:00Z"
                }]
            })))
            .mount(&server)
            .await;

        let channel = channel(format!("{}/getter", server.uri()));
        let posts = channel
            .fetch(&FetchRequest::new(Some(since), Tier::Full))
            .await
            .unwrap();

        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].title, "Library hours");
        assert_eq!(posts[0].id.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_server_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let channel = channel(format!("{}/getter", server.uri()));
        let err = channel
            .fetch(&FetchRequest::new(None, Tier::Full))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Protocol(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_slow_reply_is_transient_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "posts": [] }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let channel = channel(format!("{}/getter", server.uri()));
        let err = channel
            .fetch(&FetchRequest::new(None, Tier::Quick))
            .await
            .unwrap_err();

        assert!(err.is_transient(), "expected timeout, got {err:?}");
    }

    #[tokio::test]
    async fn test_malformed_endpoint() {
        let channel = channel("not a url".to_string());
        let err = channel
            .fetch(&FetchRequest::new(None, Tier::Full))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::MalformedEndpoint { .. }));
    }
}
