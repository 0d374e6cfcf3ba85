//! Update orchestration.
//!
//! - `policy`: pure scheduling and gating rules
//! - `session`: one fetch-and-persist cycle
//! - `scheduler`: request gate and background session runner

pub mod policy;
pub mod scheduler;
pub mod session;

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::error::Result;
use crate::models::Config;
use crate::network::NetworkProbe;
use crate::services::{RemoteChannel, ScraperChannel};
use crate::storage::{LocalItemStore, LocalStorage, LocalWatermarkStore};

pub use scheduler::{CompletionListener, RequestDecision, SchedulerBuilder, UpdateScheduler};
pub use session::{SessionContext, UpdateOutcome};

/// Wire a scheduler from configuration: local JSON stores, the RPC channel,
/// the scraper fallback when boards are configured, and the TCP probe.
///
/// Connectivity is checked once before returning and then refreshed in the
/// background on `runtime` for as long as the scheduler lives.
pub async fn build_scheduler(config: &Config, runtime: Handle) -> Result<UpdateScheduler> {
    let storage = LocalStorage::new(&config.storage.dir);
    let remote = RemoteChannel::new(&config.remote, &config.updater)?;

    let network = NetworkProbe::new(&config.network);
    if !network.refresh().await {
        log::info!("Network unreachable at startup");
    }
    network.spawn_refresh(&runtime);

    let mut builder = UpdateScheduler::builder(config.updater.clone())
        .remote(Arc::new(remote))
        .items(Arc::new(LocalItemStore::new(storage.clone())))
        .watermarks(Arc::new(LocalWatermarkStore::new(storage)))
        .network(Arc::new(network))
        .runtime(runtime);

    if config.fallback.boards.is_empty() {
        log::debug!("No fallback boards configured");
    } else {
        let scraper = ScraperChannel::new(config.fallback.clone(), &config.remote.user_agent)?;
        builder = builder.fallback(Arc::new(scraper));
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_build_from_default_config() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.dir = dir.path().to_path_buf();

        let scheduler = build_scheduler(&config, Handle::current()).await.unwrap();
        assert!(!scheduler.is_updating());
        assert_eq!(scheduler.last_update_time(), None);
    }

    #[tokio::test]
    async fn test_unreachable_network_refuses_request() {
        let dir = TempDir::new().unwrap();
        let closed = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let mut config = Config::default();
        config.storage.dir = dir.path().to_path_buf();
        config.network.probe_addr = Some(closed.to_string());
        config.network.probe_timeout_ms = 500;

        let scheduler = build_scheduler(&config, Handle::current()).await.unwrap();
        assert_eq!(scheduler.request(), RequestDecision::NoConnectivity);
        assert!(!scheduler.is_updating());
    }
}
