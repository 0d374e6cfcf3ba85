// src/network.rs

//! Connectivity checks.
//!
//! [`Connectivity`] answers from cached state so the request gate never
//! waits on the network. [`NetworkProbe`] keeps that state current from a
//! background task that connects to a configured address.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::models::NetworkConfig;

/// Answers "are we online" and "does traffic cost money".
pub trait Connectivity: Send + Sync {
    fn is_connected(&self) -> bool;
    fn is_metered(&self) -> bool;
}

/// Connectivity from configuration: a TCP connect to `probe_addr` decides
/// connectivity, and meteredness is taken from the config as-is.
///
/// Without a `probe_addr` the network is always considered up. With one, it
/// is considered down until the first [`refresh`](Self::refresh).
#[derive(Debug)]
pub struct NetworkProbe {
    probe_addr: Option<String>,
    timeout: Duration,
    interval: Duration,
    metered: bool,
    connected: Arc<AtomicBool>,
}

impl NetworkProbe {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            probe_addr: config.probe_addr.clone(),
            timeout: Duration::from_millis(config.probe_timeout_ms),
            interval: Duration::from_secs(config.refresh_secs.max(1)),
            metered: config.metered,
            connected: Arc::new(AtomicBool::new(config.probe_addr.is_none())),
        }
    }

    /// Check now and cache the answer.
    pub async fn refresh(&self) -> bool {
        let Some(addr) = self.probe_addr.as_deref() else {
            return true;
        };
        let up = reachable(addr, self.timeout).await;
        self.connected.store(up, Ordering::SeqCst);
        up
    }

    /// Keep the cached answer fresh from a task on `runtime`. The task ends
    /// once `self` is dropped. Returns `None` without a `probe_addr`.
    pub fn spawn_refresh(&self, runtime: &Handle) -> Option<JoinHandle<()>> {
        let addr = self.probe_addr.clone()?;
        let timeout = self.timeout;
        let interval = self.interval;
        let state: Weak<AtomicBool> = Arc::downgrade(&self.connected);

        Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if state.strong_count() == 0 {
                    break;
                }
                let up = reachable(&addr, timeout).await;
                let Some(connected) = state.upgrade() else {
                    break;
                };
                if connected.swap(up, Ordering::SeqCst) != up {
                    log::info!("Network {}", if up { "reachable" } else { "unreachable" });
                }
            }
            log::debug!("Stopped connectivity checks against {}", addr);
        }))
    }
}

async fn reachable(addr: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            log::debug!("{} unreachable: {}", addr, e);
            false
        }
        Err(_) => {
            log::debug!("{} timed out after {:?}", addr, timeout);
            false
        }
    }
}

impl Connectivity for NetworkProbe {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_metered(&self) -> bool {
        self.metered
    }
}

/// Connectivity with fixed answers; connectivity can be switched.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Default)]
pub struct StaticNetwork {
    connected: AtomicBool,
    metered: bool,
}

#[cfg(any(test, feature = "testing"))]
impl StaticNetwork {
    pub fn new(connected: bool, metered: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            metered,
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "testing"))]
impl Connectivity for StaticNetwork {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_metered(&self) -> bool {
        self.metered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn config_for(addr: &str) -> NetworkConfig {
        NetworkConfig {
            probe_addr: Some(addr.to_string()),
            probe_timeout_ms: 500,
            refresh_secs: 1,
            ..NetworkConfig::default()
        }
    }

    #[tokio::test]
    async fn test_no_address_is_online() {
        let network = NetworkProbe::new(&NetworkConfig::default());
        assert!(network.is_connected());
        assert!(!network.is_metered());
        assert!(network.refresh().await);
        assert!(network.spawn_refresh(&Handle::current()).is_none());
    }

    #[tokio::test]
    async fn test_listener_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = NetworkConfig {
            metered: true,
            ..config_for(&listener.local_addr().unwrap().to_string())
        };

        let network = NetworkProbe::new(&config);
        assert!(!network.is_connected());
        assert!(network.refresh().await);
        assert!(network.is_connected());
        assert!(network.is_metered());
    }

    #[tokio::test]
    async fn test_closed_port_is_offline() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let network = NetworkProbe::new(&config_for(&addr.to_string()));
        assert!(!network.refresh().await);
        assert!(!network.is_connected());
    }

    #[tokio::test]
    async fn test_unresolvable_address_is_offline() {
        let network = NetworkProbe::new(&config_for("not an address"));
        assert!(!network.refresh().await);
        assert!(!network.is_connected());
    }

    #[tokio::test]
    async fn test_background_refresh_updates_cache() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let network = NetworkProbe::new(&config_for(&listener.local_addr().unwrap().to_string()));
        let task = network.spawn_refresh(&Handle::current()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !network.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("listener never reported reachable");

        drop(network);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("refresh task outlived its owner")
            .unwrap();
    }
}
