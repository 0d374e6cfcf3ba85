// src/models/mod.rs

//! Domain models for the updater.

mod config;
mod post;
mod selectors;

pub use config::{
    BoardConfig, Config, FallbackConfig, LoggingConfig, NetworkConfig, RemoteConfig,
    StorageConfig, UpdaterConfig,
};
pub use post::Post;
pub use selectors::BoardSelectors;
