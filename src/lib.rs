// src/lib.rs

//! Post updater library.
//!
//! Keeps a local post store in sync with a remote RPC source, falling back
//! to scraping board pages when the remote is unavailable.

pub mod error;
pub mod models;
pub mod network;
pub mod notify;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
