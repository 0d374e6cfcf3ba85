// src/notify.rs

//! User-facing notices raised by the scheduler.

/// Sink for the messages a user would see.
pub trait Notifier: Send + Sync {
    /// An update was requested while offline.
    fn no_network(&self);

    /// A session stored `count` new posts (`count > 0`).
    fn posts_inserted(&self, count: usize);
}

/// Writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn no_network(&self) {
        log::warn!("No network connection");
    }

    fn posts_inserted(&self, count: usize) {
        log::info!("Updated {} posts", count);
    }
}
