// src/pipeline/policy.rs

//! Scheduling decisions.
//!
//! Everything here is a pure function of the clock reading, the watermark
//! and configuration, so the rules can be tested without a session.
//!
//! With `base` the configured interval and `elapsed = now - watermark`:
//!
//! | elapsed              | decision |
//! |----------------------|----------|
//! | `> 8 * base`         | full     |
//! | `> base`             | quick    |
//! | otherwise            | not due  |
//!
//! An unknown watermark counts as infinitely old.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::services::Tier;

/// Multiplier turning the base interval into the full-update threshold.
pub const LONG_INTERVAL_FACTOR: i32 = 8;

/// Whether the scraper may run after the remote channel came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackDecision {
    Run,
    /// Skipped by the metered-connection policy
    Gated,
}

fn to_delta(interval: Duration) -> TimeDelta {
    TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX)
}

fn long_interval(base: Duration) -> TimeDelta {
    to_delta(base)
        .checked_mul(LONG_INTERVAL_FACTOR)
        .unwrap_or(TimeDelta::MAX)
}

fn elapsed(now: DateTime<Utc>, watermark: Option<DateTime<Utc>>) -> TimeDelta {
    match watermark {
        Some(at) => now - at,
        None => TimeDelta::MAX,
    }
}

/// Request gate: refuse while less than `base` has passed since a known watermark.
pub fn is_throttled(now: DateTime<Utc>, watermark: Option<DateTime<Utc>>, base: Duration) -> bool {
    watermark.is_some_and(|at| now - at < to_delta(base))
}

/// Pick the fetch tier, or `None` when no update is due.
pub fn select_tier(
    now: DateTime<Utc>,
    watermark: Option<DateTime<Utc>>,
    base: Duration,
) -> Option<Tier> {
    let elapsed = elapsed(now, watermark);
    if elapsed > long_interval(base) {
        Some(Tier::Full)
    } else if elapsed > to_delta(base) {
        Some(Tier::Quick)
    } else {
        None
    }
}

/// Whether the newest stored post should be consulted when resolving the
/// watermark: only if the stored watermark is missing or older than the
/// long interval.
pub fn needs_latest_post(
    now: DateTime<Utc>,
    stored: Option<DateTime<Utc>>,
    base: Duration,
) -> bool {
    stored.is_none_or(|at| now - at >= long_interval(base))
}

/// Combine the stored watermark with the newest stored post time.
///
/// Only meaningful when [`needs_latest_post`] said so; the later of the two
/// wins, and a missing stored watermark is replaced outright.
pub fn merge_watermark(
    stored: Option<DateTime<Utc>>,
    latest_post: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (stored, latest_post) {
        (None, latest) => latest,
        (Some(stored), Some(latest)) if latest > stored => Some(latest),
        (stored, _) => stored,
    }
}

/// Fallback gate: run unless metered and not explicitly allowed.
pub fn fallback_decision(allow_on_metered: bool, metered: bool) -> FallbackDecision {
    if allow_on_metered || !metered {
        FallbackDecision::Run
    } else {
        FallbackDecision::Gated
    }
}
