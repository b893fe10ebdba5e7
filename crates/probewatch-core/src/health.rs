//! Per-URL last-success tracking and threshold-based down detection.
//!
//! [`HealthTracker::record`] decides against the state as it was *before*
//! the outcome is applied: read the previous success, compare, then store
//! the new success. Storing first would compare a fresh timestamp with
//! itself and never report anything down.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::probe::ProbeOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DownDecision {
    Up,
    /// Down and an alert is due.
    Down {
        #[serde(with = "millis")]
        stale_for: Duration,
    },
    /// Down, but this episode was already alerted (per-episode mode only).
    StillDown {
        #[serde(with = "millis")]
        stale_for: Duration,
    },
}

impl DownDecision {
    pub fn is_down(&self) -> bool {
        !matches!(self, Self::Up)
    }

    pub fn needs_alert(&self) -> bool {
        matches!(self, Self::Down { .. })
    }

    pub fn stale_for(&self) -> Option<Duration> {
        match self {
            Self::Up => None,
            Self::Down { stale_for } | Self::StillDown { stale_for } => Some(*stale_for),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// `true` when more than `threshold` has passed since the last success.
pub fn is_stale(since_success: Duration, threshold: Duration) -> bool {
    since_success > threshold
}

#[derive(Debug, Default, Clone)]
struct UrlHealth {
    last_success_ms: Option<i64>,
    notified: bool,
}

/// Point-in-time view of one tracked URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlHealthSnapshot {
    pub full_url: String,
    pub last_success: Option<DateTime<Utc>>,
    pub since_last_success_ms: u64,
    pub down: bool,
    pub notified: bool,
}

/// Tracks the last successful probe per full URL.
///
/// A URL that has never succeeded is measured from the tracker's start time.
#[derive(Debug)]
pub struct HealthTracker {
    threshold: Duration,
    started_at_ms: i64,
    once_per_episode: bool,
    entries: DashMap<String, UrlHealth>,
}

impl HealthTracker {
    pub fn new(threshold: Duration) -> Self {
        Self::started_at(threshold, Utc::now())
    }

    pub fn started_at(threshold: Duration, started_at: DateTime<Utc>) -> Self {
        Self {
            threshold,
            started_at_ms: started_at.timestamp_millis(),
            once_per_episode: false,
            entries: DashMap::new(),
        }
    }

    pub fn with_once_per_episode(mut self, enabled: bool) -> Self {
        self.once_per_episode = enabled;
        self
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Apply a probe outcome and return the down decision for its URL.
    pub fn record(&self, outcome: &ProbeOutcome) -> DownDecision {
        let now_ms = outcome.timestamp.timestamp_millis();
        let mut entry = self.entries.entry(outcome.full_url.clone()).or_default();

        let baseline_ms = entry.last_success_ms.unwrap_or(self.started_at_ms);
        let since = elapsed(baseline_ms, now_ms);

        let decision = if !is_stale(since, self.threshold) {
            DownDecision::Up
        } else if self.once_per_episode && entry.notified {
            DownDecision::StillDown { stale_for: since }
        } else {
            DownDecision::Down { stale_for: since }
        };

        if outcome.is_success() {
            // never move the clock backwards if outcomes land out of order
            if entry.last_success_ms.is_none_or(|prev| now_ms > prev) {
                entry.last_success_ms = Some(now_ms);
            }
            entry.notified = false;
        }

        debug!(
            url = %outcome.full_url,
            success = outcome.is_success(),
            since_success_ms = since.as_millis() as u64,
            down = decision.is_down(),
            "Recorded probe outcome"
        );
        decision
    }

    /// Close the alerting for the current down episode of `full_url`.
    ///
    /// Call only once the alert was accepted. `decided_at` is the timestamp of
    /// the outcome that produced the `Down` decision; a success recorded at or
    /// after it has already ended that episode, so nothing is marked.
    pub fn mark_notified(&self, full_url: &str, decided_at: DateTime<Utc>) {
        let decided_ms = decided_at.timestamp_millis();
        if let Some(mut entry) = self.entries.get_mut(full_url) {
            if entry.last_success_ms.is_none_or(|ms| ms < decided_ms) {
                entry.notified = true;
            }
        }
    }

    pub fn last_success(&self, full_url: &str) -> Option<DateTime<Utc>> {
        self.entries
            .get(full_url)
            .and_then(|e| e.last_success_ms)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All tracked URLs, sorted, evaluated against `now`.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<UrlHealthSnapshot> {
        let now_ms = now.timestamp_millis();
        let mut out: Vec<UrlHealthSnapshot> = self
            .entries
            .iter()
            .map(|e| {
                let since = elapsed(e.last_success_ms.unwrap_or(self.started_at_ms), now_ms);
                UrlHealthSnapshot {
                    full_url: e.key().clone(),
                    last_success: e
                        .last_success_ms
                        .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
                    since_last_success_ms: since.as_millis() as u64,
                    down: is_stale(since, self.threshold),
                    notified: e.notified,
                }
            })
            .collect();
        out.sort_by(|a, b| a.full_url.cmp(&b.full_url));
        out
    }
}

fn elapsed(from_ms: i64, to_ms: i64) -> Duration {
    Duration::from_millis(to_ms.saturating_sub(from_ms).max(0) as u64)
}
