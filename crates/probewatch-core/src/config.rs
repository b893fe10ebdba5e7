use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`Scheduler`](crate::scheduler::Scheduler) instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Period between two sweeps (default: 60s).
    pub sweep_interval: Duration,
    /// Time without a successful probe before an endpoint is considered down (default: 5h).
    pub down_threshold: Duration,
    /// Per-probe HTTP timeout, covering connect and response.
    pub request_timeout: Duration,
    /// Upper bound on probes in flight during one sweep.
    pub max_concurrent_probes: usize,
    /// Alert once per down episode instead of on every sweep while stale.
    pub notify_once_per_episode: bool,
    /// Recipient address written into every down alert.
    pub alert_recipient: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            down_threshold: Duration::from_millis(18_000_000),
            request_timeout: Duration::from_secs(10),
            max_concurrent_probes: 8,
            notify_once_per_episode: false,
            alert_recipient: "your_email@example.com".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_sweep_interval(mut self, ms: u64) -> Self {
        self.sweep_interval = Duration::from_millis(ms.max(1));
        self
    }

    pub fn with_down_threshold(mut self, ms: u64) -> Self {
        self.down_threshold = Duration::from_millis(ms);
        self
    }

    pub fn with_request_timeout(mut self, ms: u64) -> Self {
        self.request_timeout = Duration::from_millis(ms.max(1));
        self
    }

    pub fn with_max_concurrent_probes(mut self, max: usize) -> Self {
        self.max_concurrent_probes = max.max(1);
        self
    }

    pub fn with_notify_once_per_episode(mut self, enabled: bool) -> Self {
        self.notify_once_per_episode = enabled;
        self
    }

    pub fn with_alert_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.alert_recipient = recipient.into();
        self
    }
}
