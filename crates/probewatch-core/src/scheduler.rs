use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::auth::{AuthToken, Authenticator, TokenCache};
use crate::config::SchedulerConfig;
use crate::health::{DownDecision, HealthTracker};
use crate::notify::{DownAlert, Notifier};
use crate::probe::{ProbeOutcome, Prober};
use crate::registry::{load_merged, EndpointDefinition, Registry, RegistrySource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Active,
    Stopping,
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SweepError {
    #[error("a sweep is already in progress")]
    AlreadyRunning,
}

/// Result of probing one endpoint, recording it and (maybe) alerting.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub outcome: ProbeOutcome,
    pub decision: DownDecision,
    pub alerted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub token_refreshed: bool,
    pub entries: Vec<ProbeReport>,
}

impl SweepReport {
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }

    pub fn down(&self) -> usize {
        self.entries.iter().filter(|e| e.decision.is_down()).count()
    }

    pub fn alerts(&self) -> usize {
        self.entries.iter().filter(|e| e.alerted).count()
    }
}

/// Holds `sweeping` high for as long as it lives, including when the sweep
/// future is dropped mid-way.
struct SweepingFlag<'a>(&'a AtomicBool);

impl<'a> SweepingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for SweepingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Counters since the scheduler was created.
#[derive(Debug, Default)]
struct Counters {
    sweeps_completed: AtomicU64,
    sweeps_skipped: AtomicU64,
    probes_total: AtomicU64,
    probes_failed: AtomicU64,
    alerts_sent: AtomicU64,
    alerts_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub sweeps_completed: u64,
    pub sweeps_skipped: u64,
    pub probes_total: u64,
    pub probes_failed: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
}

/// Drives periodic sweeps over the registry and ad-hoc probes.
///
/// All shared state (token, health, counters) lives here and is handed to
/// each probe by reference, so scheduled and ad-hoc probes see the same view.
pub struct Scheduler {
    config: SchedulerConfig,
    sources: Vec<Arc<dyn RegistrySource>>,
    authenticator: Arc<dyn Authenticator>,
    prober: Arc<dyn Prober>,
    notifier: Option<Arc<dyn Notifier>>,
    tokens: TokenCache,
    tracker: HealthTracker,
    state: RwLock<SchedulerState>,
    sweep_lock: Mutex<()>,
    sweeping: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
    last_sweep: RwLock<Option<DateTime<Utc>>>,
    counters: Counters,
    created_at: DateTime<Utc>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        sources: Vec<Arc<dyn RegistrySource>>,
        authenticator: Arc<dyn Authenticator>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        let tracker = HealthTracker::new(config.down_threshold)
            .with_once_per_episode(config.notify_once_per_episode);
        Self {
            config,
            sources,
            authenticator,
            prober,
            notifier: None,
            tokens: TokenCache::new(),
            tracker,
            state: RwLock::new(SchedulerState::Idle),
            sweep_lock: Mutex::new(()),
            sweeping: AtomicBool::new(false),
            ticker: Mutex::new(None),
            last_sweep: RwLock::new(None),
            counters: Counters::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Replace the tracker, e.g. to pin the start time for never-seen URLs.
    pub fn with_tracker(mut self, tracker: HealthTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn tracker(&self) -> &HealthTracker {
        &self.tracker
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    pub async fn last_sweep(&self) -> Option<DateTime<Utc>> {
        *self.last_sweep.read().await
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.counters;
        SchedulerStats {
            sweeps_completed: c.sweeps_completed.load(Ordering::Relaxed),
            sweeps_skipped: c.sweeps_skipped.load(Ordering::Relaxed),
            probes_total: c.probes_total.load(Ordering::Relaxed),
            probes_failed: c.probes_failed.load(Ordering::Relaxed),
            alerts_sent: c.alerts_sent.load(Ordering::Relaxed),
            alerts_failed: c.alerts_failed.load(Ordering::Relaxed),
        }
    }

    /// The merged registry as the next sweep would see it.
    pub async fn registry(&self) -> Registry {
        load_merged(&self.sources).await
    }

    /// One full pass: refresh the token, then probe every registry entry.
    ///
    /// Returns [`SweepError::AlreadyRunning`] instead of waiting when another
    /// sweep holds the lock.
    pub async fn run_sweep(&self) -> Result<SweepReport, SweepError> {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            self.counters.sweeps_skipped.fetch_add(1, Ordering::Relaxed);
            return Err(SweepError::AlreadyRunning);
        };
        let _sweeping = SweepingFlag::raise(&self.sweeping);

        let started_at = Utc::now();
        *self.last_sweep.write().await = Some(started_at);

        let refreshed = self.tokens.refresh(self.authenticator.as_ref()).await;
        let token_refreshed = refreshed.is_ok();
        let token = match refreshed {
            Ok(token) => Some(token),
            Err(_) => self.tokens.current().await,
        };

        let registry = load_merged(&self.sources).await;
        debug!(endpoints = registry.len(), "Sweep started");

        let concurrency = self.config.max_concurrent_probes.max(1);
        let token = token.as_ref();
        let entries: Vec<ProbeReport> = stream::iter(registry.into_definitions())
            .map(|definition| async move { self.check(&definition, token).await })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let report = SweepReport {
            started_at,
            finished_at: Utc::now(),
            token_refreshed,
            entries,
        };
        self.counters.sweeps_completed.fetch_add(1, Ordering::Relaxed);

        info!(
            endpoints = report.entries.len(),
            up = report.succeeded(),
            failed = report.failed(),
            down = report.down(),
            alerts = report.alerts(),
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "Sweep finished"
        );
        Ok(report)
    }

    /// Probe one caller-supplied definition with the currently cached token.
    pub async fn run_ad_hoc_probe(&self, definition: &EndpointDefinition) -> ProbeReport {
        let token = self.tokens.current().await;
        info!(unique_id = %definition.unique_id, url = %definition.full_url(), "Ad-hoc probe");
        self.check(definition, token.as_ref()).await
    }

    async fn check(&self, definition: &EndpointDefinition, token: Option<&AuthToken>) -> ProbeReport {
        let outcome = self.prober.probe(definition, token).await;
        self.counters.probes_total.fetch_add(1, Ordering::Relaxed);

        match outcome.failure_reason() {
            None => info!(unique_id = %outcome.unique_id, url = %outcome.full_url, "Monitoring UP"),
            Some(reason) => {
                self.counters.probes_failed.fetch_add(1, Ordering::Relaxed);
                warn!(unique_id = %outcome.unique_id, url = %outcome.full_url, reason, "Monitoring FAILED");
            }
        }

        let decision = self.tracker.record(&outcome);
        let alerted = match decision {
            DownDecision::Down { stale_for } => {
                let alert = DownAlert::new(
                    &outcome.unique_id,
                    &outcome.full_url,
                    stale_for,
                    &self.config.alert_recipient,
                );
                let sent = self.send_alert(alert).await;
                if sent {
                    self.tracker.mark_notified(&outcome.full_url, outcome.timestamp);
                }
                sent
            }
            DownDecision::StillDown { .. } => {
                debug!(unique_id = %outcome.unique_id, "Still down, alert already sent");
                false
            }
            DownDecision::Up => false,
        };

        ProbeReport {
            outcome,
            decision,
            alerted,
        }
    }

    async fn send_alert(&self, alert: DownAlert) -> bool {
        let Some(notifier) = &self.notifier else {
            warn!(unique_id = %alert.unique_id, body = %alert.body, "Endpoint down, no notifier configured");
            return false;
        };

        match notifier.notify(&alert).await {
            Ok(()) => {
                self.counters.alerts_sent.fetch_add(1, Ordering::Relaxed);
                info!(unique_id = %alert.unique_id, stale_for_ms = alert.stale_for_ms, "Down alert requested");
                true
            }
            Err(e) => {
                self.counters.alerts_failed.fetch_add(1, Ordering::Relaxed);
                warn!(unique_id = %alert.unique_id, error = %e, "Failed to request down alert");
                false
            }
        }
    }

    /// Spawn the fixed-rate trigger. The first sweep runs immediately.
    ///
    /// A tick that finds the previous sweep still running is skipped. Calling
    /// `start` on an active scheduler does nothing.
    pub async fn start(self: &Arc<Self>) {
        let mut state = self.state.write().await;
        if *state == SchedulerState::Active {
            return;
        }

        let mut ticker = self.ticker.lock().await;
        if let Some(previous) = ticker.take() {
            previous.abort();
        }

        info!(
            interval_ms = self.config.sweep_interval.as_millis() as u64,
            threshold_ms = self.config.down_threshold.as_millis() as u64,
            "Starting scheduler"
        );

        let this = Arc::clone(self);
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                let sweeper = Arc::clone(&this);
                tokio::spawn(async move {
                    if let Err(e) = sweeper.run_sweep().await {
                        warn!(error = %e, "Previous sweep still running, skipping tick");
                    }
                });
            }
        }));
        *state = SchedulerState::Active;
    }

    /// Stop the trigger. A sweep already in flight runs to completion.
    ///
    /// On return no further tick fires and the trigger task has released its
    /// handle on the scheduler.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if *state != SchedulerState::Active {
            return;
        }
        *state = SchedulerState::Stopping;
        info!("Stopping scheduler");

        if let Some(ticker) = self.ticker.lock().await.take() {
            ticker.abort();
            let _ = ticker.await;
        }

        *state = SchedulerState::Stopped;
        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_report_counts() {
        let def = EndpointDefinition {
            unique_id: "a".into(),
            url: "http://a".into(),
            method: "GET".into(),
            endpoint: "h".into(),
            request_body: String::new(),
            content_type: "application/json".into(),
        };
        let ok = ProbeReport {
            outcome: ProbeOutcome::success(&def, crate::probe::ProbeResponse { status: 200, body: String::new() }),
            decision: DownDecision::Up,
            alerted: false,
        };
        let down = ProbeReport {
            outcome: ProbeOutcome::failure(&def, "HTTP 500", None),
            decision: DownDecision::Down {
                stale_for: std::time::Duration::from_secs(10),
            },
            alerted: true,
        };
        let report = SweepReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            token_refreshed: true,
            entries: vec![ok, down],
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.down(), 1);
        assert_eq!(report.alerts(), 1);
    }

    #[test]
    fn state_display() {
        assert_eq!(SchedulerState::Active.to_string(), "active");
        assert_eq!(SchedulerState::Stopped.to_string(), "stopped");
    }
}
