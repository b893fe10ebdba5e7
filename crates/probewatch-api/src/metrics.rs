use std::fmt::Write;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use chrono::Utc;

use crate::state::AppState;

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let scheduler = &state.scheduler;
    let stats = scheduler.stats();
    let now = Utc::now();

    let mut out = String::with_capacity(4096);

    // Writing to a String cannot fail.
    let _ = render(&mut out, &state, stats, now).await;

    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        out,
    )
}

async fn render(
    out: &mut String,
    state: &AppState,
    stats: probewatch_core::SchedulerStats,
    now: chrono::DateTime<Utc>,
) -> std::fmt::Result {
    let scheduler = &state.scheduler;

    writeln!(out, "# TYPE probewatch_scheduler_state stateset")?;
    writeln!(out, "# HELP probewatch_scheduler_state Current state of the scheduler")?;
    let current = scheduler.state().await.to_string();
    for variant in ["idle", "active", "stopping", "stopped"] {
        writeln!(
            out,
            "probewatch_scheduler_state{{state=\"{}\"}} {}",
            variant,
            u8::from(current == variant)
        )?;
    }

    writeln!(out, "# TYPE probewatch_sweeps counter")?;
    writeln!(out, "# HELP probewatch_sweeps Completed sweeps")?;
    writeln!(out, "probewatch_sweeps_total {}", stats.sweeps_completed)?;

    writeln!(out, "# TYPE probewatch_sweeps_skipped counter")?;
    writeln!(out, "# HELP probewatch_sweeps_skipped Sweeps skipped because one was already running")?;
    writeln!(out, "probewatch_sweeps_skipped_total {}", stats.sweeps_skipped)?;

    writeln!(out, "# TYPE probewatch_probes counter")?;
    writeln!(out, "# HELP probewatch_probes Probes issued, scheduled and ad-hoc")?;
    writeln!(out, "probewatch_probes_total {}", stats.probes_total)?;

    writeln!(out, "# TYPE probewatch_probe_failures counter")?;
    writeln!(out, "# HELP probewatch_probe_failures Probes classified as failures")?;
    writeln!(out, "probewatch_probe_failures_total {}", stats.probes_failed)?;

    writeln!(out, "# TYPE probewatch_alerts counter")?;
    writeln!(out, "# HELP probewatch_alerts Down alerts handed to the notifier")?;
    writeln!(out, "probewatch_alerts_total {}", stats.alerts_sent)?;

    writeln!(out, "# TYPE probewatch_alert_failures counter")?;
    writeln!(out, "# HELP probewatch_alert_failures Down alerts the notifier rejected")?;
    writeln!(out, "probewatch_alert_failures_total {}", stats.alerts_failed)?;

    writeln!(out, "# TYPE probewatch_last_sweep_timestamp_seconds gauge")?;
    writeln!(out, "# HELP probewatch_last_sweep_timestamp_seconds Unix timestamp of the last sweep start")?;
    if let Some(t) = scheduler.last_sweep().await {
        writeln!(
            out,
            "probewatch_last_sweep_timestamp_seconds {:.3}",
            t.timestamp_millis() as f64 / 1000.0
        )?;
    }

    let snapshot = scheduler.tracker().snapshot(now);

    writeln!(out, "# TYPE probewatch_last_success_timestamp_seconds gauge")?;
    writeln!(out, "# HELP probewatch_last_success_timestamp_seconds Unix timestamp of the last successful probe per URL")?;
    for s in &snapshot {
        if let Some(t) = s.last_success {
            writeln!(
                out,
                "probewatch_last_success_timestamp_seconds{{url=\"{}\"}} {:.3}",
                escape_label(&s.full_url),
                t.timestamp_millis() as f64 / 1000.0
            )?;
        }
    }

    writeln!(out, "# TYPE probewatch_seconds_since_success gauge")?;
    writeln!(out, "# HELP probewatch_seconds_since_success Seconds since the last successful probe per URL")?;
    for s in &snapshot {
        writeln!(
            out,
            "probewatch_seconds_since_success{{url=\"{}\"}} {:.3}",
            escape_label(&s.full_url),
            s.since_last_success_ms as f64 / 1000.0
        )?;
    }

    writeln!(out, "# TYPE probewatch_endpoint_down gauge")?;
    writeln!(out, "# HELP probewatch_endpoint_down 1 when the URL is past the down threshold")?;
    for s in &snapshot {
        writeln!(
            out,
            "probewatch_endpoint_down{{url=\"{}\"}} {}",
            escape_label(&s.full_url),
            u8::from(s.down)
        )?;
    }

    writeln!(out, "# EOF")
}

/// Escape a label value per the OpenMetrics text format.
fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}
