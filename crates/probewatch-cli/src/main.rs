mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use probewatch_core::{
    alert_channel, AlertDispatcher, AuthToken, ChannelNotifier, EndpointDefinition,
    HttpAuthenticator, HttpProber, JsonDirSource, ProbeReport, ProbeStatus, Prober,
    RegistrySource, Scheduler, SweepReport,
};

use crate::config::AppConfig;

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("PROBEWATCH_GIT_HASH");

    if GIT_HASH.is_empty() {
        VERSION
    } else {
        // Called once by clap; lives for the whole process.
        Box::leak(format!("{VERSION} ({GIT_HASH})").into_boxed_str())
    }
}

/// Periodic liveness probing for authenticated HTTP endpoints.
#[derive(Parser)]
#[command(name = "probewatch", version = version_string(), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sweep scheduler and the HTTP API.
    Serve {
        /// Path to TOML config file.
        #[arg(short, long)]
        config: PathBuf,

        /// Listen address (e.g. 0.0.0.0:9400). Overrides config file.
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },
    /// Run a single sweep over the registry and print the result.
    Sweep {
        /// Path to TOML config file.
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Probe one endpoint from the command line.
    Probe {
        /// Base URL of the service.
        #[arg(long)]
        url: String,

        /// Path appended to the base URL.
        #[arg(long)]
        endpoint: String,

        #[arg(long, default_value = "GET")]
        method: String,

        /// Request body, sent verbatim.
        #[arg(long, default_value = "")]
        body: String,

        #[arg(long, default_value = "application/json")]
        content_type: String,

        #[arg(long, default_value = "adhoc")]
        unique_id: String,

        /// Value for the Authorization header.
        #[arg(long)]
        token: Option<String>,

        /// Request timeout in milliseconds.
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => run_serve(&config, listen).await,
        Commands::Sweep { config } => run_sweep(&config).await,
        Commands::Probe {
            url,
            endpoint,
            method,
            body,
            content_type,
            unique_id,
            token,
            timeout_ms,
        } => {
            init_tracing("pretty", "warn");
            let definition = EndpointDefinition {
                unique_id,
                url,
                method,
                endpoint,
                request_body: body,
                content_type,
            };
            run_probe(definition, token, timeout_ms).await
        }
    }
}

/// Load and validate the config, initialising tracing either way so the
/// failure itself is logged.
fn load_config(path: &Path, default_level: &str) -> Option<AppConfig> {
    match AppConfig::load(path) {
        Ok(c) => {
            init_tracing(&c.server.log_format, default_level);
            tracing::info!(path = %path.display(), "Loaded config file");
            Some(c)
        }
        Err(e) => {
            init_tracing("pretty", default_level);
            tracing::error!("{}", e);
            None
        }
    }
}

/// Everything a configured scheduler needs, plus the dispatcher draining its alerts.
struct Runtime {
    scheduler: Arc<Scheduler>,
    dispatcher: tokio::task::JoinHandle<()>,
}

fn build_runtime(app_config: &AppConfig) -> Result<Runtime, String> {
    let config = app_config.scheduler_config();

    let client = HttpProber::build_client(config.request_timeout)
        .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

    let sources: Vec<Arc<dyn RegistrySource>> = app_config
        .registry
        .dirs
        .iter()
        .map(|dir| Arc::new(JsonDirSource::new(dir)) as Arc<dyn RegistrySource>)
        .collect();

    let authenticator = HttpAuthenticator::new(
        client.clone(),
        app_config.auth.url.clone(),
        app_config.auth.timeout(),
    );
    let prober = HttpProber::with_client(client.clone());

    let (alert_tx, alert_rx) = alert_channel();
    let dispatcher = AlertDispatcher::new(alert_rx, app_config.webhook.clone(), client);
    let dispatcher = tokio::spawn(dispatcher.run());

    let scheduler = Scheduler::new(config, sources, Arc::new(authenticator), Arc::new(prober))
        .with_notifier(Arc::new(ChannelNotifier::new(alert_tx)));

    Ok(Runtime {
        scheduler: Arc::new(scheduler),
        dispatcher,
    })
}

async fn run_serve(config_path: &Path, listen_override: Option<SocketAddr>) -> ExitCode {
    let Some(app_config) = load_config(config_path, "info") else {
        return ExitCode::FAILURE;
    };
    let listen = listen_override.unwrap_or(app_config.server.listen);

    let Runtime {
        scheduler,
        dispatcher,
    } = match build_runtime(&app_config) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if app_config.webhook.is_empty() {
        tracing::warn!("No webhooks configured, down alerts will only be logged");
    }

    scheduler.start().await;

    let state = probewatch_api::state::AppState::new(Arc::clone(&scheduler));
    tracing::info!(%listen, "Starting probewatch API server");
    let served = probewatch_api::serve(listen, state, probewatch_api::shutdown_signal()).await;

    tracing::info!("Stopping scheduler...");
    scheduler.stop().await;
    drop(scheduler);

    match tokio::time::timeout(Duration::from_secs(5), dispatcher).await {
        Ok(_) => tracing::info!("Alert dispatcher shut down"),
        Err(_) => tracing::warn!("Alert dispatcher did not shut down in time"),
    }

    match served {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_sweep(config_path: &Path) -> ExitCode {
    let Some(app_config) = load_config(config_path, "warn") else {
        return ExitCode::FAILURE;
    };

    let Runtime {
        scheduler,
        dispatcher,
    } = match build_runtime(&app_config) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    println!(
        "{} {}",
        style("probewatch").bold(),
        style(env!("CARGO_PKG_VERSION")).dim()
    );
    for dir in &app_config.registry.dirs {
        println!("  {} {}", style("registry:").dim(), dir.display());
    }
    println!("  {} {}", style("auth:    ").dim(), app_config.auth.url);
    println!();

    let spinner = ProgressBar::new_spinner().with_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Sweeping...");

    let result = scheduler.run_sweep().await;
    spinner.finish_and_clear();

    let code = match result {
        Ok(report) => {
            print_report(&report);
            if report.failed() == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    };

    drop(scheduler);
    if tokio::time::timeout(Duration::from_secs(10), dispatcher)
        .await
        .is_err()
    {
        tracing::warn!("Alert dispatcher did not finish in time");
    }
    code
}

fn print_report(report: &SweepReport) {
    let mut entries: Vec<&ProbeReport> = report.entries.iter().collect();
    entries.sort_by(|a, b| a.outcome.unique_id.cmp(&b.outcome.unique_id));

    if !report.token_refreshed {
        println!(
            "  {}",
            style("auth failed, probed with previous token (if any)").yellow()
        );
    }

    for entry in entries {
        let outcome = &entry.outcome;
        let badge = match &outcome.status {
            ProbeStatus::Success => style(format!("{:<6}", "UP")).green().bold(),
            ProbeStatus::Failure(_) => style(format!("{:<6}", "FAILED")).red().bold(),
        };
        let detail = outcome.failure_reason().unwrap_or_default();
        let alert = if entry.alerted {
            format!("  {}", style("ALERTED").yellow().bold())
        } else if entry.decision.is_down() {
            format!("  {}", style("DOWN").yellow())
        } else {
            String::new()
        };
        println!(
            "  {} {:<20} {}  {}{}",
            badge,
            outcome.unique_id,
            style(&outcome.full_url).dim(),
            detail,
            alert
        );
    }

    println!();
    println!(
        "{} up, {} failed, {} down, {} alerts in {}ms",
        style(report.succeeded()).green(),
        style(report.failed()).red(),
        report.down(),
        report.alerts(),
        (report.finished_at - report.started_at).num_milliseconds()
    );
}

async fn run_probe(definition: EndpointDefinition, token: Option<String>, timeout_ms: u64) -> ExitCode {
    if let Err(e) = definition.validate() {
        eprintln!("{} {}", style("error:").red().bold(), e);
        return ExitCode::FAILURE;
    }

    let prober = match HttpProber::new(Duration::from_millis(timeout_ms.max(1))) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let token = token.map(AuthToken::new);
    let outcome = prober.probe(&definition, token.as_ref()).await;

    let status = outcome
        .response
        .as_ref()
        .map(|r| r.status.to_string())
        .unwrap_or_else(|| "-".into());

    match &outcome.status {
        ProbeStatus::Success => println!(
            "{} {} {}",
            style("UP").green().bold(),
            status,
            style(&outcome.full_url).dim()
        ),
        ProbeStatus::Failure(reason) => println!(
            "{} {} {}  {}",
            style("FAILED").red().bold(),
            status,
            style(&outcome.full_url).dim(),
            reason
        ),
    }
    if let Some(response) = &outcome.response {
        if !response.body.is_empty() {
            println!("{}", response.body);
        }
    }

    if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn init_tracing(log_format: &str, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}
