#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
pub mod notify;
pub mod probe;
pub mod registry;
pub mod scheduler;

pub use auth::{AuthError, AuthToken, Authenticator, HttpAuthenticator, TokenCache};
pub use config::SchedulerConfig;
pub use health::{DownDecision, HealthTracker, UrlHealthSnapshot};
pub use notify::{
    alert_channel, AlertDispatcher, AlertPayload, ChannelNotifier, DownAlert, Notifier,
    NotifyError, WebhookConfig,
};
pub use probe::{HttpProber, ProbeOutcome, ProbeResponse, ProbeStatus, Prober};
pub use registry::{
    load_merged, DefinitionError, EndpointDefinition, JsonDirSource, Registry, RegistryError,
    RegistrySource,
};
pub use scheduler::{
    ProbeReport, Scheduler, SchedulerState, SchedulerStats, SweepError, SweepReport,
};
