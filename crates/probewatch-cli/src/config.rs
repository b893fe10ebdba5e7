//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:9400"
//! log_format = "json"
//!
//! [scheduler]
//! sweep_interval_ms = 60000
//! down_threshold_ms = 18000000
//! notify_once_per_episode = true
//!
//! [auth]
//! url = "http://auth.internal:8080/authenticate"
//!
//! [registry]
//! dirs = ["/etc/probewatch/endpoints", "/var/lib/probewatch/endpoints"]
//!
//! [alert]
//! recipient = "oncall@example.com"
//!
//! [[webhook]]
//! url = "https://hooks.example.com/probewatch"
//! secret = "s3cret"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use probewatch_core::auth::DEFAULT_AUTH_URL;
use probewatch_core::{SchedulerConfig, WebhookConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub auth: AuthSection,

    pub registry: RegistrySection,

    #[serde(default)]
    pub alert: AlertSection,

    #[serde(default)]
    pub webhook: Vec<WebhookConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
        }
    }
}

pub fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9400)
}

fn default_log_format() -> String {
    "pretty".into()
}

/// Every field falls back to the [`SchedulerConfig`] default when absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulerSection {
    pub sweep_interval_ms: Option<u64>,
    pub down_threshold_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub max_concurrent_probes: Option<usize>,
    pub notify_once_per_episode: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_auth_url")]
    pub url: String,

    #[serde(default = "default_auth_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            url: default_auth_url(),
            timeout_ms: default_auth_timeout_ms(),
        }
    }
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.into()
}

fn default_auth_timeout_ms() -> u64 {
    10_000
}

impl AuthSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySection {
    pub dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertSection {
    pub recipient: Option<String>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let s = &self.scheduler;
        let mut c = SchedulerConfig::default();
        if let Some(v) = s.sweep_interval_ms {
            c = c.with_sweep_interval(v);
        }
        if let Some(v) = s.down_threshold_ms {
            c = c.with_down_threshold(v);
        }
        if let Some(v) = s.request_timeout_ms {
            c = c.with_request_timeout(v);
        }
        if let Some(v) = s.max_concurrent_probes {
            c = c.with_max_concurrent_probes(v);
        }
        if let Some(v) = s.notify_once_per_episode {
            c = c.with_notify_once_per_episode(v);
        }
        if let Some(ref r) = self.alert.recipient {
            c = c.with_alert_recipient(r.clone());
        }
        c
    }

    fn validate(&self) -> Result<(), String> {
        let s = &self.scheduler;
        for (field, value) in [
            ("scheduler.sweep_interval_ms", s.sweep_interval_ms),
            ("scheduler.down_threshold_ms", s.down_threshold_ms),
            ("scheduler.request_timeout_ms", s.request_timeout_ms),
        ] {
            if value == Some(0) {
                return Err(format!("{} must be greater than zero", field));
            }
        }
        if s.max_concurrent_probes == Some(0) {
            return Err("scheduler.max_concurrent_probes must be greater than zero".into());
        }

        if self.auth.timeout_ms == 0 {
            return Err("auth.timeout_ms must be greater than zero".into());
        }
        check_http_url("auth.url", &self.auth.url)?;

        if self.registry.dirs.is_empty() {
            return Err("registry.dirs must list at least one directory".into());
        }

        if let Some(ref r) = self.alert.recipient {
            if r.trim().is_empty() {
                return Err("alert.recipient must not be empty".into());
            }
        }

        for (i, wh) in self.webhook.iter().enumerate() {
            check_http_url(&format!("webhook[{}].url", i), &wh.url)?;
            if wh.timeout_ms == 0 {
                return Err(format!("webhook[{}].timeout_ms must be greater than zero", i));
            }
        }

        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid server.log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        Ok(())
    }
}

fn check_http_url(field: &str, raw: &str) -> Result<(), String> {
    let parsed =
        url::Url::parse(raw).map_err(|e| format!("Invalid {}: {} ({})", field, raw, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(format!("{} must use http or https: {}", field, raw));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
[registry]
dirs = ["/etc/probewatch/endpoints"]
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.listen.port(), 9400);
        assert_eq!(config.server.log_format, "pretty");
        assert_eq!(config.auth.url, DEFAULT_AUTH_URL);
        assert_eq!(config.registry.dirs.len(), 1);
        assert!(config.webhook.is_empty());

        let sc = config.scheduler_config();
        assert_eq!(sc.sweep_interval, Duration::from_secs(60));
        assert_eq!(sc.down_threshold, Duration::from_millis(18_000_000));
        assert_eq!(sc.alert_recipient, "your_email@example.com");
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[server]
listen = "127.0.0.1:9090"
log_format = "json"

[scheduler]
sweep_interval_ms = 30000
down_threshold_ms = 600000
request_timeout_ms = 2500
max_concurrent_probes = 4
notify_once_per_episode = true

[auth]
url = "https://auth.internal/authenticate"
timeout_ms = 3000

[registry]
dirs = ["/a", "/b"]

[alert]
recipient = "oncall@example.com"

[[webhook]]
url = "https://hooks.example.com/alerts"
secret = "my-key"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.listen.port(), 9090);
        assert_eq!(config.server.log_format, "json");
        assert_eq!(config.auth.timeout(), Duration::from_millis(3000));
        assert_eq!(config.registry.dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(config.webhook.len(), 1);
        assert_eq!(config.webhook[0].timeout_ms, 5000);
        assert_eq!(config.webhook[0].secret.as_deref(), Some("my-key"));

        let sc = config.scheduler_config();
        assert_eq!(sc.sweep_interval, Duration::from_millis(30_000));
        assert_eq!(sc.down_threshold, Duration::from_millis(600_000));
        assert_eq!(sc.request_timeout, Duration::from_millis(2500));
        assert_eq!(sc.max_concurrent_probes, 4);
        assert!(sc.notify_once_per_episode);
        assert_eq!(sc.alert_recipient, "oncall@example.com");
    }

    #[test]
    fn missing_registry_section_fails_to_parse() {
        let err = toml::from_str::<AppConfig>("[server]\nlog_format = \"json\"\n").unwrap_err();
        assert!(err.to_string().contains("registry"), "{}", err);
    }

    #[test]
    fn validate_rejects_empty_registry_dirs() {
        let config: AppConfig = toml::from_str("[registry]\ndirs = []\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("registry.dirs"), "{}", err);
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let toml = r#"
[scheduler]
sweep_interval_ms = 0

[registry]
dirs = ["/a"]
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("scheduler.sweep_interval_ms"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_auth_url() {
        let toml = r#"
[auth]
url = "ftp://auth.internal/authenticate"

[registry]
dirs = ["/a"]
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("auth.url"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_webhook_url() {
        let toml = r#"
[registry]
dirs = ["/a"]

[[webhook]]
url = "not-valid"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("webhook[0].url"), "{}", err);
    }

    #[test]
    fn validate_rejects_zero_webhook_timeout() {
        let toml = r#"
[registry]
dirs = ["/a"]

[[webhook]]
url = "https://hooks.example.com/a"

[[webhook]]
url = "https://hooks.example.com/b"
timeout_ms = 0
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("webhook[1].timeout_ms"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let toml = r#"
[server]
log_format = "xml"

[registry]
dirs = ["/a"]
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid server.log_format"), "{}", err);
    }
}
