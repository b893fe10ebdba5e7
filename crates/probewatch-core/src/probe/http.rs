use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, warn};

use super::{ProbeOutcome, ProbeResponse, Prober};
use crate::auth::AuthToken;
use crate::registry::EndpointDefinition;

/// reqwest-backed prober. A single pooled client is shared by all probes.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(Self::build_client(timeout)?))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &crate::config::SchedulerConfig) -> Result<Self, reqwest::Error> {
        Self::new(config.request_timeout)
    }

    pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .pool_max_idle_per_host(20)
            .gzip(true)
            .build()
    }
}

/// `type/subtype` with optional parameters, both parts non-empty.
fn is_media_type(value: &str) -> bool {
    let essence = value.split(';').next().unwrap_or_default().trim();
    match essence.split_once('/') {
        Some((kind, subtype)) => {
            !kind.is_empty() && !subtype.is_empty() && !subtype.contains('/') && !essence.contains(' ')
        }
        None => false,
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, definition: &EndpointDefinition, token: Option<&AuthToken>) -> ProbeOutcome {
        let full_url = definition.full_url();

        let Ok(method) = Method::from_bytes(definition.method.as_bytes()) else {
            return ProbeOutcome::failure(
                definition,
                format!("invalid HTTP method '{}'", definition.method),
                None,
            );
        };

        let content_type = match HeaderValue::from_str(&definition.content_type) {
            Ok(v) if is_media_type(&definition.content_type) => v,
            _ => {
                return ProbeOutcome::failure(
                    definition,
                    format!("invalid content type '{}'", definition.content_type),
                    None,
                );
            }
        };

        let mut request = self
            .client
            .request(method, &full_url)
            .header(CONTENT_TYPE, content_type)
            .body(definition.request_body.clone());

        if let Some(token) = token {
            request = request.header(AUTHORIZATION, token.value());
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let body = match response.text().await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(url = %full_url, error = %e, "Failed to read probe response body");
                        return ProbeOutcome::failure(
                            definition,
                            format!("failed to read response body: {}", e),
                            None,
                        );
                    }
                };
                let raw = ProbeResponse {
                    status: status.as_u16(),
                    body,
                };

                if status == StatusCode::OK {
                    debug!(url = %full_url, "Probe UP");
                    ProbeOutcome::success(definition, raw)
                } else {
                    warn!(url = %full_url, status = status.as_u16(), "Probe returned non-OK status");
                    ProbeOutcome::failure(definition, format!("HTTP {}", status), Some(raw))
                }
            }
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("timed out: {}", e)
                } else if e.is_connect() {
                    format!("connection failed: {}", e)
                } else {
                    e.to_string()
                };
                warn!(url = %full_url, error = %reason, "Probe failed");
                ProbeOutcome::failure(definition, reason, None)
            }
        }
    }
}
