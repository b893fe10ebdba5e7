mod http;

pub use http::HttpProber;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::AuthToken;
use crate::registry::EndpointDefinition;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ProbeStatus {
    Success,
    Failure(String),
}

/// Raw upstream response, kept so ad-hoc callers can see what the endpoint returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub unique_id: String,
    pub full_url: String,
    #[serde(flatten)]
    pub status: ProbeStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ProbeResponse>,
}

impl ProbeOutcome {
    pub fn success(definition: &EndpointDefinition, response: ProbeResponse) -> Self {
        Self {
            unique_id: definition.unique_id.clone(),
            full_url: definition.full_url(),
            status: ProbeStatus::Success,
            timestamp: Utc::now(),
            response: Some(response),
        }
    }

    pub fn failure(
        definition: &EndpointDefinition,
        reason: impl Into<String>,
        response: Option<ProbeResponse>,
    ) -> Self {
        Self {
            unique_id: definition.unique_id.clone(),
            full_url: definition.full_url(),
            status: ProbeStatus::Failure(reason.into()),
            timestamp: Utc::now(),
            response,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ProbeStatus::Success
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            ProbeStatus::Success => None,
            ProbeStatus::Failure(reason) => Some(reason),
        }
    }
}

/// Issues a single health probe.
///
/// Implementations never fail: transport errors and unexpected statuses are
/// reported as [`ProbeStatus::Failure`] so one endpoint cannot abort a sweep.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, definition: &EndpointDefinition, token: Option<&AuthToken>) -> ProbeOutcome;
}
