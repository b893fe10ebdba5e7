//! Endpoint definitions and the registry they are collected into.
//!
//! A registry is assembled from one or more [`RegistrySource`]s. Sources are
//! merged in order and a later definition replaces an earlier one with the
//! same `uniqueId`.

mod dir;

pub use dir::JsonDirSource;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// A single HTTP target to probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDefinition {
    /// Filled from the document key when loaded from a registry document.
    #[serde(default)]
    pub unique_id: String,
    pub url: String,
    pub method: String,
    pub endpoint: String,
    #[serde(default)]
    pub request_body: String,
    pub content_type: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("uniqueId must not be empty")]
    EmptyUniqueId,
    #[error("invalid HTTP method '{method}' for {unique_id}")]
    InvalidMethod { unique_id: String, method: String },
    #[error("invalid URL '{url}' for {unique_id}: {reason}")]
    InvalidUrl {
        unique_id: String,
        url: String,
        reason: String,
    },
}

impl EndpointDefinition {
    /// The URL actually probed, `url + "/" + endpoint`.
    pub fn full_url(&self) -> String {
        format!("{}/{}", self.url, self.endpoint)
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.unique_id.trim().is_empty() {
            return Err(DefinitionError::EmptyUniqueId);
        }
        if Method::from_bytes(self.method.as_bytes()).is_err() {
            return Err(DefinitionError::InvalidMethod {
                unique_id: self.unique_id.clone(),
                method: self.method.clone(),
            });
        }
        let full_url = self.full_url();
        match url::Url::parse(&full_url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => Ok(()),
            Ok(u) => Err(DefinitionError::InvalidUrl {
                unique_id: self.unique_id.clone(),
                url: full_url.clone(),
                reason: format!("unsupported scheme '{}'", u.scheme()),
            }),
            Err(e) => Err(DefinitionError::InvalidUrl {
                unique_id: self.unique_id.clone(),
                url: full_url,
                reason: e.to_string(),
            }),
        }
    }
}

/// Endpoint definitions keyed by `uniqueId`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    entries: BTreeMap<String, EndpointDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one registry document: `{ "<uniqueId>": { url, method, ... } }`.
    pub fn from_json(document: &str) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, EndpointDefinition> = serde_json::from_str(document)?;
        let mut registry = Self::new();
        for (unique_id, mut definition) in raw {
            definition.unique_id = unique_id;
            registry.insert(definition);
        }
        Ok(registry)
    }

    /// Insert a definition, replacing any previous one with the same `uniqueId`.
    pub fn insert(&mut self, definition: EndpointDefinition) -> Option<EndpointDefinition> {
        self.entries.insert(definition.unique_id.clone(), definition)
    }

    /// Union of both registries; entries of `other` win on duplicate ids.
    pub fn merge(&mut self, other: Registry) {
        for (unique_id, definition) in other.entries {
            if self.entries.insert(unique_id.clone(), definition).is_some() {
                debug!(unique_id, "Registry entry overwritten by later source");
            }
        }
    }

    pub fn get(&self, unique_id: &str) -> Option<&EndpointDefinition> {
        self.entries.get(unique_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointDefinition> {
        self.entries.values()
    }

    pub fn into_definitions(self) -> Vec<EndpointDefinition> {
        self.entries.into_values().collect()
    }
}

impl FromIterator<EndpointDefinition> for Registry {
    fn from_iter<I: IntoIterator<Item = EndpointDefinition>>(iter: I) -> Self {
        let mut registry = Self::new();
        for definition in iter {
            registry.insert(definition);
        }
        registry
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry source {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed registry document {path}: {message}")]
    Malformed { path: PathBuf, message: String },
}

/// Backing store for endpoint definitions.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> String;

    async fn load(&self) -> Result<Registry, RegistryError>;
}

/// A fixed, in-memory registry.
#[async_trait]
impl RegistrySource for Registry {
    fn name(&self) -> String {
        format!("static({} entries)", self.len())
    }

    async fn load(&self) -> Result<Registry, RegistryError> {
        Ok(self.clone())
    }
}

/// Load every source in order and merge them. A failing source is logged and skipped.
pub async fn load_merged(sources: &[Arc<dyn RegistrySource>]) -> Registry {
    let mut registry = Registry::new();
    for source in sources {
        match source.load().await {
            Ok(loaded) => {
                debug!(source = %source.name(), entries = loaded.len(), "Registry source loaded");
                registry.merge(loaded);
            }
            Err(e) => {
                warn!(source = %source.name(), error = %e, "Skipping registry source");
            }
        }
    }
    registry
}
