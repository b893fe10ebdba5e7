use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Registry, RegistryError, RegistrySource};

/// Loads every `*.json` document in a directory, in file-name order.
///
/// Unreadable or malformed documents and invalid definitions are logged and
/// skipped. Only an unreadable directory fails the whole source.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    dir: PathBuf,
}

impl JsonDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn document_paths(&self) -> Result<Vec<PathBuf>, RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

async fn load_document(path: &Path) -> Result<Registry, RegistryError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Registry::from_json(&content).map_err(|e| RegistryError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[async_trait]
impl RegistrySource for JsonDirSource {
    fn name(&self) -> String {
        self.dir.display().to_string()
    }

    async fn load(&self) -> Result<Registry, RegistryError> {
        let mut registry = Registry::new();

        for path in self.document_paths().await? {
            let document = match load_document(&path).await {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(error = %e, "Skipping registry document");
                    continue;
                }
            };

            for definition in document.into_definitions() {
                if let Err(e) = definition.validate() {
                    warn!(path = %path.display(), error = %e, "Skipping invalid endpoint definition");
                    continue;
                }
                registry.insert(definition);
            }
            debug!(path = %path.display(), "Loaded registry document");
        }

        Ok(registry)
    }
}
