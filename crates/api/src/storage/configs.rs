//! JSON-file store for named generation configs.
//!
//! The whole file is rewritten on every mutation (temp file + rename), so
//! a crash never leaves a half-written store behind.

use std::path::{Path, PathBuf};

use easel_core::error::CoreError;
use easel_core::params::GenerationConfig;
use tokio::sync::RwLock;

pub struct ConfigStore {
    path: PathBuf,
    configs: RwLock<Vec<GenerationConfig>>,
}

impl ConfigStore {
    /// Load the store from `path`. A missing file is an empty store.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let configs = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<GenerationConfig>>(&bytes).map_err(|e| {
                CoreError::Internal(format!("Corrupt config file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(CoreError::Internal(format!(
                    "Failed to read config file {}: {e}",
                    path.display()
                )))
            }
        };

        tracing::info!(path = %path.display(), count = configs.len(), "Loaded generation configs");
        Ok(Self {
            path,
            configs: RwLock::new(configs),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn list(&self) -> Vec<GenerationConfig> {
        self.configs.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Result<GenerationConfig, CoreError> {
        self.configs
            .read()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("Configuration", id))
    }

    /// Add a config, assigning an id when it has none.
    pub async fn add(&self, mut config: GenerationConfig) -> Result<GenerationConfig, CoreError> {
        validate_name(&config.name)?;
        let mut configs = self.configs.write().await;

        if configs.iter().any(|c| c.name == config.name) {
            return Err(duplicate_name(&config.name));
        }
        if !config.has_identity() {
            config.id = uuid::Uuid::new_v4().to_string();
        } else if configs.iter().any(|c| c.id == config.id) {
            return Err(CoreError::Conflict(format!(
                "Configuration id {} already exists",
                config.id
            )));
        }

        let mut next = configs.clone();
        next.push(config.clone());
        self.persist(&next).await?;
        *configs = next;

        tracing::info!(id = %config.id, name = %config.name, "Configuration added");
        Ok(config)
    }

    /// Replace the config with `id`. The id in `config` is ignored.
    pub async fn update(
        &self,
        id: &str,
        mut config: GenerationConfig,
    ) -> Result<GenerationConfig, CoreError> {
        validate_name(&config.name)?;
        let mut configs = self.configs.write().await;

        let index = configs
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| CoreError::not_found("Configuration", id))?;
        if configs
            .iter()
            .any(|c| c.id != id && c.name == config.name)
        {
            return Err(duplicate_name(&config.name));
        }

        config.id = id.to_string();
        let mut next = configs.clone();
        next[index] = config.clone();
        self.persist(&next).await?;
        *configs = next;

        tracing::info!(id, name = %config.name, "Configuration updated");
        Ok(config)
    }

    pub async fn delete(&self, id: &str) -> Result<GenerationConfig, CoreError> {
        let mut configs = self.configs.write().await;

        let index = configs
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| CoreError::not_found("Configuration", id))?;

        let mut next = configs.clone();
        let removed = next.remove(index);
        self.persist(&next).await?;
        *configs = next;

        tracing::info!(id, name = %removed.name, "Configuration deleted");
        Ok(removed)
    }

    async fn persist(&self, configs: &[GenerationConfig]) -> Result<(), CoreError> {
        let body = serde_json::to_vec_pretty(configs)
            .map_err(|e| CoreError::Internal(format!("Failed to encode configs: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_error(&self.path, e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| write_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| write_error(&self.path, e))
    }
}

fn validate_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation("Configuration name is required".into()));
    }
    Ok(())
}

fn duplicate_name(name: &str) -> CoreError {
    CoreError::Conflict(format!("Configuration \"{name}\" already exists"))
}

fn write_error(path: &Path, err: std::io::Error) -> CoreError {
    CoreError::Internal(format!("Failed to write config file {}: {err}", path.display()))
}
