use std::path::{Path, PathBuf};

use anyhow::anyhow;
use directories::BaseDirs;
use serde_json::Value as JsonValue;
use tokio::fs;
use uuid::Uuid;

use crate::builder::Target;
use crate::error::BuildError;
use crate::params::parse_base_config;

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> anyhow::Result<Self> {
        let base = BaseDirs::new().ok_or_else(|| anyhow!("failed to resolve base directories"))?;
        Ok(Self::with_config_dir(base.home_dir().join(".config/sublink")))
    }

    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn base_configs_dir(&self) -> PathBuf {
        self.config_dir.join("base-configs")
    }

    pub fn base_config_file(&self, id: &str) -> PathBuf {
        self.base_configs_dir().join(format!("{id}.json"))
    }

    pub fn output_config_path(&self, target: Target) -> PathBuf {
        let file = match target {
            Target::SingBox => "singbox.json",
            Target::Clash => "clash.yaml",
            Target::Surge => "surge.conf",
        };
        self.config_dir.join("output").join(file)
    }

    pub async fn ensure_runtime_dirs(&self) -> anyhow::Result<()> {
        fs::create_dir_all(self.config_dir()).await?;
        fs::create_dir_all(self.base_configs_dir()).await?;
        fs::create_dir_all(self.config_dir.join("output")).await?;
        Ok(())
    }
}

/// File-backed store for user base documents, keyed by generated ids.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    paths: AppPaths,
}

impl ConfigStore {
    pub fn new(paths: AppPaths) -> Self {
        Self { paths }
    }

    /// Validate and persist a base document, returning its id.
    ///
    /// Clash documents may be YAML; everything is stored as JSON.
    pub async fn save(&self, target: Target, content: &str) -> Result<String, BuildError> {
        let document = match target {
            Target::Clash => parse_base_config(content)?,
            Target::SingBox | Target::Surge => {
                let value: JsonValue = serde_json::from_str(content)
                    .map_err(|err| BuildError::invalid("config", err))?;
                if !value.is_object() {
                    return Err(BuildError::invalid("config", "base document must be a mapping"));
                }
                value
            }
        };

        let simple = Uuid::new_v4().simple().to_string();
        let id = format!("{}_{}", target.as_str(), &simple[..8]);

        fs::create_dir_all(self.paths.base_configs_dir()).await?;
        fs::write(
            self.paths.base_config_file(&id),
            serde_json::to_string_pretty(&document)?,
        )
        .await?;
        tracing::info!(id = %id, "saved base config");
        Ok(id)
    }

    pub async fn load(&self, id: &str) -> Result<Option<JsonValue>, BuildError> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(BuildError::invalid("configId", format!("malformed id {id:?}")));
        }

        match fs::read_to_string(self.paths.base_config_file(id)).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
