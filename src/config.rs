use crate::adapters::graph::{DEFAULT_GRAPH_BASE_URL, DEFAULT_GRAPH_VERSION};
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "CREATIVITY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "creativity.yaml";

/// Bootstrap configuration for the service process. Runtime tunables live in
/// `EngineSettings` inside the database instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
    pub log_dir: Option<PathBuf>,
    pub graph_base_url: String,
    pub graph_api_version: String,
    pub asset_signer_url: Option<String>,
    pub asset_signer_api_key: Option<String>,
    pub http_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            database_file: "creativity.db".to_string(),
            log_dir: None,
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            graph_api_version: DEFAULT_GRAPH_VERSION.to_string(),
            asset_signer_url: None,
            asset_signer_api_key: None,
            http_timeout_secs: 30,
        }
    }
}

impl ServiceConfig {
    /// Reads the YAML file named by `CREATIVITY_CONFIG` (or `creativity.yaml` when unset, where
    /// a missing file just means defaults), then applies `CREATIVITY_*` overrides.
    pub fn load() -> AppResult<Self> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok().filter(|value| !value.trim().is_empty());
        let path = PathBuf::from(explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));
        let yaml = match std::fs::read_to_string(&path) {
            Ok(raw) => Some(raw),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound && explicit.is_none() => None,
            Err(error) => {
                return Err(AppError::Io(format!(
                    "cannot read config file {}: {}",
                    path.display(),
                    error
                )))
            }
        };
        Self::from_sources(yaml.as_deref(), |key| std::env::var(key).ok())
    }

    pub fn from_sources(yaml: Option<&str>, env: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let mut config = match yaml {
            Some(raw) if !raw.trim().is_empty() => serde_yaml::from_str::<ServiceConfig>(raw)?,
            _ => ServiceConfig::default(),
        };

        if let Some(value) = env("CREATIVITY_DATA_DIR") {
            config.data_dir = PathBuf::from(value);
        }
        if let Some(value) = env("CREATIVITY_DATABASE_FILE") {
            config.database_file = value;
        }
        if let Some(value) = env("CREATIVITY_LOG_DIR") {
            config.log_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = env("CREATIVITY_GRAPH_BASE_URL") {
            config.graph_base_url = value;
        }
        if let Some(value) = env("CREATIVITY_GRAPH_API_VERSION") {
            config.graph_api_version = value;
        }
        if let Some(value) = env("CREATIVITY_SIGNER_URL") {
            config.asset_signer_url = Some(value);
        }
        if let Some(value) = env("CREATIVITY_SIGNER_API_KEY") {
            config.asset_signer_api_key = Some(value);
        }
        if let Some(value) = env("CREATIVITY_HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs = value.trim().parse().map_err(|_| {
                AppError::Validation(format!("CREATIVITY_HTTP_TIMEOUT_SECS must be a number, got '{}'", value))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.http_timeout_secs == 0 {
            return Err(AppError::Validation("http_timeout_secs must be at least 1".to_string()));
        }
        if !(self.graph_base_url.starts_with("https://") || self.graph_base_url.starts_with("http://")) {
            return Err(AppError::Validation(format!(
                "graph_base_url must be an http(s) URL, got '{}'",
                self.graph_base_url
            )));
        }
        if self.database_file.trim().is_empty() {
            return Err(AppError::Validation("database_file cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| self.data_dir.join("logs"))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
