use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::eligibility::{EligibilityRules, OverflowPolicy};
use crate::transfer::{TransferFormat, DEFAULT_PAGE_BASE};
use crate::AppError;

pub const CONFIG_DIR_NAME: &str = "taskmover";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const DEFAULT_PAGE_DELAY_MS: u64 = 350;

pub const ENV_SOURCE_DB: &str = "TASKMOVER_SOURCE_DB";
pub const ENV_DESTINATION_DB: &str = "TASKMOVER_DESTINATION_DB";
pub const ENV_FALLBACK_ASSIGNEE: &str = "TASKMOVER_FALLBACK_ASSIGNEE";
pub const ENV_PAGE_DELAY_MS: &str = "TASKMOVER_PAGE_DELAY_MS";
pub const ENV_LOG_DIR: &str = "TASKMOVER_LOG_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{field} is not set (config file or {env})")]
    Missing { field: &'static str, env: &'static str },
    #[error("{field} '{value}' is not a database id")]
    InvalidId { field: &'static str, value: String },
    #[error("{env} must be a number of milliseconds, got '{value}'")]
    InvalidNumber { env: &'static str, value: String },
}

impl From<ConfigError> for AppError {
    fn from(error: ConfigError) -> Self {
        let code = match &error {
            ConfigError::Read { .. } => "CONFIG/READ",
            ConfigError::Parse { .. } => "CONFIG/PARSE",
            ConfigError::Missing { .. } => "CONFIG/MISSING",
            ConfigError::InvalidId { .. } => "CONFIG/INVALID_ID",
            ConfigError::InvalidNumber { .. } => "CONFIG/INVALID_NUMBER",
        };
        AppError::new(code, error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrationConfig {
    pub source_database_id: String,
    pub destination_database_id: String,
    /// Principal id, email or display name used when a record has no assignee.
    pub fallback_assignee: Option<String>,
    pub overflow_policy: OverflowPolicy,
    /// Accepts `Ongoing` statuses and `Activity` records besides finished projects.
    pub allow_activities: bool,
    pub transfer_format: TransferFormat,
    pub page_url_base: String,
    pub page_delay_ms: u64,
    pub log_dir: Option<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            source_database_id: String::new(),
            destination_database_id: String::new(),
            fallback_assignee: None,
            overflow_policy: OverflowPolicy::default(),
            allow_activities: false,
            transfer_format: TransferFormat::default(),
            page_url_base: DEFAULT_PAGE_BASE.to_string(),
            page_delay_ms: DEFAULT_PAGE_DELAY_MS,
            log_dir: None,
        }
    }
}

impl MigrationConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Reads `path` (or the default location when it exists), then applies
    /// environment overrides. A missing default file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(default) => Self::from_file(&default)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_SOURCE_DB) {
            self.source_database_id = value;
        }
        if let Some(value) = lookup(ENV_DESTINATION_DB) {
            self.destination_database_id = value;
        }
        if let Some(value) = lookup(ENV_FALLBACK_ASSIGNEE) {
            self.fallback_assignee = Some(value).filter(|v| !v.trim().is_empty());
        }
        if let Some(value) = lookup(ENV_PAGE_DELAY_MS) {
            self.page_delay_ms =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber {
                        env: ENV_PAGE_DELAY_MS,
                        value: value.clone(),
                    })?;
        }
        if let Some(value) = lookup(ENV_LOG_DIR) {
            self.log_dir = Some(PathBuf::from(value));
        }
        Ok(())
    }

    /// Both database ids are required before any store call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_database_id("sourceDatabaseId", ENV_SOURCE_DB, &self.source_database_id)?;
        check_database_id(
            "destinationDatabaseId",
            ENV_DESTINATION_DB,
            &self.destination_database_id,
        )?;
        Ok(())
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn rules(&self) -> EligibilityRules {
        EligibilityRules {
            allow_activities: self.allow_activities,
            overflow_policy: self.overflow_policy,
        }
    }
}

fn check_database_id(
    field: &'static str,
    env: &'static str,
    value: &str,
) -> Result<(), ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::Missing { field, env });
    }
    if Uuid::try_parse(value).is_err() {
        return Err(ConfigError::InvalidId {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
