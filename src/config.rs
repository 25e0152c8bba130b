//! Application configuration (`app.yaml`) and the shared YAML loading helper.
//!
//! All configuration models are strict: unknown keys are rejected so that a
//! typo in a deployment file fails the startup instead of silently changing
//! behaviour. The main `app.yaml` is mandatory; the per-module files
//! (`fdp.yaml`, `beacon-*.yaml`) are optional and their absence disables the
//! corresponding module.

use anyhow::{Context as _, anyhow};
use base64::Engine as _;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use crate::error::{NodeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum LoggerLevel {
    DEBUG,
    INFO,
    WARN,
    ERROR,
}

impl LoggerLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::DEBUG => "debug",
            Self::INFO => "info",
            Self::WARN => "warn",
            Self::ERROR => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerFormat {
    Plain,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggerConfig {
    pub root_level: LoggerLevel,
    pub app_level: LoggerLevel,
    pub format: LoggerFormat,
}

/// Access configuration for the object-store synchroniser.
///
/// The storage URL is `[STORAGE-URL]/[BUCKET-NAME]/[PREFIX]` where the prefix
/// is an optional path-prefix for the objects to be synced. The prefix is
/// stripped when resolving the local path of a file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3StorageConfig {
    pub url: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_path_suffix")]
    pub path_suffix: String,
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

fn default_path_suffix() -> String {
    ".parquet".to_owned()
}

impl S3StorageConfig {
    pub fn is_enabled(&self) -> bool {
        self.url.is_some() && self.access_key.is_some() && self.secret_key.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasicAuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub logger: LoggerConfig,
    pub data_dir: PathBuf,
    pub sync_from_s3: Option<S3StorageConfig>,
    pub basic_auth: Option<BasicAuthConfig>,
}

impl AppConfig {
    /// Encoded `Authorization` header value protecting the status page,
    /// when basic-auth credentials are configured.
    pub fn info_page_credentials(&self) -> Option<String> {
        let basic = self.basic_auth.as_ref()?;
        match (&basic.username, &basic.password) {
            (Some(user), Some(pass)) => Some(encode_basic_credential(user, pass)),
            _ => None,
        }
    }
}

/// Encodes a username/password pair into a full `Basic ...` header value.
pub fn encode_basic_credential(username: &str, password: &str) -> String {
    let cred = format!("{username}:{password}");
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(cred)
    )
}

/// Loads a strict YAML configuration file from the configuration directory.
///
/// Returns `Ok(None)` when the file does not exist (the module it configures
/// is disabled); any parse failure is an error, which the caller treats as
/// fatal.
pub fn load_config_yaml<T: DeserializeOwned>(config_dir: &Path, filename: &str) -> Result<Option<T>> {
    let path = config_dir.join(filename);
    if !path.exists() {
        tracing::warn!("Configuration file is missing (module disabled): {}", path.display());
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read configuration file {}", path.display()))
        .map_err(|e| NodeError::Config(e.to_string()))?;

    let parsed: T = serde_yaml::from_str(&contents)
        .map_err(|e| NodeError::Config(format!("Failed to parse {}: {e}", path.display())))?;

    Ok(Some(parsed))
}

/// Loads a configuration file that must exist (`app.yaml`).
pub fn load_required_yaml<T: DeserializeOwned>(config_dir: &Path, filename: &str) -> Result<T> {
    load_config_yaml(config_dir, filename)?.ok_or_else(|| {
        NodeError::Config(
            anyhow!(
                "The configuration file is missing: {}",
                config_dir.join(filename).display()
            )
            .to_string(),
        )
    })
}
