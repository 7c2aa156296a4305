//! Portal configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `SCIPORTAL__SECTION__KEY` environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::client::{Credentials, ServiceUrls};
use crate::launch::CatalogSource;
use crate::session::{PollingConfig, SessionStatus, StatusPolicy};

pub const APP_NAME: &str = "sciportal";

const ENV_PREFIX: &str = "SCIPORTAL";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub service: ServiceConfig,
    pub polling: PollingSettings,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
}

/// Session service endpoints and credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL the endpoints derive from.
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_url: Option<String>,
    pub timeout_secs: u64,
    /// Raw `Cookie` header value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_cookie: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/skaha/v0".to_string(),
            sessions_url: None,
            images_url: None,
            context_url: None,
            timeout_secs: 30,
            auth_cookie: None,
            bearer_token: None,
        }
    }
}

impl ServiceConfig {
    /// Endpoints derived from `base_url`, with per-endpoint overrides applied.
    pub fn urls(&self) -> ServiceUrls {
        let mut urls = ServiceUrls::from_base(&self.base_url);
        if let Some(url) = &self.sessions_url {
            urls.sessions = url.clone();
        }
        if let Some(url) = &self.images_url {
            urls.images = url.clone();
        }
        if let Some(url) = &self.context_url {
            urls.context = url.clone();
        }
        urls
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            cookie: self.auth_cookie.clone(),
            bearer_token: self.bearer_token.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub interval_ms: u64,
    pub max_consecutive_failures: u32,
    /// Statuses that keep polling going.
    pub transient_statuses: Vec<String>,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_consecutive_failures: 1,
            transient_statuses: vec![
                SessionStatus::Pending.to_string(),
                SessionStatus::Terminating.to_string(),
            ],
        }
    }
}

impl PollingSettings {
    pub fn to_polling_config(&self) -> PollingConfig {
        PollingConfig {
            interval: Duration::from_millis(self.interval_ms),
            max_consecutive_failures: self.max_consecutive_failures.max(1),
            policy: StatusPolicy::new(self.transient_statuses.iter().map(String::as_str)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Session type catalog JSON. The built-in catalog is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_map_path: Option<String>,
}

impl CatalogConfig {
    pub fn source(&self) -> CatalogSource {
        match &self.type_map_path {
            Some(path) => CatalogSource::File(PathBuf::from(path)),
            None => CatalogSource::Builtin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load the configuration.
///
/// `path` overrides the default file location. A missing file is not an
/// error; defaults and environment variables still apply.
pub fn load(path: Option<&Path>) -> Result<PortalConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    let built = Config::builder()
        .set_default("service.timeout_secs", 30_i64)?
        .set_default("polling.interval_ms", 1000_i64)?
        .set_default("polling.max_consecutive_failures", 1_i64)?
        .set_default("logging.level", "info")?
        .add_source(
            File::from(path.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("polling.transient_statuses"),
        )
        .build()
        .with_context(|| format!("loading configuration from {}", path.display()))?;

    let mut config: PortalConfig = built
        .try_deserialize()
        .context("parsing configuration")?;

    if let Some(ref file) = config.catalog.type_map_path {
        let expanded = expand_str_path(file)?;
        config.catalog.type_map_path = Some(expanded.display().to_string());
    }

    Ok(config)
}

/// Write a commented default config to `path`, creating parent directories.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = PortalConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = String::new();
    body.push_str("# Configuration for ");
    body.push_str(APP_NAME);
    body.push('\n');
    body.push_str("# File: ");
    body.push_str(&path.display().to_string());
    body.push_str("\n\n");
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join("config.toml"))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}
