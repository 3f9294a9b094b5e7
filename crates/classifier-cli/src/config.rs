use classifier_client::ClientConfig;
use config::builder::{ConfigBuilder, DefaultState};
use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Timeout for REST calls; job streams are never cut off
    #[serde(default = "classifier_client::config::default_request_timeout_ms")]
    pub request_timeout_ms: Option<u64>,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl From<ApiConfig> for ClientConfig {
    fn from(config: ApiConfig) -> Self {
        Self {
            base_url: config.base_url,
            connect_timeout_ms: config.connect_timeout_ms,
            request_timeout_ms: config.request_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
        }
    }
}

fn default_download_dir() -> String {
    ".".to_string()
}

impl Config {
    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        ConfigLoader::builder()
            .set_default("api.base_url", classifier_client::config::DEFAULT_BASE_URL)?
            .set_default("logging.level", "warn")?
            .set_default("logging.format", "pretty")
    }

    /// Load configuration from TOML files and environment variables
    ///
    /// Hierarchy (weakest to strongest):
    /// 1. config/default.toml
    /// 2. config/{ENV}.toml (if ENV is set)
    /// 3. Environment variables `CLASSIFIER_<SECTION>__<KEY>`
    /// 4. `CLASSIFIER_BASE_URL` as a shortcut for the API root
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("ENV").unwrap_or_else(|_| "dev".to_string());

        let builder = Self::defaults()?
            // 1. Load default config
            .add_source(File::with_name("config/default").required(false))
            // 2. Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // 3. Environment variables override everything
            .add_source(
                Environment::with_prefix("CLASSIFIER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut cfg: Config = builder.build()?.try_deserialize()?;

        if let Ok(url) = std::env::var(classifier_client::config::BASE_URL_ENV) {
            if !url.trim().is_empty() {
                cfg.api.base_url = url.trim().to_string();
            }
        }

        Ok(cfg)
    }

    /// Load config from a single file on top of the built-in defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let builder = Self::defaults()?.add_source(File::from(path.as_ref()));

        let config = builder.build()?;
        config.try_deserialize()
    }
}
