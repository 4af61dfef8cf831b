//! Application configuration
//!
//! Sources, lowest precedence first: built-in defaults, a config file (any
//! format the `config` crate detects), then `SESSION_MEMORY__*` environment
//! variables, e.g. `SESSION_MEMORY__MEMORY__TOKEN_LIMIT=4000`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MemoryError, Result};
use crate::memory::{MemoryConfig, TokenizerConfig};
use crate::store::StoreConfig;

const ENV_PREFIX: &str = "SESSION_MEMORY";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    /// `pretty` or `json`
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_level() -> String { "info".to_string() }
fn default_format() -> String { "pretty".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from a file with environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(env_source())
            .build()?;
        Self::finish(settings)
    }

    /// Load from an inline TOML document with environment overrides
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .add_source(env_source())
            .build()?;
        Self::finish(settings)
    }

    /// Load defaults overlaid by `.env` and the process environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let settings = config::Config::builder().add_source(env_source()).build()?;
        Self::finish(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.memory
            .validate()
            .map_err(|e| MemoryError::Configuration(e.to_string()))?;

        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(MemoryError::Configuration(format!(
                "unknown logging format: {}",
                other
            ))),
        }
    }

    fn finish(settings: config::Config) -> Result<Self> {
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
