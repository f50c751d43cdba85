use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use patrimo_dvf::{GeoSettings, PriceSettings};
use patrimo_import::{CategoryRuleEngine, RuleError};

pub const CONFIG_PATH_VAR: &str = "PATRIMO_CONFIG";
pub const DATABASE_URL_VAR: &str = "PATRIMO_DATABASE_URL";
pub const BIND_VAR: &str = "PATRIMO_BIND";
pub const GEO_BASE_URL_VAR: &str = "PATRIMO_GEO_BASE_URL";
pub const RULES_VAR: &str = "PATRIMO_RULES";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid categorization rules: {0}")]
    Rules(#[from] RuleError),
}

/// Server settings. Every field has a default, so an empty file is valid.
///
/// ```toml
/// database_url = "sqlite:patrimo.db"
/// bind = "0.0.0.0:3000"
/// rules_path = "rules.toml"
///
/// [prices]
/// min_sample = 20
///
/// [geo]
/// cache_ttl_hours = 12
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    pub bind: String,
    /// Request body cap for uploads, in bytes.
    pub max_body_bytes: usize,
    pub prices: PriceSettings,
    pub geo: GeoSettings,
    /// TOML `[[rules]]` file replacing the built-in categorization rules.
    pub rules_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:patrimo.db".to_string(),
            bind: "127.0.0.1:3000".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
            prices: PriceSettings::default(),
            geo: GeoSettings::default(),
            rules_path: None,
        }
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reads the file named by `PATRIMO_CONFIG` (if set), then applies the
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match env(CONFIG_PATH_VAR) {
            Some(path) => Self::from_toml(&read(Path::new(&path))?)?,
            None => Self::default(),
        };
        config.apply_env(env);
        Ok(config)
    }

    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(url) = env(DATABASE_URL_VAR) {
            self.database_url = url;
        }
        if let Some(bind) = env(BIND_VAR) {
            self.bind = bind;
        }
        if let Some(base_url) = env(GEO_BASE_URL_VAR) {
            self.geo.base_url = base_url;
        }
        if let Some(rules) = env(RULES_VAR) {
            self.rules_path = Some(PathBuf::from(rules));
        }
    }

    /// The configured rule file, or the built-in rules.
    pub fn rule_engine(&self) -> Result<CategoryRuleEngine, ConfigError> {
        match &self.rules_path {
            Some(path) => Ok(CategoryRuleEngine::from_toml(&read(path)?)?),
            None => Ok(CategoryRuleEngine::default()),
        }
    }
}
