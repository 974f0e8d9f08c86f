//! Engine Configuration Management
//!
//! TOML file, then environment overrides, then validation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding `storage.path`
pub const ENV_STORAGE_PATH: &str = "SNGP_STORAGE_PATH";
/// Environment variable overriding `logging.level`
pub const ENV_LOG_LEVEL: &str = "SNGP_LOG_LEVEL";

/// Highest scale `rust_decimal` can represent
const MAX_AMOUNT_SCALE: u32 = 28;

/// Configuration validation error
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Configuration parsing error: {0}")]
    Parsing(#[from] toml::de::Error),
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub rewards: RewardSettings,
    pub queries: QueryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// sled database directory
    pub path: PathBuf,
    /// Use a throwaway database (tests, local runs)
    pub temporary: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/sngp"),
            temporary: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Reward computation and claim settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardSettings {
    /// Decimal places reward amounts are truncated to
    pub amount_scale: u32,
    /// Participation remark whose rows skip the eligibility check
    pub migration_remark: String,
    /// Reason code used for claim ledger entries and request ids
    pub claim_reason_code: String,
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            amount_scale: 8,
            migration_remark: "MIGRATION_SCRIPT".to_string(),
            claim_reason_code: "SNGP_REWARD".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Apply `SNGP_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(path) = lookup(ENV_STORAGE_PATH).filter(|p| !p.trim().is_empty()) {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|l| !l.trim().is_empty()) {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.storage.temporary && self.storage.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "storage.path",
                reason: "must not be empty unless storage.temporary is set".to_string(),
            });
        }
        if self.rewards.amount_scale > MAX_AMOUNT_SCALE {
            return Err(ConfigError::Invalid {
                field: "rewards.amount_scale",
                reason: format!("must be at most {}", MAX_AMOUNT_SCALE),
            });
        }
        if self.rewards.migration_remark.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "rewards.migration_remark",
                reason: "must not be empty".to_string(),
            });
        }
        if self.rewards.claim_reason_code.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "rewards.claim_reason_code",
                reason: "must not be empty".to_string(),
            });
        }
        if self.queries.default_page_size == 0 || self.queries.max_page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "queries",
                reason: "page sizes must be greater than zero".to_string(),
            });
        }
        if self.queries.default_page_size > self.queries.max_page_size {
            return Err(ConfigError::Invalid {
                field: "queries.default_page_size",
                reason: format!(
                    "{} exceeds max_page_size {}",
                    self.queries.default_page_size, self.queries.max_page_size
                ),
            });
        }
        Ok(())
    }
}

/// Load and validate the engine configuration
///
/// Without a path the defaults are used. Environment overrides are applied
/// either way.
pub fn load_configuration(path: Option<&Path>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => {
            tracing::info!("Loading SNGP configuration from {}", path.display());
            EngineConfig::load(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    config.apply_env_overrides();
    config.validate().context("invalid SNGP configuration")?;

    tracing::info!(
        storage = %config.storage.path.display(),
        temporary = config.storage.temporary,
        amount_scale = config.rewards.amount_scale,
        "Configuration validated"
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [rewards]
            amount_scale = 6

            [queries]
            max_page_size = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.rewards.amount_scale, 6);
        assert_eq!(config.rewards.migration_remark, "MIGRATION_SCRIPT");
        assert_eq!(config.queries.max_page_size, 50);
        assert_eq!(config.queries.default_page_size, 20);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.queries.default_page_size = 500;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "queries.default_page_size", .. })
        ));

        let mut config = EngineConfig::default();
        config.rewards.amount_scale = 40;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.rewards.migration_remark = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_replace_path_and_level() {
        let mut config = EngineConfig::default();
        config.apply_overrides(|key| match key {
            ENV_STORAGE_PATH => Some("/var/lib/sngp".to_string()),
            ENV_LOG_LEVEL => Some("debug".to_string()),
            _ => None,
        });
        assert_eq!(config.storage.path, PathBuf::from("/var/lib/sngp"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\ntemporary = true\n\n[logging]\nlevel = \"warn\"").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert!(config.storage.temporary);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        assert!(matches!(
            EngineConfig::from_toml_str("[rewards\namount_scale = "),
            Err(ConfigError::Parsing(_))
        ));
    }
}
