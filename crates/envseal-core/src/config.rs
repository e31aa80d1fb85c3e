use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{EnvsealError, EnvsealResult};
use crate::types::SchemaVersion;

/// Top-level configuration (loaded from envseal.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvsealConfig {
    pub engine: EngineConfig,
    pub default_key: DefaultKeyConfig,
    pub log: LogConfig,
}

impl EnvsealConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> EnvsealResult<Self> {
        let config: EnvsealConfig =
            toml::from_str(content).map_err(|e| EnvsealError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EnvsealResult<()> {
        self.engine.validate()?;
        self.default_key.validate()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Schema version for new in-memory values: 2 (default) or 1
    pub write_schema_version: SchemaVersion,
}

impl EngineConfig {
    pub fn validate(&self) -> EnvsealResult<()> {
        if !self.write_schema_version.is_value_write_version() {
            return Err(EnvsealError::Config(format!(
                "engine.write_schema_version must be 1 or 2, got {}",
                self.write_schema_version.number()
            )));
        }
        Ok(())
    }
}

/// Where the default key is cached and persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultKeyConfig {
    /// Entry name in the cache store
    pub cache_name: String,
    /// Entry name in the durable store
    pub store_name: String,
    /// Root directory of the file-backed durable store
    pub store_dir: PathBuf,
}

impl DefaultKeyConfig {
    pub fn validate(&self) -> EnvsealResult<()> {
        if self.cache_name.is_empty() || self.store_name.is_empty() {
            return Err(EnvsealError::Config(
                "default_key.cache_name and default_key.store_name must not be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DefaultKeyConfig {
    fn default() -> Self {
        Self {
            cache_name: "envseal-default-key".into(),
            store_name: "encryption/default.key".into(),
            store_dir: PathBuf::from("~/.local/share/envseal"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[engine]
write_schema_version = 1

[default_key]
cache_name = "app-key"
store_name = "keys/app.key"
store_dir = "/var/lib/envseal"

[log]
level = "debug"
format = "json"
"#;
        let config: EnvsealConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.engine.write_schema_version, SchemaVersion::V1);
        assert_eq!(config.default_key.cache_name, "app-key");
        assert_eq!(config.default_key.store_name, "keys/app.key");
        assert_eq!(config.default_key.store_dir, PathBuf::from("/var/lib/envseal"));
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: EnvsealConfig = toml::from_str("").unwrap();

        assert_eq!(config.engine.write_schema_version, SchemaVersion::V2);
        assert_eq!(config.default_key.cache_name, "envseal-default-key");
        assert_eq!(config.default_key.store_name, "encryption/default.key");
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "text");
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_write_version_rejected_at_parse() {
        let result: Result<EnvsealConfig, _> =
            toml::from_str("[engine]\nwrite_schema_version = 9\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_chunked_version_rejected_for_values() {
        let config: EnvsealConfig =
            toml::from_str("[engine]\nwrite_schema_version = 3\n").unwrap();
        assert!(matches!(config.validate(), Err(EnvsealError::Config(_))));
    }

    #[test]
    fn test_empty_store_name_rejected() {
        let config: EnvsealConfig =
            toml::from_str("[default_key]\nstore_name = \"\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_str_validates() {
        assert!(EnvsealConfig::from_toml_str("[log]\nlevel = \"warn\"\n").is_ok());
        assert!(matches!(
            EnvsealConfig::from_toml_str("[engine]\nwrite_schema_version = 3\n"),
            Err(EnvsealError::Config(_))
        ));
        assert!(matches!(
            EnvsealConfig::from_toml_str("not = [valid"),
            Err(EnvsealError::Config(_))
        ));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = EnvsealConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: EnvsealConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(
            config.engine.write_schema_version,
            parsed.engine.write_schema_version
        );
        assert_eq!(config.default_key.store_dir, parsed.default_key.store_dir);
        assert_eq!(config.log.format, parsed.log.format);
    }
}
