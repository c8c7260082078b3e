//! Configuration management for the table store
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (kv-tables.toml)
//! - Environment variables (KVTABLES__*)
//!
//! ## Example config file (kv-tables.toml):
//! ```toml
//! [store]
//! host = "localhost"
//! port = 6379
//!
//! [schemas]
//! dir = "./schemas"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TablesConfig {
    /// Connection settings for the key-value store
    #[serde(default)]
    pub store: StoreConfig,

    /// Where table definitions are read from
    #[serde(default)]
    pub schemas: SchemasConfig,
}

/// Key-value store connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Schema definition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemasConfig {
    /// Directory scanned for `*.json` table definitions
    #[serde(default = "default_schemas_dir")]
    pub dir: PathBuf,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_schemas_dir() -> PathBuf {
    PathBuf::from("schemas")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SchemasConfig {
    fn default() -> Self {
        Self {
            dir: default_schemas_dir(),
        }
    }
}

impl StoreConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` as passed to the socket
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl TablesConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, adding a specific file on top of the default locations
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = [
            "kv-tables.toml",
            ".kv-tables.toml",
            "config/kv-tables.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "kv-tables") {
            let xdg_config = config_dir.config_dir().join("kv-tables.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // KVTABLES__STORE__HOST, KVTABLES__STORE__PORT, ...
        builder = builder.add_source(
            Environment::with_prefix("KVTABLES")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get the schema directory (resolves relative paths)
    pub fn schemas_dir(&self) -> PathBuf {
        if self.schemas.dir.is_absolute() {
            self.schemas.dir.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.schemas.dir)
        }
    }
}
