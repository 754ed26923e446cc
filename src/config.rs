//! Configuration for the schema core
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (mediaplan-schema.toml)
//! - Environment variables (MEDIAPLAN_SCHEMA__*)
//!
//! ## Example config file (mediaplan-schema.toml):
//! ```toml
//! [registry]
//! definitions_dir = "./definitions"
//!
//! [validation]
//! check_constraints = true
//!
//! [logging]
//! filter = "info"
//! ```
//!
//! A relative `definitions_dir` set in the file passed to
//! [`SchemaConfig::load_from`] resolves against that file's directory. Set
//! anywhere else, it resolves against the working directory.

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Where definitions come from
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Validation settings
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Directory of the explicit config file that set `definitions_dir`
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

/// Registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Directory of `v<maj>.<min>.<patch>/` definition folders; the bundled
    /// definitions are used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definitions_dir: Option<PathBuf>,
}

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Evaluate cross-field constraints (date ordering)
    #[serde(default = "default_true")]
    pub check_constraints: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when RUST_LOG is unset
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_true() -> bool {
    true
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            check_constraints: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl SchemaConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, with an explicit file taking precedence over the
    /// default locations
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = [
            "mediaplan-schema.toml",
            ".mediaplan-schema.toml",
            "config/mediaplan-schema.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("io", "mediaplan", "mediaplan-schema") {
            let xdg_config = config_dir.config_dir().join("mediaplan-schema.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // MEDIAPLAN_SCHEMA__VALIDATION__CHECK_CONSTRAINTS=false
        builder = builder.add_source(
            Environment::with_prefix("MEDIAPLAN_SCHEMA")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut loaded: Self = config.try_deserialize()?;

        if let Some(path) = config_path {
            let from_file = Config::builder()
                .add_source(File::from(path))
                .build()?
                .get::<PathBuf>("registry.definitions_dir")
                .ok();
            if from_file.is_some() && from_file == loaded.registry.definitions_dir {
                loaded.base_dir = path.parent().map(Path::to_path_buf);
            }
        }
        Ok(loaded)
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// The definitions directory as an absolute path where possible
    ///
    /// When the working directory cannot be read, a relative path is
    /// returned unchanged.
    pub fn definitions_dir(&self) -> Option<PathBuf> {
        let dir = self.registry.definitions_dir.as_ref()?;
        if dir.is_absolute() {
            return Some(dir.clone());
        }
        if let Some(base) = &self.base_dir {
            return Some(base.join(dir));
        }
        match std::env::current_dir() {
            Ok(cwd) => Some(cwd.join(dir)),
            Err(err) => {
                warn!(
                    path = %dir.display(),
                    error = %err,
                    "Cannot read the working directory, using definitions_dir as given"
                );
                Some(dir.clone())
            }
        }
    }
}
