//! Application configuration.
//!
//! One TOML file configures both programs; each reads the sections it
//! needs. The file is located through `GARDUINO_CONFIG`, then
//! `/etc/garduino/config.toml`. When neither exists the built-in defaults
//! are used, so both programs run from a bare checkout with only CLI flags.
//!
//! Loaded once at startup, before the tracing subscriber exists, which is
//! why this module reports through the `print_*!` macros.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::Validate;

use self::{logger::LoggerConfig, serial::SerialConfig, shadow::ShadowConfig};

pub mod logger;
pub mod serial;
pub mod shadow;

pub type TransportConfig = garduino_mqtt::Config;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "GARDUINO_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "/etc/garduino/config.toml";

/// Timestamp for messages printed before the subscriber is installed.
#[doc(hidden)]
pub fn early_timestamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

/// Goes to stderr, unlike the other two.
#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(err: validator::ValidationErrors) -> Self {
        ConfigError::ValidationError(err.to_string())
    }
}

#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    /// SerialLogger settings.
    #[validate(nested)]
    pub serial: SerialConfig,

    /// ShadowPublisher loop settings.
    #[validate(nested)]
    pub shadow: ShadowConfig,

    /// Broker connection for the ShadowPublisher.
    #[validate(nested)]
    pub transport: TransportConfig,
}

impl Config {
    /// Locates and loads the configuration, falling back to defaults.
    pub fn new() -> Result<Self, ConfigError> {
        match Self::get_config_path()? {
            Some(path) => Self::load(&path),
            None => {
                print_warn!("No configuration file found, using built-in defaults");
                Ok(Config::default())
            }
        }
    }

    /// `GARDUINO_CONFIG` wins; a path named there must exist.
    fn get_config_path() -> Result<Option<PathBuf>, ConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(config_path);
            if !path.exists() {
                return Err(ConfigError::Config(format!(
                    "{CONFIG_ENV} points at a missing file: {}",
                    path.display()
                )));
            }
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Ok(Some(path));
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(Some(fallback.to_path_buf()));
        }

        Ok(None)
    }

    /// Reads, parses and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        let config_str = fs::read_to_string(path)?;
        let config = Self::parse(&config_str)?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    pub fn parse(config_str: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(config_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.serial.sample_period, 60);
        assert_eq!(config.shadow.thing_name, "Bot");
        assert_eq!(config.transport.port, 8883);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[logger]
level = "debug"

[serial]
port_path = "/dev/ttyACM0"
sample_period = 10

[shadow]
thing_name = "Greenhouse"
legacy_pos_from_row = true

[transport]
host = "example-ats.iot.eu-west-1.amazonaws.com"
client_id = "garduino-test"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.logger.level, "debug");
        assert_eq!(config.serial.port_path, "/dev/ttyACM0");
        assert_eq!(config.serial.sample_period, 10);
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.shadow.thing_name, "Greenhouse");
        assert!(config.shadow.legacy_pos_from_row);
        assert_eq!(config.transport.client_id, "garduino-test");
        assert_eq!(config.transport.operation_timeout, 5);
    }

    #[test]
    fn test_parse_error() {
        let result = Config::parse("[serial\nport_path = 1");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validation_error() {
        let result = Config::parse("[serial]\nsample_period = 0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = Config::load(Path::new("/nonexistent/garduino.toml"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
