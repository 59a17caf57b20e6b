// ============================================================================
// logger.rs
// ============================================================================
//! Global `tracing` subscriber setup.
//!
//! [`LoggerManager`] validates the `[logger]` section and installs a registry
//! with a console layer and, when enabled, a journald layer. Each layer
//! filters with `RUST_LOG` when set, otherwise with the configured level.
//!
//! Both binaries call it right after loading the configuration:
//!
//! ```ignore
//! LoggerManager::new(cfg.logger.clone())?
//!     .with_identifier("garduino-shadow")
//!     .init()?;
//! ```

use std::io;

use thiserror::Error;
use tracing_subscriber::{fmt, fmt::format::FmtSpan, prelude::*, EnvFilter, Layer, Registry};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, JournaldConfig, LogFormat, LoggerConfig},
    print_info, print_warn,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Errors that can occur during logger configuration or initialization.
#[derive(Error, Debug)]
pub enum LoggerError {
    /// A global subscriber was already installed, or installing it failed.
    #[error("Logger initialization error: {0}")]
    InitializationError(String),

    /// Validation errors from the `[logger]` section.
    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    /// Journald socket unavailable.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// Every output is disabled, or the only enabled one failed.
    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,

    /// Journald failed while console output is also enabled.
    #[error(
        "Failed to initialize journald logger while console logging is enabled. Please check your configuration."
    )]
    JournaldFailedWithConsoleEnabled,
}

/// Manages logging configuration and global subscriber initialization.
pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    /// Creates a new `LoggerManager` and validates the provided configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - The `[logger]` section to use.
    ///
    /// # Errors
    ///
    /// Returns `LoggerError::ValidationError` if configuration validation fails.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;
        Ok(LoggerManager { config })
    }

    /// Overrides the journald identifier so each binary is tagged with its
    /// own name in the journal.
    ///
    /// An identifier set explicitly in the configuration is kept.
    ///
    /// # Arguments
    ///
    /// * `identifier` - Syslog identifier, normally the binary name.
    pub fn with_identifier(mut self, identifier: &str) -> Self {
        if let Some(journald) = self.config.journald.as_mut() {
            if journald.identifier == JournaldConfig::default().identifier {
                journald.identifier = identifier.to_string();
            }
        }
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.config.level))
    }

    /// Builds the configured layers. Fails when none could be built, or when
    /// journald fails while console output is also requested.
    fn layers(&self) -> Result<Vec<BoxedLayer>, LoggerError> {
        let mut layers = Vec::new();

        if let Some(console) = self.config.console.as_ref().filter(|c| c.enabled) {
            layers.push(console_layer(console, self.filter()));
        }

        if let Some(journald) = self.config.journald.as_ref().filter(|j| j.enabled) {
            match journald_layer(journald, self.filter()) {
                Ok(layer) => {
                    layers.push(layer);
                    print_info!(
                        "Systemd journald logger initialized with identifier: {}",
                        journald.identifier
                    );
                }
                Err(e) => {
                    print_warn!("Failed to initialize systemd journald logger: {}", e);
                    if self.config.console.as_ref().is_some_and(|c| c.enabled) {
                        return Err(LoggerError::JournaldFailedWithConsoleEnabled);
                    }
                }
            }
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }

        Ok(layers)
    }

    /// Installs the global subscriber. Call once, before the first event.
    ///
    /// # Errors
    ///
    /// Returns `LoggerError::NoLayersConfigured` when no output could be
    /// built, `LoggerError::JournaldFailedWithConsoleEnabled` when journald
    /// fails next to an enabled console, and
    /// `LoggerError::InitializationError` when a subscriber is already set.
    pub fn init(&self) -> Result<(), LoggerError> {
        let layers = self.layers()?;
        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))
    }
}

// ============================================================================
// Layers
// ============================================================================

fn console_layer(config: &ConsoleConfig, filter: EnvFilter) -> BoxedLayer {
    let span_events = if config.show_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let layer = fmt::layer()
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_ids)
        .with_span_events(span_events)
        .with_ansi(config.ansi_colors)
        .with_writer(io::stdout);

    match config.format {
        LogFormat::Json => layer.json().with_filter(filter).boxed(),
        LogFormat::Pretty => layer.pretty().with_filter(filter).boxed(),
        LogFormat::Compact => layer.compact().with_filter(filter).boxed(),
    }
}

fn journald_layer(config: &JournaldConfig, filter: EnvFilter) -> Result<BoxedLayer, LoggerError> {
    let layer = tracing_journald::layer()?.with_syslog_identifier(config.identifier.clone());
    Ok(layer.with_filter(filter).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::logger::JournaldConfig;

    #[test]
    fn test_invalid_level_rejected() {
        let config = LoggerConfig {
            level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(
            LoggerManager::new(config),
            Err(LoggerError::ValidationError(_))
        ));
    }

    #[test]
    fn test_no_layers_configured() {
        let config = LoggerConfig {
            console: None,
            journald: None,
            ..Default::default()
        };
        let manager = LoggerManager::new(config).unwrap();
        assert!(matches!(
            manager.layers(),
            Err(LoggerError::NoLayersConfigured)
        ));
    }

    #[test]
    fn test_console_layer_for_each_format() {
        for format in [LogFormat::Compact, LogFormat::Pretty, LogFormat::Json] {
            let config = LoggerConfig {
                console: Some(ConsoleConfig {
                    format,
                    ..Default::default()
                }),
                journald: None,
                ..Default::default()
            };
            let manager = LoggerManager::new(config).unwrap();
            assert_eq!(manager.layers().unwrap().len(), 1);
        }
    }

    #[test]
    fn test_identifier_override_keeps_custom_names() {
        let manager = LoggerManager::new(LoggerConfig::default())
            .unwrap()
            .with_identifier("garduino-shadow");
        assert_eq!(
            manager.config.journald.as_ref().unwrap().identifier,
            "garduino-shadow"
        );

        let config = LoggerConfig {
            journald: Some(JournaldConfig {
                enabled: false,
                identifier: "greenhouse".into(),
            }),
            ..Default::default()
        };
        let manager = LoggerManager::new(config)
            .unwrap()
            .with_identifier("garduino-shadow");
        assert_eq!(
            manager.config.journald.as_ref().unwrap().identifier,
            "greenhouse"
        );
    }
}
