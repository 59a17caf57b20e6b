//! `[serial]` section: the serial line and the CSV log it feeds.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device, e.g. `/dev/ttyUSB0` or `COM3`.
    #[validate(length(min = 1, message = "Serial port path cannot be empty"))]
    pub port_path: String,

    #[validate(range(
        min = 300,
        max = 4_000_000,
        message = "Baud rate must be between 300 and 4000000"
    ))]
    pub baud_rate: u32,

    #[validate(range(
        min = 1,
        max = 60_000,
        message = "Read timeout must be between 1 and 60000 ms"
    ))]
    pub read_timeout_ms: u64,

    /// Reads discarded after opening the port.
    pub warmup_reads: u32,

    /// Keep one line out of this many.
    #[validate(range(min = 1, message = "Sample period must be at least 1"))]
    pub sample_period: u32,

    /// Sleep when no input is pending.
    #[validate(range(
        min = 1,
        max = 10_000,
        message = "Idle wait must be between 1 and 10000 ms"
    ))]
    pub idle_wait_ms: u64,

    /// CSV log. The parent directory is created on first write.
    #[validate(length(min = 1, message = "Output path cannot be empty"))]
    pub output_path: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port_path: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            read_timeout_ms: 2000,
            warmup_reads: 2,
            sample_period: 60,
            idle_wait_ms: 50,
            output_path: "GarduinoOutput/garduinoOutputV2_00.csv".to_string(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SerialConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.read_timeout(), Duration::from_secs(2));
        assert_eq!(config.idle_wait(), Duration::from_millis(50));
        assert_eq!(config.warmup_reads, 2);
        assert_eq!(
            config.output_path(),
            PathBuf::from("GarduinoOutput/garduinoOutputV2_00.csv")
        );
    }

    #[test]
    fn test_empty_port_rejected() {
        let config = SerialConfig {
            port_path: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
