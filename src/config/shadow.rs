//! `[shadow]` section: which shadow to publish to and how often.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ShadowConfig {
    #[validate(length(
        min = 1,
        max = 128,
        message = "Thing name must be between 1 and 128 characters"
    ))]
    pub thing_name: String,

    /// Seconds between two published readings.
    #[validate(range(
        min = 1,
        max = 86_400,
        message = "Publish interval must be between 1 and 86400 seconds"
    ))]
    pub publish_interval: u64,

    /// Delete the stored shadow document once before the first update.
    pub delete_on_start: bool,

    /// Report `pos` with the value of `row`, as the first deployed version
    /// of the publisher did. Dashboards built on that data may rely on it.
    pub legacy_pos_from_row: bool,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        ShadowConfig {
            thing_name: "Bot".to_string(),
            publish_interval: 10,
            delete_on_start: true,
            legacy_pos_from_row: false,
        }
    }
}

impl ShadowConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ShadowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.publish_interval(), Duration::from_secs(10));
        assert!(config.delete_on_start);
        assert!(!config.legacy_pos_from_row);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = ShadowConfig {
            publish_interval: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
