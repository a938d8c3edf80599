//! Decoder configuration types
//!
//! This module defines the configuration needed by the decoder library. Packet
//! acquisition and output handling belong to the application layer.

use serde::{Deserialize, Serialize};

/// Configuration for the decoder library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// IANA timezone the reader was used in (default: UTC)
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Fail with `MissingFactoryConfig` instead of dropping records whose
    /// device time cannot be resolved
    #[serde(default)]
    pub strict_time_conversion: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            strict_time_conversion: false,
        }
    }
}

impl DecoderConfig {
    /// Create a new decoder configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the timezone
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Builder method: require a factory configuration
    pub fn with_strict_time_conversion(mut self, enabled: bool) -> Self {
        self.strict_time_conversion = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_config_builder() {
        let config = DecoderConfig::new()
            .with_timezone("Europe/Vienna")
            .with_strict_time_conversion(true);

        assert_eq!(config.timezone, "Europe/Vienna");
        assert!(config.strict_time_conversion);
    }

    #[test]
    fn test_defaults_from_empty_json() {
        let config: DecoderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, DecoderConfig::default());
        assert_eq!(config.timezone, "UTC");
        assert!(!config.strict_time_conversion);
    }
}
