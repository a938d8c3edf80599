//! Configuration loading and parsing

use anyhow::{Context, Result};
use fslibre_decoder::DecoderConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InputConfig {
    /// Packet dump files to decode
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Overrides the record count stored in each dump
    pub record_count: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Output file (default: stdout)
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub pretty: bool,
    /// Emit the full session report instead of the records alone
    #[serde(default)]
    pub include_summary: bool,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [input]
            files = ["reader-dump.json"]
            record_count = 131072

            [decoder]
            timezone = "America/New_York"

            [output]
            pretty = true
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.input.files.len(), 1);
        assert_eq!(config.input.record_count, Some(131072));
        assert_eq!(config.decoder.timezone, "America/New_York");
        assert!(!config.decoder.strict_time_conversion);
        assert!(config.output.pretty);
        assert!(!config.output.include_summary);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.input.files.is_empty());
        assert_eq!(config.decoder.timezone, "UTC");
        assert!(config.output.path.is_none());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[decoder]\nstrict_time_conversion = true").unwrap();

        let config = load_config(file.path()).unwrap();
        assert!(config.decoder.strict_time_conversion);
    }

    #[test]
    fn test_load_config_errors_name_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[decoder\ntimezone = ").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));

        let missing = load_config(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(missing.to_string().contains("Failed to read config file"));
    }
}
