//! Configuration loading

use crate::{ConfigFormat, DeviceConfig};
use regex::{Captures, Regex};
use smarter_core::{Error, Result};
use std::env;
use std::fs;
use std::path::Path;

/// Load configuration from a file
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<DeviceConfig> {
    let path = path.as_ref();

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {}: {e}", path.display())))?;

    let format = ConfigFormat::from_path(path)?;

    load_from_str(&content, format)
}

/// Substitute `${VAR}` and `${VAR:-default}` references
///
/// Every reference is resolved; the first unset variable without a default
/// fails the whole expansion. `$` on its own (regex anchors) is left alone.
fn expand_env_vars(content: &str) -> Result<String> {
    let reference = Regex::new(r"\$\{(\w+)(?::-([^}]*))?\}")
        .map_err(|e| Error::Config(format!("Invalid variable pattern: {e}")))?;

    let mut unset = None;
    let expanded = reference.replace_all(content, |caps: &Captures<'_>| {
        let name = &caps[1];
        match (env::var(name), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                unset.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match unset {
        Some(name) => Err(Error::Config(format!(
            "Environment variable '{name}' not set and no default provided"
        ))),
        None => Ok(expanded.into_owned()),
    }
}

/// Load configuration from a string
pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<DeviceConfig> {
    let expanded_content = expand_env_vars(content)?;

    // An empty YAML document means "no devices"
    if format == ConfigFormat::Yaml && expanded_content.trim().is_empty() {
        return Ok(DeviceConfig::default());
    }

    let config = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML: {e}")))?,
        ConfigFormat::Json => serde_json::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse JSON: {e}")))?,
    };

    Ok(config)
}

/// Load and validate the device configuration
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DeviceConfig> {
    let config = load_from_file(path)?;

    crate::validator::validate_config(&config)?;

    Ok(config)
}
