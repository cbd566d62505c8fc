//! Bootstrap configuration loading
//!
//! Configuration file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. User config file (`~/.config/hepm/<file>`)
//! 4. System config file (`/etc/hepm/<file>`)
//! 5. Compiled defaults (no file)
//!
//! Services deserialize their own TOML layout; this module only finds and
//! parses the file and provides the pieces every service shares.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Directory name used under the user and system config roots
pub const CONFIG_DIR_NAME: &str = "hepm";

/// Logging configuration (`[logging]` table)
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level directive (trace, debug, info, warn, error or a full EnvFilter directive)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Locate the configuration file
///
/// Returns `None` when no candidate exists; callers fall back to defaults.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config directory
    if let Some(user_config) = dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(file_name)) {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    // Priority 4: System config directory
    let system_config = PathBuf::from("/etc").join(CONFIG_DIR_NAME).join(file_name);
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Parse a TOML file into `T`
pub fn load_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load `T` from the resolved config file, or `T::default()` when there is none
///
/// An explicitly requested file (CLI or env) that is missing is a warning,
/// not an error; a file that exists but does not parse is an error.
pub fn load_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    match path {
        Some(path) if path.exists() => {
            debug!(path = %path.display(), "Loading configuration file");
            load_toml_file(path)
        }
        Some(path) => {
            warn!(path = %path.display(), "Config file not found, using defaults");
            Ok(T::default())
        }
        None => {
            debug!("No config file found, using compiled defaults");
            Ok(T::default())
        }
    }
}

/// Read an environment override, ignoring unset or empty variables
///
/// A value that does not parse is a configuration error naming the variable.
pub fn env_override<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("Invalid value for {}: {:?}", name, value))),
        _ => Ok(None),
    }
}

/// Parse a boolean switch the way operators write them in env files
pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read a boolean environment override (`1/0`, `true/false`, `yes/no`, `on/off`)
pub fn env_flag(name: &str) -> Result<Option<bool>> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool_flag(&value)
            .map(Some)
            .ok_or_else(|| Error::Config(format!("Invalid boolean for {}: {:?}", name, value))),
        _ => Ok(None),
    }
}

/// OS-dependent default data folder (database, liveness marker)
pub fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join(CONFIG_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("/var/lib/hepm"))
    } else {
        dirs::data_dir()
            .map(|d| d.join(CONFIG_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("./hepm_data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_flag_variants() {
        assert_eq!(parse_bool_flag("1"), Some(true));
        assert_eq!(parse_bool_flag("TRUE"), Some(true));
        assert_eq!(parse_bool_flag(" on "), Some(true));
        assert_eq!(parse_bool_flag("no"), Some(false));
        assert_eq!(parse_bool_flag("0"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }

    #[test]
    fn test_logging_config_default_level() {
        assert_eq!(LoggingConfig::default().level, "info");
    }

    #[test]
    fn test_default_data_dir_ends_with_hepm() {
        let dir = default_data_dir();
        assert!(dir.ends_with("hepm") || dir.ends_with("hepm_data"));
    }
}
