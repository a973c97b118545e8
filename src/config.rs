//! Configuration loading.
//!
//! Reads `config.json` and applies environment overrides. Lookup order:
//!
//! 1. `--config <path>` (must exist)
//! 2. `<platform config dir>/trigger-hub/config.json`
//! 3. `./config.json`
//! 4. Built-in defaults
//!
//! Environment variables win over the file: `TRIGGER_HUB_IP`,
//! `TRIGGER_HUB_PORT`, `TRIGGER_HUB_FORCE_VERIFY`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::client_types::ClientTypes;
use crate::constants::{DEFAULT_IP, DEFAULT_PORT};
use crate::logging::Logger;
use crate::server::ServerOptions;

const CONFIG_FILE: &str = "config.json";
const CONFIG_DIR: &str = "trigger-hub";

/// Hub configuration as stored on disk.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Listen address.
    pub ip: String,
    /// Listen port.
    pub port: u16,
    /// Declarable client types.
    pub client_types: ClientTypes,
    /// Verification override; derived from `client_types` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_verify: Option<bool>,
    /// Tokens offered for manual broadcasting.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub debug_commands: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip: DEFAULT_IP.to_string(),
            port: DEFAULT_PORT,
            client_types: ClientTypes::lab_defaults(),
            force_verify: None,
            debug_commands: Vec::new(),
        }
    }
}

impl Config {
    /// Resolve, read and override the configuration.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file falls back to built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_path(explicit)? {
            Some(path) => {
                log::info!("Loading config from {}", path.display());
                Self::load_from_file(&path)?
            }
            None => {
                log::info!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Path of the file [`load`](Self::load) would read.
    pub fn resolve_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            anyhow::ensure!(
                path.exists(),
                "Config file {} does not exist.",
                path.display()
            );
            return Ok(Some(path.to_path_buf()));
        }

        let found = Self::default_dir()
            .map(|dir| dir.join(CONFIG_FILE))
            .into_iter()
            .chain(std::iter::once(PathBuf::from(CONFIG_FILE)))
            .find(|p| p.exists());

        Ok(found)
    }

    /// Platform config directory for the hub.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR))
    }

    /// Parse one config file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(ip) = std::env::var("TRIGGER_HUB_IP") {
            self.ip = ip;
        }
        if let Ok(port) = std::env::var("TRIGGER_HUB_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(e) => log::warn!("Ignoring TRIGGER_HUB_PORT={port}: {e}"),
            }
        }
        if let Ok(flag) = std::env::var("TRIGGER_HUB_FORCE_VERIFY") {
            match parse_flag(&flag) {
                Some(flag) => self.force_verify = Some(flag),
                None => log::warn!("Ignoring TRIGGER_HUB_FORCE_VERIFY={flag}"),
            }
        }
    }

    /// Server options for this configuration.
    pub fn server_options(&self, logger: Logger) -> ServerOptions {
        let mut options = ServerOptions::default()
            .with_endpoint(self.ip.clone(), self.port)
            .with_client_types(self.client_types.clone())
            .with_logger(logger);
        if let Some(force_verify) = self.force_verify {
            options = options.with_force_verify(force_verify);
        }
        options
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_use_lab_types() {
        let config = Config::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.client_types.contains("TRG"));
        assert!(!config.client_types.accepts_any());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 4000, "client_types": {{"__ANY__": "*"}}}}"#).unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.ip, DEFAULT_IP);
        assert!(config.client_types.accepts_any());
        assert!(config.debug_commands.is_empty());
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let err = Config::resolve_path(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_malformed_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = Config::load_from_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse"));
    }

    #[test]
    fn test_server_options_carry_override() {
        let config = Config {
            force_verify: Some(false),
            ..Config::default()
        };
        let options = config.server_options(Logger::default());
        assert_eq!(options.force_verify, Some(false));
        assert_eq!(options.port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
