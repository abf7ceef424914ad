// Configuration utilities for songfetch
//
// Credentials for the catalog API are two opaque secrets. They can come from
// a JSON configuration file (a "spotify" section, either under a "services"
// subtree or at the top level) or from the environment.

use log::debug;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const CLIENT_ID_ENV: &str = "SPOTIFY_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "SPOTIFY_CLIENT_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Missing credentials: set client_id/client_secret in the config file or SPOTIFY_CLIENT_ID/SPOTIFY_CLIENT_SECRET in the environment")]
    MissingCredentials,
}

/// Client-credentials pair for the catalog API.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Credentials {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Read credentials from a service configuration section.
    pub fn from_config(config: &serde_json::Value) -> Option<Self> {
        let section = get_service_config(config, "spotify")?;
        let client_id = section.get("client_id").and_then(|v| v.as_str())?;
        let client_secret = section.get("client_secret").and_then(|v| v.as_str())?;
        if client_id.trim().is_empty() || client_secret.trim().is_empty() {
            return None;
        }
        Some(Credentials::new(client_id, client_secret))
    }

    /// Read credentials from the environment.
    pub fn from_env() -> Option<Self> {
        let client_id = std::env::var(CLIENT_ID_ENV).ok()?;
        let client_secret = std::env::var(CLIENT_SECRET_ENV).ok()?;
        if client_id.trim().is_empty() || client_secret.trim().is_empty() {
            return None;
        }
        Some(Credentials::new(client_id, client_secret))
    }

    /// Resolve credentials from a loaded config file, falling back to the
    /// environment. Missing credentials are an error before any network
    /// traffic happens.
    pub fn resolve(config: Option<&serde_json::Value>) -> Result<Self, ConfigError> {
        if let Some(config) = config {
            if let Some(creds) = Credentials::from_config(config) {
                debug!("Using catalog credentials from config file");
                return Ok(creds);
            }
        }
        if let Some(creds) = Credentials::from_env() {
            debug!("Using catalog credentials from environment");
            return Ok(creds);
        }
        Err(ConfigError::MissingCredentials)
    }
}

/// Helper function to get service configuration
///
/// First tries to find the service in a "services" subtree, then falls back
/// to the top level of the config object.
pub fn get_service_config<'a>(
    config: &'a serde_json::Value,
    service_name: &str,
) -> Option<&'a serde_json::Value> {
    if let Some(services) = config.get("services") {
        if let Some(service_config) = services.get(service_name) {
            debug!("Found {} configuration in services section", service_name);
            return Some(service_config);
        }
    }

    if let Some(service_config) = config.get(service_name) {
        debug!("Found {} configuration at top level", service_name);
        return Some(service_config);
    }

    debug!("No {} configuration found", service_name);
    None
}

/// Load and parse a JSON configuration file.
pub fn load_config_file(path: &Path) -> Result<serde_json::Value, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
