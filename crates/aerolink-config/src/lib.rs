//! Host-facing configuration for the aerolink bridge.
//!
//! TOML file + environment loading, credential resolution
//! (env + keyring + plaintext), and translation to
//! `aerolink_core::BridgeConfig`. Credentials are mandatory: a config
//! without a resolvable username/password pair is a permanent startup
//! failure, not something to retry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use aerolink_core::{BridgeConfig, DEFAULT_API_URL, ProbeRooms};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no cloud credentials configured")]
    NoCredentials,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config struct ──────────────────────────────────────────────

/// Top-level TOML configuration for one cloud account.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Cloud account username (an email address).
    pub username: Option<String>,

    /// Plaintext password -- prefer the env var or keyring.
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Vendor cloud origin override.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Device state poll interval, seconds.
    #[serde(default = "default_poll_secs")]
    pub device_poll_secs: u64,

    /// Sensor poll interval, seconds.
    #[serde(default = "default_poll_secs")]
    pub sensor_poll_secs: u64,

    /// Expose the air-quality/CO2/climate sensors.
    #[serde(default = "default_true")]
    pub sensors_enabled: bool,

    /// Which optional room probes are fitted.
    #[serde(default)]
    pub rooms: Rooms,

    /// Writable directory for the persisted session. Defaults to the
    /// platform data directory.
    pub storage_dir: Option<PathBuf>,

    /// HTTP timeout, seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            password_env: None,
            api_url: default_api_url(),
            device_poll_secs: default_poll_secs(),
            sensor_poll_secs: default_poll_secs(),
            sensors_enabled: true,
            rooms: Rooms::default(),
            storage_dir: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Rooms {
    #[serde(default)]
    pub room1: bool,
    #[serde(default)]
    pub room2: bool,
    #[serde(default)]
    pub room3: bool,
    #[serde(default)]
    pub room4: bool,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.into()
}
fn default_poll_secs() -> u64 {
    60
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "aerolink", "aerolink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default writable directory for the persisted session.
pub fn data_dir() -> PathBuf {
    ProjectDirs::from("io", "aerolink", "aerolink")
        .map_or_else(dirs_fallback, |dirs| dirs.data_dir().to_path_buf())
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("aerolink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file plus environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from an explicit file plus environment.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("AEROLINK_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Serialize config to TOML and write it to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the account password from the credential chain.
pub fn resolve_password(config: &Config, username: &str) -> Result<SecretString, ConfigError> {
    // 1. Named env var from the config, then the conventional one
    if let Some(ref env_name) = config.password_env {
        if let Ok(pw) = std::env::var(env_name) {
            return Ok(SecretString::from(pw));
        }
    }
    if let Ok(pw) = std::env::var("AEROLINK_PASSWORD") {
        return Ok(SecretString::from(pw));
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new("aerolink", username) {
        if let Ok(pw) = entry.get_password() {
            return Ok(SecretString::from(pw));
        }
    }

    // 3. Plaintext in config
    if let Some(ref pw) = config.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials)
}

// ── Translation to the core config ──────────────────────────────────

/// Build a `BridgeConfig` from a loaded `Config`.
///
/// Fails permanently when credentials are absent or the URL override
/// does not parse.
pub fn to_bridge_config(config: &Config) -> Result<BridgeConfig, ConfigError> {
    let username = config
        .username
        .clone()
        .ok_or(ConfigError::NoCredentials)?;
    let password = resolve_password(config, &username)?;

    let api_url: url::Url = config.api_url.parse().map_err(|_| ConfigError::Validation {
        field: "api_url".into(),
        reason: format!("invalid URL: {}", config.api_url),
    })?;

    let storage_dir = config.storage_dir.clone().unwrap_or_else(data_dir);

    let mut bridge = BridgeConfig::new(username, password, storage_dir);
    bridge.api_url = api_url;
    bridge.device_poll_interval = Duration::from_secs(config.device_poll_secs.max(1));
    bridge.sensor_poll_interval = Duration::from_secs(config.sensor_poll_secs.max(1));
    bridge.sensors_enabled = config.sensors_enabled;
    bridge.probe_rooms = ProbeRooms {
        room1: config.rooms.room1,
        room2: config.rooms.room2,
        room3: config.rooms.room3,
        room4: config.rooms.room4,
    };
    bridge.timeout = Duration::from_secs(config.timeout_secs.max(1));
    Ok(bridge)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn from_toml(toml: &str) -> Config {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml))
            .extract()
            .unwrap()
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = from_toml(
            r#"
            username = "user@example.com"
            password = "hunter2"
            "#,
        );

        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.device_poll_secs, 60);
        assert!(config.sensors_enabled);
        assert!(!config.rooms.room1);
    }

    #[test]
    fn full_config_round_trips_to_bridge_config() {
        let config = from_toml(
            r#"
            username = "user@example.com"
            password = "hunter2"
            api_url = "https://staging.example.net"
            device_poll_secs = 30
            sensors_enabled = false
            storage_dir = "/var/lib/aerolink"

            [rooms]
            room2 = true
            "#,
        );

        let bridge = to_bridge_config(&config).unwrap();

        assert_eq!(bridge.username, "user@example.com");
        assert_eq!(bridge.password.expose_secret(), "hunter2");
        assert_eq!(bridge.api_url.as_str(), "https://staging.example.net/");
        assert_eq!(bridge.device_poll_interval, Duration::from_secs(30));
        assert!(!bridge.sensors_enabled);
        assert!(bridge.probe_rooms.room2);
        assert!(!bridge.probe_rooms.room1);
        assert_eq!(bridge.storage_dir, PathBuf::from("/var/lib/aerolink"));
    }

    #[test]
    fn missing_username_is_a_permanent_failure() {
        let config = from_toml(r#"password = "hunter2""#);

        assert!(matches!(
            to_bridge_config(&config),
            Err(ConfigError::NoCredentials)
        ));
    }

    #[test]
    fn invalid_api_url_is_rejected() {
        let config = from_toml(
            r#"
            username = "user@example.com"
            password = "hunter2"
            api_url = "not a url"
            "#,
        );

        assert!(matches!(
            to_bridge_config(&config),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let config = from_toml(
            r#"
            username = "user@example.com"
            password = "hunter2"
            device_poll_secs = 0
            timeout_secs = 0
            "#,
        );

        let bridge = to_bridge_config(&config).unwrap();
        assert_eq!(bridge.device_poll_interval, Duration::from_secs(1));
        assert_eq!(bridge.timeout, Duration::from_secs(1));
    }
}
