//! Configuration resolution for ocfbot.
//!
//! Implements layered config resolution:
//! 1. Built-in defaults
//! 2. Config file (~/.config/ocfbot/config.toml, or an explicit path)
//! 3. Environment variables
//!
//! CLI arguments are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::{Error, Result};
use crate::format::{ANNOUNCE_CHANNEL, Destinations, OPERATOR_CHANNEL};

/// System CA bundle used to validate the broker's certificate.
pub const DEFAULT_CA_CERTS: &str = "/etc/ssl/certs/ca-certificates.crt";

/// Complete ocfbot configuration.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub celery: CeleryConfig,
    #[serde(default)]
    pub channels: ChannelConfig,
    #[serde(default)]
    pub commands: CommandConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Task-queue connection settings. Both addresses are secrets.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CeleryConfig {
    #[serde(deserialize_with = "secret")]
    pub broker: Option<SecretString>,
    #[serde(deserialize_with = "secret")]
    pub backend: Option<SecretString>,
    /// PEM bundle of CAs trusted for the broker connection.
    pub ca_certs: PathBuf,
    pub connect_timeout_secs: u64,
    /// Upper bound on a single blocking receive before the link is re-checked.
    pub poll_secs: u64,
}

impl Default for CeleryConfig {
    fn default() -> Self {
        Self {
            broker: None,
            backend: None,
            ca_certs: PathBuf::from(DEFAULT_CA_CERTS),
            connect_timeout_secs: 10,
            poll_secs: 5,
        }
    }
}

impl CeleryConfig {
    pub fn broker(&self) -> Result<&SecretString> {
        self.broker
            .as_ref()
            .ok_or_else(|| Error::Config("celery.broker is required".into()))
    }

    pub fn backend(&self) -> Result<&SecretString> {
        self.backend
            .as_ref()
            .ok_or_else(|| Error::Config("celery.backend is required".into()))
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }
}

/// Channel names the bot announces to.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub announce: String,
    pub operator: String,
    /// Where task failures are reported.
    pub diagnostics: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            announce: ANNOUNCE_CHANNEL.to_string(),
            operator: OPERATOR_CHANNEL.to_string(),
            diagnostics: "#rebuild".to_string(),
        }
    }
}

impl ChannelConfig {
    pub fn destinations(&self) -> Destinations {
        Destinations {
            announce: self.announce.clone(),
            operator: self.operator.clone(),
        }
    }
}

/// Chat command settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub prefix: String,
    /// Nicks allowed to run admin-only commands.
    pub admins: Vec<String>,
    pub list_timeout_secs: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            prefix: ".".to_string(),
            admins: Vec::new(),
            list_timeout_secs: 5,
        }
    }
}

impl CommandConfig {
    pub const fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }

    pub fn is_admin(&self, nick: &str) -> bool {
        self.admins.iter().any(|admin| admin.eq_ignore_ascii_case(nick))
    }
}

/// Reconnect backoff for the event relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Give up after this many consecutive failures (unset = never).
    pub max_attempts: Option<u32>,
    /// Restart the relay after it fails instead of exiting the process.
    pub restart_on_failure: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            max_attempts: None,
            restart_on_failure: true,
        }
    }
}

/// Load configuration: defaults, then the config file (if present), then
/// environment overrides.
///
/// An explicit `path` must exist; the default location is optional.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading config file");
            load_config_file(path)?
        }
        None => match default_config_path() {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading default config file");
                load_config_file(&path)?
            }
            _ => {
                debug!("No config file, using defaults");
                Config::default()
            }
        },
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Default config file location: `$XDG_CONFIG_HOME/ocfbot/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ocfbot").join("config.toml"))
}

pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    toml::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("OCFBOT_CELERY_BROKER") {
        config.celery.broker = Some(SecretString::from(val));
    }
    if let Ok(val) = std::env::var("OCFBOT_CELERY_BACKEND") {
        config.celery.backend = Some(SecretString::from(val));
    }
    if let Ok(val) = std::env::var("OCFBOT_CA_CERTS") {
        config.celery.ca_certs = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("OCFBOT_ADMINS") {
        config.commands.admins = val
            .split(',')
            .map(str::trim)
            .filter(|nick| !nick.is_empty())
            .map(String::from)
            .collect();
    }
}

fn secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.channels.announce, "#administrivia");
        assert_eq!(config.channels.operator, "#root");
        assert_eq!(config.channels.diagnostics, "#rebuild");
        assert_eq!(config.commands.list_timeout(), Duration::from_secs(5));
        assert_eq!(config.celery.ca_certs, PathBuf::from(DEFAULT_CA_CERTS));
        assert!(config.relay.restart_on_failure);
    }

    #[test]
    fn broker_and_backend_are_required() {
        let config = Config::default();
        assert!(matches!(config.celery.broker(), Err(Error::Config(_))));
        assert!(matches!(config.celery.backend(), Err(Error::Config(_))));
    }

    #[test]
    fn parses_partial_file() {
        let config = parse_config(
            r##"
            [celery]
            broker = "rediss://:hunter2@broker.example:6378/0"
            backend = "rediss://:hunter2@broker.example:6378/1"

            [commands]
            admins = ["jvperrin", "ckuehl"]
            "##,
        )
        .unwrap();

        assert_eq!(
            config.celery.broker().unwrap().expose_secret(),
            "rediss://:hunter2@broker.example:6378/0"
        );
        assert_eq!(config.celery.poll_secs, 5);
        assert!(config.commands.is_admin("CKUEHL"));
        assert!(!config.commands.is_admin("mallory"));
        assert_eq!(config.commands.prefix, ".");
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let config = parse_config("[celery]\nbroker = \"rediss://:hunter2@b\"\n").unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn explicit_path_must_exist() {
        let err = load_config(Some(Path::new("/nonexistent/ocfbot.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[channels]\nannounce = \"#test\"\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.channels.announce, "#test");
        assert_eq!(config.channels.destinations().operator, "#root");
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[celery\nbroker = ").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(Error::Config(_))));
    }
}
