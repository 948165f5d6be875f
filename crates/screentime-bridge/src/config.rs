//! # Bridge Configuration
//!
//! Configuration management for the bridge.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SCREENTIME_SUBJECT_NAME=alice                                      │
//! │     SCREENTIME_MQTT_HOST=192.168.1.10                                  │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/screentime-bridge/bridge.toml (Linux)                    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [subject]
//! name = "alice"
//!
//! [upstream]
//! base_url = "https://parents.amazon.co.uk"
//! request_timeout_secs = 30
//! time_zone = "Europe/London"
//!
//! [session]
//! persist_interval_secs = 300
//! expiry_horizon_hours = 4
//!
//! [sync]
//! interval_secs = 300
//! failure_threshold = 3
//!
//! [mqtt]
//! host = "localhost"
//! port = 1883
//! discovery_prefix = "homeassistant"
//!
//! [status_server]
//! enabled = true
//! port = 8099
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use screentime_core::credential::{
    DEFAULT_CRITICAL_COOKIES, DEFAULT_CSRF_COOKIE, DEFAULT_EXPIRY_HORIZON_HOURS,
};
use screentime_core::{DEFAULT_BLOCK_MINUTES, DEFAULT_DISCOVERY_PREFIX};

use crate::error::{BridgeError, BridgeResult};

const ENV_PREFIX: &str = "SCREENTIME_";

// =============================================================================
// Subject
// =============================================================================

/// The managed child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectSettings {
    /// Name used in entity ids and topics (`{name}_limit_monday`).
    #[serde(default = "default_subject_name")]
    pub name: String,

    /// Upstream `childDirectedId`. Discovered after login when unset.
    #[serde(default)]
    pub id: Option<String>,
}

fn default_subject_name() -> String {
    "daughter".to_string()
}

impl Default for SubjectSettings {
    fn default() -> Self {
        SubjectSettings {
            name: default_subject_name(),
            id: None,
        }
    }
}

// =============================================================================
// Upstream
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bound on every request and navigation (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Time zone sent with activity queries.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Cookie whose value is sent as the CSRF header.
    #[serde(default = "default_csrf_cookie")]
    pub csrf_cookie: String,

    /// Landing page used to verify and refresh the session.
    #[serde(default = "default_landing_path")]
    pub landing_path: String,
}

fn default_base_url() -> String {
    "https://parents.amazon.co.uk".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_time_zone() -> String {
    "Europe/London".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36"
        .to_string()
}

fn default_csrf_cookie() -> String {
    DEFAULT_CSRF_COOKIE.to_string()
}

fn default_landing_path() -> String {
    "/intro".to_string()
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        UpstreamSettings {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            time_zone: default_time_zone(),
            user_agent: default_user_agent(),
            csrf_cookie: default_csrf_cookie(),
            landing_path: default_landing_path(),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Credential blob location. Defaults to the platform data directory.
    #[serde(default)]
    pub credential_path: Option<PathBuf>,

    /// Minimum gap between cadence persists (seconds).
    #[serde(default = "default_persist_interval")]
    pub persist_interval_secs: u64,

    #[serde(default = "default_expiry_horizon")]
    pub expiry_horizon_hours: i64,

    #[serde(default = "default_critical_cookies")]
    pub critical_cookies: Vec<String>,

    /// How long login waits for a fresh credential upload (seconds).
    #[serde(default = "default_login_wait")]
    pub login_wait_secs: u64,

    #[serde(default = "default_login_poll")]
    pub login_poll_secs: u64,
}

fn default_persist_interval() -> u64 {
    300
}

fn default_expiry_horizon() -> i64 {
    DEFAULT_EXPIRY_HORIZON_HOURS
}

fn default_critical_cookies() -> Vec<String> {
    DEFAULT_CRITICAL_COOKIES.iter().map(|s| s.to_string()).collect()
}

fn default_login_wait() -> u64 {
    600
}

fn default_login_poll() -> u64 {
    5
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            credential_path: None,
            persist_interval_secs: default_persist_interval(),
            expiry_horizon_hours: default_expiry_horizon(),
            critical_cookies: default_critical_cookies(),
            login_wait_secs: default_login_wait(),
            login_poll_secs: default_login_poll(),
        }
    }
}

// =============================================================================
// Sync Loop
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Period between state refreshes (seconds).
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    /// Period between command queue checks (milliseconds).
    #[serde(default = "default_command_poll")]
    pub command_poll_ms: u64,

    /// Consecutive failed cycles before the transport is recreated.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Block duration used until one is set over MQTT (minutes).
    #[serde(default = "default_block_minutes")]
    pub default_block_minutes: u32,
}

fn default_sync_interval() -> u64 {
    300
}

fn default_command_poll() -> u64 {
    1000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_block_minutes() -> u32 {
    DEFAULT_BLOCK_MINUTES
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            interval_secs: default_sync_interval(),
            command_poll_ms: default_command_poll(),
            failure_threshold: default_failure_threshold(),
            default_block_minutes: default_block_minutes(),
        }
    }
}

// =============================================================================
// MQTT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "screentime-bridge".to_string()
}

fn default_discovery_prefix() -> String {
    DEFAULT_DISCOVERY_PREFIX.to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    60
}

impl Default for MqttSettings {
    fn default() -> Self {
        MqttSettings {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            client_id: default_client_id(),
            discovery_prefix: default_discovery_prefix(),
            keep_alive_secs: default_keep_alive(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

// =============================================================================
// Status Server
// =============================================================================

/// Local HTTP endpoint for credential status and upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_status_port")]
    pub port: u16,
}

fn default_true() -> bool {
    true
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_status_port() -> u16 {
    8099
}

impl Default for StatusServerSettings {
    fn default() -> Self {
        StatusServerSettings {
            enabled: true,
            bind_addr: default_bind_addr(),
            port: default_status_port(),
        }
    }
}

impl StatusServerSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Main Bridge Configuration
// =============================================================================

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub subject: SubjectSettings,

    #[serde(default)]
    pub upstream: UpstreamSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub mqtt: MqttSettings,

    #[serde(default)]
    pub status_server: StatusServerSettings,
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (bridge.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> BridgeResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading bridge config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| BridgeError::ConfigLoadFailed(e.to_string()))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> BridgeResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| BridgeError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BridgeError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| BridgeError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Bridge config saved");
        Ok(())
    }

    pub fn validate(&self) -> BridgeResult<()> {
        let name = &self.subject.name;
        if name.is_empty() || name.contains(['/', '+', '#', ' ']) {
            return Err(BridgeError::InvalidConfig(format!(
                "subject.name must be a non-empty topic-safe word, got: '{}'",
                name
            )));
        }

        let base = url::Url::parse(&self.upstream.base_url)?;
        if base.scheme() != "https" && base.scheme() != "http" {
            return Err(BridgeError::InvalidUrl(format!(
                "Upstream URL must be http(s), got: {}",
                self.upstream.base_url
            )));
        }

        self.time_zone()?;

        if self.upstream.request_timeout_secs == 0 {
            return Err(BridgeError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.sync.interval_secs == 0 || self.sync.command_poll_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "sync intervals must be greater than 0".into(),
            ));
        }

        if self.sync.failure_threshold == 0 {
            return Err(BridgeError::InvalidConfig(
                "failure_threshold must be greater than 0".into(),
            ));
        }

        if self.mqtt.discovery_prefix.is_empty() || self.mqtt.discovery_prefix.contains('/') {
            return Err(BridgeError::InvalidConfig(
                "discovery_prefix must be a single topic level".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(name) = env("SUBJECT_NAME") {
            debug!(subject = %name, "Overriding subject name from environment");
            self.subject.name = name;
        }

        if let Some(id) = env("SUBJECT_ID") {
            self.subject.id = Some(id);
        }

        if let Some(url) = env("BASE_URL") {
            debug!(url = %url, "Overriding upstream URL from environment");
            self.upstream.base_url = url;
        }

        if let Some(tz) = env("TIME_ZONE") {
            self.upstream.time_zone = tz;
        }

        if let Some(path) = env("CREDENTIAL_PATH") {
            self.session.credential_path = Some(PathBuf::from(path));
        }

        if let Some(secs) = env("SYNC_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.sync.interval_secs = secs;
        }

        if let Some(n) = env("FAILURE_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.sync.failure_threshold = n;
        }

        if let Some(host) = env("MQTT_HOST") {
            debug!(host = %host, "Overriding MQTT host from environment");
            self.mqtt.host = host;
        }

        if let Some(port) = env("MQTT_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.mqtt.port = p,
                Err(_) => warn!(port = %port, "Ignoring invalid MQTT port in environment"),
            }
        }

        if let Some(user) = env("MQTT_USERNAME") {
            self.mqtt.username = Some(user);
        }

        if let Some(password) = env("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }

        if let Some(port) = env("STATUS_PORT").and_then(|v| v.parse().ok()) {
            self.status_server.port = port;
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("bridge.toml"))
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "screentime", "screentime-bridge")
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Where the credential blob lives.
    pub fn credential_path(&self) -> PathBuf {
        self.session
            .credential_path
            .clone()
            .or_else(|| Self::project_dirs().map(|d| d.data_dir().join("session.json")))
            .unwrap_or_else(|| PathBuf::from("session.json"))
    }

    /// The dashboard's time zone; decides which day is "today".
    pub fn time_zone(&self) -> BridgeResult<chrono_tz::Tz> {
        self.upstream.time_zone.parse().map_err(|e| {
            BridgeError::InvalidConfig(format!(
                "time_zone '{}' is not an IANA zone: {}",
                self.upstream.time_zone, e
            ))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.request_timeout_secs)
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.session.persist_interval_secs)
    }

    pub fn expiry_horizon(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session.expiry_horizon_hours)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn command_poll(&self) -> Duration {
        Duration::from_millis(self.sync.command_poll_ms)
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, key))
        .ok()
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.subject.name, "daughter");
        assert_eq!(config.sync.interval_secs, 300);
        assert_eq!(config.sync.failure_threshold, 3);
        assert_eq!(config.session.persist_interval_secs, 300);
        assert_eq!(config.session.expiry_horizon_hours, 4);
        assert_eq!(config.upstream.time_zone, "Europe/London");
        assert_eq!(config.mqtt.discovery_prefix, "homeassistant");
        assert_eq!(config.session.critical_cookies.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BridgeConfig::default();

        config.subject.name = "a/b".into();
        assert!(config.validate().is_err());

        config.subject.name = "alice".into();
        config.upstream.base_url = "not a url".into();
        assert!(config.validate().unwrap_err().is_config_error());

        config.upstream.base_url = "ftp://example.com".into();
        assert!(config.validate().is_err());

        config.upstream.base_url = "https://example.com".into();
        config.sync.failure_threshold = 0;
        assert!(config.validate().is_err());

        config.sync.failure_threshold = 3;
        config.upstream.time_zone = "Mars/Olympus".into();
        assert!(config.validate().unwrap_err().is_config_error());

        config.upstream.time_zone = "Pacific/Auckland".into();
        assert_eq!(config.time_zone().unwrap(), chrono_tz::Pacific::Auckland);
    }

    #[test]
    fn test_partial_toml() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [subject]
            name = "alice"

            [mqtt]
            port = 1884
            "#,
        )
        .unwrap();
        assert_eq!(config.subject.name, "alice");
        assert_eq!(config.mqtt.port, 1884);
        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.sync.default_block_minutes, 60);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");

        let mut config = BridgeConfig::default();
        config.subject.name = "alice".into();
        config.save(Some(path.clone())).unwrap();

        let toml_str = std::fs::read_to_string(&path).unwrap();
        assert!(toml_str.contains("[subject]"));
        assert!(toml_str.contains("[mqtt]"));

        let loaded: BridgeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(loaded.subject.name, "alice");
    }
}
