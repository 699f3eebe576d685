//! Configuration system for the hub client
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (HUB_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};

/// Environment variable the host sets when the client runs behind ingress
pub const SUPERVISOR_TOKEN_ENV: &str = "SUPERVISOR_TOKEN";

/// Hub endpoint reachable from inside the ingress environment
pub const SUPERVISOR_URL: &str = "ws://supervisor/core/websocket";

/// Main client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Hub endpoint and credential
    pub hub: HubSettings,

    /// Timeouts, reconnection and heartbeat policy
    pub connection: ConnectionSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Hub endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// WebSocket URL (ws/wss), or the hub's web URL (http/https)
    pub url: String,

    /// Long-lived access token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// What to do when the hub rejects the token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthFailurePolicy {
    /// Stop reconnecting; the token will keep failing
    Terminal,
    /// Treat like any other disconnect and go through backoff
    Retry,
}

impl Default for AuthFailurePolicy {
    fn default() -> Self {
        AuthFailurePolicy::Terminal
    }
}

/// Connection policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Socket open timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Time allowed for the login sequence in milliseconds
    pub auth_timeout_ms: u64,

    /// Per-request deadline in milliseconds
    pub request_timeout_ms: u64,

    /// First reconnect delay in milliseconds; doubles per attempt
    pub reconnect_base_delay_ms: u64,

    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,

    /// Ping interval in milliseconds (0 = disabled)
    pub heartbeat_interval_ms: u64,

    /// Behavior on `auth_invalid`
    pub auth_failure: AuthFailurePolicy,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            url: "ws://homeassistant.local:8123/api/websocket".to_string(),
            token: None,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            auth_timeout_ms: 10_000,
            request_timeout_ms: 10_000,
            reconnect_base_delay_ms: 1_000,
            max_reconnect_attempts: 10,
            heartbeat_interval_ms: 30_000,
            auth_failure: AuthFailurePolicy::Terminal,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl ConnectionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// `None` when heartbeats are disabled
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }
}

impl ClientConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        let config_file = Self::find_config_file(config_path)?;
        if let Some(path) = config_file {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
            config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
                message: e.to_string(),
                source: Some(e),
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        // Search in standard locations
        let search_paths = [
            // Current directory
            PathBuf::from("hub-client.toml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("hub-client").join("config.toml"))
                .unwrap_or_default(),
            // Home directory
            dirs::home_dir()
                .map(|p| p.join(".hub-client").join("config.toml"))
                .unwrap_or_default(),
            // System config (Linux)
            PathBuf::from("/etc/hub-client/config.toml"),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Hub settings
        if let Ok(val) = std::env::var("HUB_URL") {
            self.hub.url = val;
        }
        if let Ok(val) = std::env::var("HUB_TOKEN") {
            self.hub.token = Some(val);
        }

        // Connection settings
        if let Ok(val) = std::env::var("HUB_CONNECT_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.connection.connect_timeout_ms = n;
            }
        }
        if let Ok(val) = std::env::var("HUB_AUTH_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.connection.auth_timeout_ms = n;
            }
        }
        if let Ok(val) = std::env::var("HUB_REQUEST_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.connection.request_timeout_ms = n;
            }
        }
        if let Ok(val) = std::env::var("HUB_RECONNECT_BASE_DELAY_MS") {
            if let Ok(n) = val.parse() {
                self.connection.reconnect_base_delay_ms = n;
            }
        }
        if let Ok(val) = std::env::var("HUB_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                self.connection.max_reconnect_attempts = n;
            }
        }
        if let Ok(val) = std::env::var("HUB_HEARTBEAT_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.connection.heartbeat_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("HUB_AUTH_FAILURE") {
            match val.to_lowercase().as_str() {
                "retry" => self.connection.auth_failure = AuthFailurePolicy::Retry,
                "terminal" => self.connection.auth_failure = AuthFailurePolicy::Terminal,
                _ => {}
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("HUB_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("HUB_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("HUB_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Validate hub URL
        if self.hub.url.is_empty() {
            return Err(Error::config_field_invalid("hub.url", "Hub URL cannot be empty"));
        }
        websocket_url(&self.hub.url)?;

        if self.connection.connect_timeout_ms == 0 {
            return Err(Error::config_field_invalid(
                "connection.connect_timeout_ms",
                "connect_timeout_ms must be greater than 0",
            ));
        }
        if self.connection.auth_timeout_ms == 0 {
            return Err(Error::config_field_invalid(
                "connection.auth_timeout_ms",
                "auth_timeout_ms must be greater than 0",
            ));
        }
        if self.connection.request_timeout_ms == 0 {
            return Err(Error::config_field_invalid(
                "connection.request_timeout_ms",
                "request_timeout_ms must be greater than 0",
            ));
        }
        if self.connection.reconnect_base_delay_ms == 0 {
            return Err(Error::config_field_invalid(
                "connection.reconnect_base_delay_ms",
                "reconnect_base_delay_ms must be greater than 0",
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Endpoint Resolution
// ─────────────────────────────────────────────────────────────────

/// Where to connect and with which credential
#[derive(Clone)]
pub struct Endpoint {
    pub url: Url,
    pub token: Option<String>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Endpoint {
    /// Resolve the endpoint from settings and the host environment
    pub fn resolve(hub: &HubSettings) -> Result<Self> {
        Self::resolve_with(hub, std::env::var(SUPERVISOR_TOKEN_ENV).ok())
    }

    /// Resolve with an explicit ingress token (None = not behind ingress)
    pub fn resolve_with(hub: &HubSettings, supervisor_token: Option<String>) -> Result<Self> {
        if let Some(token) = supervisor_token.filter(|t| !t.is_empty()) {
            debug!("Supervisor token present, using ingress endpoint");
            let url = Url::parse(SUPERVISOR_URL)
                .map_err(|e| Error::Internal(format!("Invalid supervisor URL: {}", e)))?;
            return Ok(Self { url, token: Some(token) });
        }

        Ok(Self {
            url: websocket_url(&hub.url)?,
            token: hub.token.clone().filter(|t| !t.is_empty()),
        })
    }
}

/// Normalize a configured URL into the WebSocket API URL
///
/// `http(s)://host` becomes `ws(s)://host/api/websocket`; ws/wss URLs are
/// taken as-is.
pub fn websocket_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| Error::config_field_invalid("hub.url", format!("Invalid hub URL '{}': {}", raw, e)))?;

    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(Error::config_field_invalid(
                "hub.url",
                format!("Unsupported URL scheme '{}'; use ws://, wss://, http:// or https://", other),
            ))
        }
    };

    url.set_scheme(scheme)
        .map_err(|_| Error::config_field_invalid("hub.url", "Cannot convert URL to WebSocket scheme"))?;
    if url.path() == "/" || url.path().is_empty() {
        url.set_path("/api/websocket");
    }
    Ok(url)
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or(std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".hub-client")
                .join("config.toml")
        });

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# Hub Client Configuration

[hub]
# WebSocket API URL (http:// and https:// hub URLs are converted automatically)
url = "ws://homeassistant.local:8123/api/websocket"

# Long-lived access token (or export HUB_TOKEN)
# token = "..."

[connection]
# Socket open timeout in milliseconds
connect_timeout_ms = 10000

# Time allowed for the login sequence in milliseconds
auth_timeout_ms = 10000

# Per-request deadline in milliseconds
request_timeout_ms = 10000

# First reconnect delay in milliseconds (doubles per attempt)
reconnect_base_delay_ms = 1000

# Reconnect attempts before giving up
max_reconnect_attempts = 10

# Ping interval in milliseconds (0 = disabled)
heartbeat_interval_ms = 30000

# On rejected token: "terminal" (stop) or "retry" (back off and retry)
auth_failure = "terminal"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.hub-client/logs/client.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.hub.url, "ws://homeassistant.local:8123/api/websocket");
        assert_eq!(config.connection.request_timeout_ms, 10_000);
        assert_eq!(config.connection.reconnect_base_delay_ms, 1_000);
        assert_eq!(config.connection.max_reconnect_attempts, 10);
        assert_eq!(config.connection.auth_failure, AuthFailurePolicy::Terminal);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_override() {
        env::set_var("HUB_URL", "wss://hub.example.com/api/websocket");
        env::set_var("HUB_REQUEST_TIMEOUT_MS", "2500");
        env::set_var("HUB_AUTH_FAILURE", "retry");

        let mut config = ClientConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.hub.url, "wss://hub.example.com/api/websocket");
        assert_eq!(config.connection.request_timeout_ms, 2500);
        assert_eq!(config.connection.auth_failure, AuthFailurePolicy::Retry);

        env::remove_var("HUB_URL");
        env::remove_var("HUB_REQUEST_TIMEOUT_MS");
        env::remove_var("HUB_AUTH_FAILURE");
    }

    #[test]
    fn test_validation_invalid_url() {
        let mut config = ClientConfig::default();
        config.hub.url = "ftp://invalid.com".to_string();
        assert!(config.validate().is_err());

        config.hub.url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_timeout() {
        let mut config = ClientConfig::default();
        config.connection.request_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_connect_and_auth_timeout() {
        let mut config = ClientConfig::default();
        config.connection.connect_timeout_ms = 0;
        match config.validate() {
            Err(Error::ConfigValidation { field, .. }) => {
                assert_eq!(field.as_deref(), Some("connection.connect_timeout_ms"))
            }
            other => panic!("Expected validation error, got {:?}", other),
        }

        let mut config = ClientConfig::default();
        config.connection.auth_timeout_ms = 0;
        match config.validate() {
            Err(Error::ConfigValidation { field, .. }) => {
                assert_eq!(field.as_deref(), Some("connection.auth_timeout_ms"))
            }
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = ClientConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_heartbeat_disabled() {
        let mut settings = ConnectionSettings::default();
        assert_eq!(settings.heartbeat_interval(), Some(Duration::from_secs(30)));
        settings.heartbeat_interval_ms = 0;
        assert!(settings.heartbeat_interval().is_none());
    }

    #[test]
    fn test_websocket_url_normalization() {
        assert_eq!(
            websocket_url("http://homeassistant.local:8123").unwrap().as_str(),
            "ws://homeassistant.local:8123/api/websocket"
        );
        assert_eq!(
            websocket_url("https://hub.example.com/").unwrap().as_str(),
            "wss://hub.example.com/api/websocket"
        );
        assert_eq!(
            websocket_url("ws://10.0.0.2:8123/api/websocket").unwrap().as_str(),
            "ws://10.0.0.2:8123/api/websocket"
        );
        assert!(websocket_url("not a url").is_err());
    }

    #[test]
    fn test_endpoint_from_settings() {
        let hub = HubSettings {
            url: "http://hub.local:8123".to_string(),
            token: Some("abc".to_string()),
        };
        let endpoint = Endpoint::resolve_with(&hub, None).unwrap();
        assert_eq!(endpoint.url.as_str(), "ws://hub.local:8123/api/websocket");
        assert_eq!(endpoint.token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_endpoint_behind_ingress() {
        let hub = HubSettings {
            url: "http://hub.local:8123".to_string(),
            token: Some("ignored".to_string()),
        };
        let endpoint = Endpoint::resolve_with(&hub, Some("injected".to_string())).unwrap();
        assert_eq!(endpoint.url.as_str(), SUPERVISOR_URL);
        assert_eq!(endpoint.token.as_deref(), Some("injected"));
    }

    #[test]
    fn test_empty_token_is_missing() {
        let hub = HubSettings {
            url: "ws://hub.local/api/websocket".to_string(),
            token: Some(String::new()),
        };
        assert!(Endpoint::resolve_with(&hub, None).unwrap().token.is_none());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = ClientConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ClientConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.hub.url, parsed.hub.url);
        assert_eq!(config.connection.max_reconnect_attempts, parsed.connection.max_reconnect_attempts);
    }

    #[test]
    fn test_generated_config_parses() {
        let parsed: ClientConfig = toml::from_str(&generate_default_config()).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.connection.heartbeat_interval_ms, 30_000);
    }

    #[test]
    fn test_parse_config_file() {
        let config_str = r#"
[hub]
url = "wss://hub.example.com/api/websocket"
token = "T"

[connection]
request_timeout_ms = 5000
max_reconnect_attempts = 3
auth_failure = "retry"

[logging]
level = "debug"
"#;

        let config: ClientConfig = toml::from_str(config_str).unwrap();

        assert_eq!(config.hub.token.as_deref(), Some("T"));
        assert_eq!(config.connection.request_timeout_ms, 5000);
        assert_eq!(config.connection.max_reconnect_attempts, 3);
        assert_eq!(config.connection.reconnect_base_delay_ms, 1000);
        assert_eq!(config.connection.auth_failure, AuthFailurePolicy::Retry);
        assert_eq!(config.logging.level, "debug");
    }
}
