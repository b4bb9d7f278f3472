// ABOUTME: Configuration loading from config.toml with environment variable overrides.
// ABOUTME: Covers session/transport selection, recovery timings, the HTTP server and the health log.

use crate::paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use wagate_transport::TransportKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Per-transport tables handed to the transport factories
    #[serde(default)]
    pub transport: HashMap<String, toml::Table>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Root for credentials, logs and the health log (default: XDG data dir)
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default = "default_primary")]
    pub primary: TransportKind,
    /// Secondary transport; defaults to the other kind
    #[serde(default)]
    pub fallback: Option<TransportKind>,
    /// Try the secondary transport when the primary fails to initialize
    #[serde(default = "default_true")]
    pub failover: bool,
    #[serde(default = "default_true")]
    pub watchdog: bool,
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            primary: default_primary(),
            fallback: None,
            failover: true,
            watchdog: true,
            watchdog_interval_secs: default_watchdog_interval_secs(),
        }
    }
}

impl SessionConfig {
    /// Secondary transport, if failover is enabled
    pub fn fallback_kind(&self) -> Option<TransportKind> {
        self.failover
            .then(|| self.fallback.unwrap_or_else(|| self.primary.other()))
    }

    /// Transports to try, in order
    pub fn transport_order(&self) -> Vec<TransportKind> {
        let mut order = vec![self.primary];
        order.extend(self.fallback_kind());
        order
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }
}

/// Timings that govern recovery; defaults are the production values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_reinit_cooldown_secs")]
    pub reinit_cooldown_secs: u64,
    /// Wait after closing a stale socket before opening a new one
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
    /// Delay before reinit after bad-session, restart-required and conflict closes
    #[serde(default = "default_close_delay_ms")]
    pub close_delay_ms: u64,
    #[serde(default = "default_logged_out_delay_ms")]
    pub logged_out_delay_ms: u64,
    #[serde(default = "default_pairing_timeout_delay_ms")]
    pub pairing_timeout_delay_ms: u64,
    /// Minimum spacing between operator-requested restarts
    #[serde(default = "default_restart_throttle_secs")]
    pub restart_throttle_secs: u64,
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,
    #[serde(default = "default_send_backoff_ms")]
    pub send_backoff_ms: u64,
    #[serde(default = "default_qr_throttle_ms")]
    pub qr_throttle_ms: u64,
    #[serde(default = "default_qr_size")]
    pub qr_size: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            reinit_cooldown_secs: default_reinit_cooldown_secs(),
            close_grace_ms: default_close_grace_ms(),
            close_delay_ms: default_close_delay_ms(),
            logged_out_delay_ms: default_logged_out_delay_ms(),
            pairing_timeout_delay_ms: default_pairing_timeout_delay_ms(),
            restart_throttle_secs: default_restart_throttle_secs(),
            send_attempts: default_send_attempts(),
            send_backoff_ms: default_send_backoff_ms(),
            qr_throttle_ms: default_qr_throttle_ms(),
            qr_size: default_qr_size(),
        }
    }
}

impl RecoveryConfig {
    pub fn reinit_cooldown(&self) -> Duration {
        Duration::from_secs(self.reinit_cooldown_secs)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn restart_throttle(&self) -> Duration {
        Duration::from_secs(self.restart_throttle_secs)
    }

    pub fn send_backoff(&self) -> Duration {
        Duration::from_millis(self.send_backoff_ms)
    }

    pub fn qr_throttle(&self) -> Duration {
        Duration::from_millis(self.qr_throttle_ms)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Required in the `x-api-key` header when set
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            api_key: None,
        }
    }
}

// Custom Debug impl to redact api_key
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// SQLite file for the health log (default: <data_dir>/health.db)
    #[serde(default)]
    pub database: Option<String>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database: None,
        }
    }
}

fn default_primary() -> TransportKind {
    TransportKind::MultiDevice
}

fn default_true() -> bool {
    true
}

fn default_watchdog_interval_secs() -> u64 {
    60
}

fn default_reinit_cooldown_secs() -> u64 {
    60
}

fn default_close_grace_ms() -> u64 {
    1000
}

fn default_close_delay_ms() -> u64 {
    500
}

fn default_logged_out_delay_ms() -> u64 {
    800
}

fn default_pairing_timeout_delay_ms() -> u64 {
    1000
}

fn default_restart_throttle_secs() -> u64 {
    15
}

fn default_send_attempts() -> u32 {
    2
}

fn default_send_backoff_ms() -> u64 {
    600
}

fn default_qr_throttle_ms() -> u64 {
    3000
}

fn default_qr_size() -> u32 {
    400
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8088
}

/// Expand tilde (~) to home directory in paths
/// Logs a warning if expansion fails and falls back to the original path
fn expand_tilde(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(base_dirs) = directories::BaseDirs::new() {
            return base_dirs.home_dir().join(stripped).to_string_lossy().to_string();
        }
        tracing::warn!(path = %path, "Failed to expand tilde in path: could not determine home directory");
    } else if path == "~" {
        if let Some(base_dirs) = directories::BaseDirs::new() {
            return base_dirs.home_dir().to_string_lossy().to_string();
        }
        tracing::warn!("Failed to expand tilde: could not determine home directory");
    }
    path.to_string()
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. WAGATE_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory - for development)
    /// 3. ~/.config/wagate/config.toml (XDG config dir)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("WAGATE_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!(path = %env_path, "WAGATE_CONFIG_PATH does not exist, ignoring");
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Parse configuration from a TOML string (no env overrides)
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config TOML")
    }

    /// Load configuration from config.toml with environment variable overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(config_path) => {
                tracing::info!(path = %config_path.display(), "Loading configuration from file");
                let content = std::fs::read_to_string(&config_path)
                    .with_context(|| format!("Failed to read {}", config_path.display()))?;
                Self::parse(&content).with_context(|| format!("Failed to parse {}", config_path.display()))?
            }
            None => {
                tracing::info!("No config file found, using environment variables and defaults");
                Config::default()
            }
        };

        config.apply_env_overrides()?;
        config.finalize()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        // Transport selector kept under its historical name
        if let Ok(val) = std::env::var("WHATSAPP_STACK") {
            let primary: TransportKind = val
                .parse()
                .map_err(|e: String| anyhow::anyhow!("WHATSAPP_STACK: {}", e))?;
            if self.session.fallback == Some(primary) {
                self.session.fallback = None;
            }
            self.session.primary = primary;
        }
        if let Ok(val) = std::env::var("WAGATE_DATA_DIR") {
            self.session.data_dir = Some(val);
        }
        if let Ok(val) = std::env::var("WAGATE_WATCHDOG") {
            self.session.watchdog = !matches!(val.trim().to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no");
        }
        if let Ok(val) = std::env::var("WAGATE_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("WAGATE_PORT") {
            self.server.port = val
                .parse()
                .with_context(|| format!("WAGATE_PORT must be a valid port number, got: {}", val))?;
        }
        if let Ok(val) = std::env::var("WAGATE_API_KEY") {
            self.server.api_key = Some(val).filter(|k| !k.is_empty());
        }
        Ok(())
    }

    /// Expand paths and validate; called by `load`
    pub fn finalize(&mut self) -> Result<()> {
        if let Some(dir) = self.session.data_dir.as_mut() {
            *dir = expand_tilde(dir);
        }
        if let Some(db) = self.health.database.as_mut() {
            *db = expand_tilde(db);
        }

        if self.session.fallback_kind() == Some(self.session.primary) {
            anyhow::bail!(
                "session.fallback must differ from session.primary (both are '{}')",
                self.session.primary
            );
        }
        if self.server.port == 0 {
            anyhow::bail!("server.port must be non-zero");
        }
        if self.recovery.send_attempts == 0 {
            anyhow::bail!("recovery.send_attempts must be at least 1");
        }
        if self.recovery.qr_size < 100 {
            anyhow::bail!("recovery.qr_size must be at least 100 pixels");
        }
        for name in self.transport.keys() {
            if name.parse::<TransportKind>().is_err() {
                anyhow::bail!("Unknown transport section [transport.{}]", name);
            }
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.session
            .data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(paths::data_dir)
    }

    pub fn credentials_dir(&self) -> PathBuf {
        paths::credentials_dir(&self.data_dir())
    }

    pub fn log_dir(&self) -> PathBuf {
        paths::log_dir(&self.data_dir())
    }

    pub fn health_db(&self) -> PathBuf {
        self.health
            .database
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| paths::health_db(&self.data_dir()))
    }

    /// A transport's settings as JSON for its factory; Null when unset
    pub fn transport_settings(&self, kind: TransportKind) -> serde_json::Value {
        match self.transport.get(kind.as_str()) {
            Some(table) => serde_json::to_value(table).unwrap_or(serde_json::Value::Null),
            None => serde_json::Value::Null,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
