//! Daemon configuration
//!
//! Defaults, overlaid by an optional JSON file, overlaid by environment variables.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default Unix socket for the IPC server
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/resilient-ipfs.sock";

/// Default pin-by-hash endpoint of the secondary pinning service
pub const DEFAULT_PIN_ENDPOINT: &str = "https://api.pinata.cloud/pinning/pinByHash";

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;
const DEFAULT_RETENTION_DAYS: u64 = 30;
const DEFAULT_MESSAGE_LIMIT: usize = 50;
const DEFAULT_MAX_TOTAL_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub cache: CacheConfig,
    pub socket_path: Option<PathBuf>,
}

/// Remote client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteConfig {
    /// Candidate endpoints, tried in order
    pub endpoints: Vec<Endpoint>,
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    /// Base backoff; attempt `n` waits `retry_delay_ms * n`
    pub retry_delay_ms: u64,
    pub debug_mode: bool,
    pub pinning: PinningConfig,
}

/// A single IPFS HTTP API endpoint
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PinningConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub endpoint: String,
}

/// Local cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub directory: PathBuf,
    pub retention_days: u64,
    pub message_limit: usize,
    pub max_total_bytes: u64,
}

fn default_protocol() -> String {
    "http".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                Endpoint::new("https", "ipfs.infura.io", 5001),
                Endpoint::new("http", "localhost", 5001),
            ],
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            debug_mode: false,
            pinning: PinningConfig::default(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for PinningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            secret_key: None,
            endpoint: DEFAULT_PIN_ENDPOINT.to_string(),
        }
    }
}

impl PinningConfig {
    /// Pinning runs only when enabled and both credentials are present
    pub fn is_active(&self) -> bool {
        self.enabled && self.api_key.is_some() && self.secret_key.is_some()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let directory = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("resilient-ipfs");

        Self {
            directory,
            retention_days: DEFAULT_RETENTION_DAYS,
            message_limit: DEFAULT_MESSAGE_LIMIT,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
        }
    }
}

impl Endpoint {
    pub fn new(protocol: &str, host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            protocol: protocol.to_string(),
            username: None,
            password: None,
        }
    }

    /// Base URL, e.g. `http://localhost:5001`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url())
    }
}

// Credentials stay out of logs
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.base_url())
            .field("authenticated", &self.username.is_some())
            .finish()
    }
}

impl fmt::Debug for PinningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinningConfig")
            .field("enabled", &self.enabled)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Config {
    /// Load configuration: defaults, then `path` (JSON) if given, then environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file: {:?}", path))?
            }
            None => Config::default(),
        };

        config.apply_env(|key| env::var(key).ok())?;
        config.normalize();
        Ok(config)
    }

    /// Socket path for the IPC server
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("IPFS_HOST") {
            let protocol = lookup("IPFS_PROTOCOL").unwrap_or_else(default_protocol);
            let port = match lookup("IPFS_PORT") {
                Some(port) => port.parse().context("IPFS_PORT must be a port number")?,
                None => 5001,
            };
            self.remote.endpoints = vec![Endpoint::new(&protocol, &host, port)];
        }
        if let Some(ms) = lookup("IPFS_TIMEOUT_MS") {
            self.remote.timeout_ms = ms.parse().context("IPFS_TIMEOUT_MS must be an integer")?;
        }
        if let Some(attempts) = lookup("IPFS_RETRY_ATTEMPTS") {
            self.remote.retry_attempts = attempts
                .parse()
                .context("IPFS_RETRY_ATTEMPTS must be an integer")?;
        }
        if let Some(ms) = lookup("IPFS_RETRY_DELAY_MS") {
            self.remote.retry_delay_ms =
                ms.parse().context("IPFS_RETRY_DELAY_MS must be an integer")?;
        }
        if let Some(debug) = lookup("IPFS_DEBUG") {
            self.remote.debug_mode = matches!(debug.as_str(), "1" | "true" | "yes");
        }
        if let Some(key) = lookup("PINATA_API_KEY") {
            self.remote.pinning.api_key = Some(key);
            self.remote.pinning.enabled = true;
        }
        if let Some(secret) = lookup("PINATA_SECRET_KEY") {
            self.remote.pinning.secret_key = Some(secret);
        }
        if let Some(dir) = lookup("CACHE_DIR") {
            self.cache.directory = PathBuf::from(dir);
        }
        if let Some(days) = lookup("CACHE_RETENTION_DAYS") {
            self.cache.retention_days = days
                .parse()
                .context("CACHE_RETENTION_DAYS must be an integer")?;
        }
        if let Some(socket) = lookup("RESILIENT_IPFS_SOCKET") {
            self.socket_path = Some(PathBuf::from(socket));
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.remote.retry_attempts = self.remote.retry_attempts.max(1);
    }
}
