//! Chat client configuration.
//!
//! Load order: `slcp_config.toml` → environment variables → defaults.
//! The top-level keys match the files written by earlier clients
//! (`username` is accepted as an alias of `handle`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "slcp_config.toml";

/// Top-level SLCP configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlcpConfig {
    /// Our chat handle. Must not contain whitespace.
    #[serde(alias = "username")]
    pub handle: String,
    /// UDP and TCP port this client listens on.
    pub port: u16,
    /// Port discovery services listen on; JOIN/LEAVE/WHO are broadcast here.
    pub whoisport: u16,
    /// Directory for received images. Relative paths are resolved against
    /// the config file's directory.
    pub imagepath: PathBuf,
    /// Sent once to each peer that messages us, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoreply: Option<String>,
    pub network: NetworkConfig,
    /// Directory of the file this config was loaded from.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Socket and transfer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Broadcast address for JOIN/LEAVE/WHO.
    pub broadcast: Ipv4Addr,
    /// How long to collect KNOWNUSERS answers before showing the list.
    pub who_window_ms: u64,
    pub connect_timeout_secs: u64,
    /// Deadline for the `IMG` header line on incoming transfers.
    pub header_timeout_secs: u64,
    /// Deadline for each chunk of image data.
    pub chunk_timeout_secs: u64,
    pub chunk_size: usize,
    /// Incoming images above this size are refused.
    pub max_image_bytes: u64,
    /// Incoming image connections served at once; extra ones are dropped.
    pub max_incoming_transfers: usize,
}

impl Default for SlcpConfig {
    fn default() -> Self {
        Self {
            handle: String::new(),
            port: 0,
            whoisport: 4000,
            imagepath: PathBuf::from("received_images"),
            autoreply: None,
            network: NetworkConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            broadcast: Ipv4Addr::BROADCAST,
            who_window_ms: 500,
            connect_timeout_secs: 10,
            header_timeout_secs: 5,
            chunk_timeout_secs: 30,
            chunk_size: 8192,
            max_image_bytes: 50 * 1024 * 1024,
            max_incoming_transfers: 8,
        }
    }
}

impl NetworkConfig {
    pub fn who_window(&self) -> Duration {
        Duration::from_millis(self.who_window_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn header_timeout(&self) -> Duration {
        Duration::from_secs(self.header_timeout_secs)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }
}

/// Helper to parse an env var and apply it to a config field.
fn env_override<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(v) = std::env::var(var)
        && let Ok(n) = v.parse()
    {
        *target = n;
    }
}

impl SlcpConfig {
    /// Load config from `path`, with env var overrides.
    /// Falls back to defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config from {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("invalid config in {}", path.display()))?
        } else {
            Self::default()
        };

        env_override("SLCP_HANDLE", &mut config.handle);
        env_override("SLCP_PORT", &mut config.port);
        env_override("SLCP_WHOISPORT", &mut config.whoisport);
        env_override("SLCP_IMAGEPATH", &mut config.imagepath);
        if let Ok(reply) = std::env::var("SLCP_AUTOREPLY") {
            config.autoreply = Some(reply).filter(|r| !r.is_empty());
        }

        if let Some(dir) = path.parent() {
            config.base_dir = dir.to_path_buf();
        }

        Ok(config)
    }

    /// Write the config back to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Where received images go, with a relative `imagepath` resolved
    /// against the config file's directory.
    pub fn image_dir(&self) -> PathBuf {
        if self.imagepath.is_relative() {
            self.base_dir.join(&self.imagepath)
        } else {
            self.imagepath.clone()
        }
    }

    /// True when handle and port are set, i.e. no prompting is needed.
    pub fn is_complete(&self) -> bool {
        !self.handle.is_empty() && self.port != 0
    }

    /// Check the values a running client depends on.
    pub fn validate(&self) -> Result<()> {
        validate_handle(&self.handle)?;
        if self.port == 0 {
            anyhow::bail!("port must be between 1 and 65535");
        }
        if self.whoisport == 0 {
            anyhow::bail!("whoisport must be between 1 and 65535");
        }
        if self.network.chunk_size == 0 {
            anyhow::bail!("network.chunk_size must be greater than zero");
        }
        if self.network.max_incoming_transfers == 0 {
            anyhow::bail!("network.max_incoming_transfers must be greater than zero");
        }
        Ok(())
    }

    /// Set a single key by its TOML name, e.g. `port` or `network.chunk_size`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            value
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid value for {}: {}", key, e))
        }

        match key {
            "handle" | "username" => {
                validate_handle(value)?;
                self.handle = value.to_string();
            }
            "port" => self.port = parse(key, value)?,
            "whoisport" => self.whoisport = parse(key, value)?,
            "imagepath" => self.imagepath = PathBuf::from(value),
            "autoreply" => self.autoreply = Some(value.to_string()).filter(|v| !v.is_empty()),
            "network.broadcast" => self.network.broadcast = parse(key, value)?,
            "network.who_window_ms" => self.network.who_window_ms = parse(key, value)?,
            "network.connect_timeout_secs" => {
                self.network.connect_timeout_secs = parse(key, value)?;
            }
            "network.header_timeout_secs" => {
                self.network.header_timeout_secs = parse(key, value)?;
            }
            "network.chunk_timeout_secs" => self.network.chunk_timeout_secs = parse(key, value)?,
            "network.chunk_size" => self.network.chunk_size = parse(key, value)?,
            "network.max_image_bytes" => self.network.max_image_bytes = parse(key, value)?,
            "network.max_incoming_transfers" => {
                self.network.max_incoming_transfers = parse(key, value)?;
            }
            other => anyhow::bail!("unknown config key: {}", other),
        }
        Ok(())
    }
}

/// Handles are single protocol tokens: non-empty, no whitespace.
pub fn validate_handle(handle: &str) -> Result<()> {
    if handle.is_empty() {
        anyhow::bail!("handle must not be empty");
    }
    if handle.chars().any(|c| c.is_whitespace() || c == ',') {
        anyhow::bail!("handle {:?} must not contain whitespace or commas", handle);
    }
    Ok(())
}
