// ABOUTME: Server configuration read from dockhand.yml.
// ABOUTME: Handles discovery, YAML parsing, defaults, and command-line overrides.

use crate::error::{Error, Result};
use crate::service::ServiceOptions;
use crate::transfer::ChunkSize;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "dockhand.yml";
pub const CONFIG_FILENAME_ALT: &str = "dockhand.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".dockhand/config.yml";

pub const DEFAULT_ADDR: &str = "127.0.0.1:7420";
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Engine endpoint; `DOCKER_HOST` and then the local socket when unset.
    #[serde(default)]
    pub docker_host: Option<String>,

    #[serde(default)]
    pub chunk_size: ChunkSize,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    pub drain_timeout: Duration,

    #[serde(default = "default_cancel_grace", with = "humantime_serde")]
    pub cancel_grace: Duration,
}

fn default_addr() -> String {
    DEFAULT_ADDR.to_string()
}

fn default_event_capacity() -> usize {
    crate::events::DEFAULT_CAPACITY
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_cancel_grace() -> Duration {
    Duration::from_secs(5)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            docker_host: None,
            chunk_size: ChunkSize::default(),
            event_capacity: default_event_capacity(),
            drain_timeout: default_drain_timeout(),
            cancel_grace: default_cancel_grace(),
        }
    }
}

/// Values given on the command line; each one wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub addr: Option<String>,
    pub docker_host: Option<String>,
    pub chunk_size: Option<ChunkSize>,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Like [`Config::discover`], falling back to defaults when no file exists.
    pub fn discover_or_default(dir: &Path) -> Result<Self> {
        match Self::discover(dir) {
            Err(Error::ConfigNotFound(_)) => {
                tracing::debug!(dir = %dir.display(), "no config file; using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(addr) = overrides.addr {
            self.addr = addr;
        }
        if let Some(host) = overrides.docker_host {
            self.docker_host = Some(host);
        }
        if let Some(size) = overrides.chunk_size {
            self.chunk_size = size;
        }
        self
    }

    /// Engine endpoint after applying the `DOCKER_HOST` fallback.
    pub fn docker_host(&self) -> String {
        self.docker_host
            .clone()
            .or_else(|| std::env::var("DOCKER_HOST").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| DEFAULT_DOCKER_HOST.to_string())
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            event_capacity: self.event_capacity,
            cancel_grace: self.cancel_grace,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.addr.trim().is_empty() {
            return Err(Error::InvalidConfig("addr must not be empty".into()));
        }
        if self.event_capacity == 0 {
            return Err(Error::InvalidConfig(
                "event_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
