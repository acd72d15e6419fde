use std::io::{Error, ErrorKind, Result};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Proxy service settings, read from a TOML file.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    listen: Vec<String>,
    #[serde(default = "default_timeout")]
    handshake_timeout: u64,
    #[serde(default = "default_timeout")]
    connect_timeout: u64,
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;

        if config.listen.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "at least one listen address is required",
            ));
        }
        if config.handshake_timeout == 0 || config.connect_timeout == 0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "timeouts must be at least one second",
            ));
        }
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn listen(&self) -> &[String] {
        &self.listen
    }

    /// Deadline for a client to complete its handshake.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }

    /// Deadline for reaching a requested destination.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}
