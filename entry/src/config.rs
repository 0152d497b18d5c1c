//! Configuration file parser for the entry node
//!
//! Optional `entry.yml`; command-line flags and environment variables
//! override whatever the file sets.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::log_export::LogExportConfig;

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryConfig {
    /// Address the OuterTLS listener binds
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Backend `host:port`; every session is forwarded here
    #[serde(default = "default_backend")]
    pub backend: String,

    /// PEM certificate chain for the OuterTLS server
    #[serde(default = "default_cert")]
    pub cert: PathBuf,

    /// PEM private key for the OuterTLS server
    #[serde(default = "default_key")]
    pub key: PathBuf,

    /// Deadline for the OuterTLS accept and the first record (0 = none)
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Admin listener for `/metrics` and `/health`
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,

    /// JSON session log
    #[serde(default)]
    pub session_log: Option<LogExportConfig>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 443))
}

fn default_backend() -> String {
    "172.41.0.20:8443".to_string()
}

fn default_cert() -> PathBuf {
    PathBuf::from("certs/entry.crt")
}

fn default_key() -> PathBuf {
    PathBuf::from("certs/entry.key")
}

fn default_handshake_timeout() -> u64 {
    10
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backend: default_backend(),
            cert: default_cert(),
            key: default_key(),
            handshake_timeout_secs: default_handshake_timeout(),
            metrics_listen: None,
            session_log: None,
        }
    }
}

impl EntryConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn parse(content: &str) -> Result<Self> {
        let config: EntryConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.backend.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                port.parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .with_context(|| format!("Invalid backend port in '{}'", self.backend))?;
            }
            _ => anyhow::bail!("Backend must be host:port, got '{}'", self.backend),
        }

        if let Some(log) = &self.session_log {
            if log.max_files == 0 {
                anyhow::bail!("session_log.max_files must be at least 1");
            }
            if log.max_file_size == 0 {
                anyhow::bail!("session_log.max_file_size must be positive");
            }
        }

        Ok(())
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        match self.handshake_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
