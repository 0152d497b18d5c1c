//! Configuration file parser for the OI-TLS client
//!
//! Supports oitls-client.yml; every key has a default so the file is
//! optional, and flags / environment variables override it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OiTlsConfig {
    /// Entry node hostname or IP literal
    #[serde(default = "default_entry_host")]
    pub entry_host: String,

    #[serde(default = "default_entry_port")]
    pub entry_port: u16,

    /// InnerTLS server name
    #[serde(default = "default_backend_host")]
    pub backend_host: String,

    /// URL requested over the InnerTLS session
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// DNS server used to resolve the entry host
    #[serde(default = "default_dns")]
    pub dns: SocketAddr,

    /// Default gateway installed before any traffic
    #[serde(default = "default_gateway")]
    pub gateway: IpAddr,

    /// Leave the routing table alone
    #[serde(default)]
    pub skip_route: bool,

    #[serde(default = "default_dns_timeout")]
    pub dns_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_entry_host() -> String {
    "entry.example.internal".to_string()
}

fn default_entry_port() -> u16 {
    443
}

fn default_backend_host() -> String {
    "backend.example.internal".to_string()
}

fn default_backend_url() -> String {
    "https://backend.example.internal/healthz".to_string()
}

fn default_dns() -> SocketAddr {
    SocketAddr::from(([172, 40, 0, 53], 53))
}

fn default_gateway() -> IpAddr {
    IpAddr::from([172, 40, 0, 254])
}

fn default_dns_timeout() -> u64 {
    5
}

fn default_user_agent() -> String {
    "OI-TLS-Client/0.1".to_string()
}

impl Default for OiTlsConfig {
    fn default() -> Self {
        Self {
            entry_host: default_entry_host(),
            entry_port: default_entry_port(),
            backend_host: default_backend_host(),
            backend_url: default_backend_url(),
            dns: default_dns(),
            gateway: default_gateway(),
            skip_route: false,
            dns_timeout_secs: default_dns_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl OiTlsConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: OiTlsConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.entry_host.is_empty() {
            anyhow::bail!("Entry host cannot be empty");
        }
        if self.entry_port == 0 {
            anyhow::bail!("Invalid entry port 0");
        }
        oitls_shared::tls::server_name(&self.backend_host)
            .with_context(|| format!("Invalid backend host '{}'", self.backend_host))?;

        let url = self.url()?;
        match url.scheme() {
            "https" | "http" => {}
            other => anyhow::bail!("Unsupported URL scheme '{}' in '{}'", other, self.backend_url),
        }
        if url.host_str().is_none() {
            anyhow::bail!("Backend URL has no host: '{}'", self.backend_url);
        }

        if self.dns_timeout_secs == 0 {
            anyhow::bail!("dns_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn url(&self) -> Result<Url> {
        Url::parse(&self.backend_url)
            .with_context(|| format!("Invalid backend URL '{}'", self.backend_url))
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout_secs)
    }

    /// Search for config file in standard locations
    pub fn find_config() -> Option<PathBuf> {
        let candidates = ["oitls-client.yml", "oitls-client.yaml", ".oitls-client.yml"];

        for name in &candidates {
            let path = PathBuf::from(name);
            if path.exists() {
                return Some(path);
            }
        }

        if let Some(home) = dirs::home_dir() {
            for name in &candidates {
                let path = home.join(name);
                if path.exists() {
                    return Some(path);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: OiTlsConfig = serde_yaml::from_str("{}").unwrap();
        config.validate().unwrap();
        assert_eq!(config.entry_host, "entry.example.internal");
        assert_eq!(config.entry_port, 443);
        assert_eq!(config.dns, "172.40.0.53:53".parse().unwrap());
        assert_eq!(config.gateway, "172.40.0.254".parse::<IpAddr>().unwrap());
        assert_eq!(config.url().unwrap().path(), "/healthz");
        assert_eq!(config.user_agent, "OI-TLS-Client/0.1");
    }

    #[test]
    fn test_parse_config() {
        let yaml = r#"
entry_host: 10.1.2.3
entry_port: 8443
backend_host: api.internal
backend_url: https://api.internal:9443/v1/status?verbose=1
dns: 127.0.0.1:5353
gateway: 10.1.2.1
skip_route: true
"#;
        let config: OiTlsConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.entry_port, 8443);
        assert!(config.skip_route);
        assert_eq!(config.url().unwrap().port(), Some(9443));
    }

    #[test]
    fn test_validate_rejects() {
        let cases: [fn(&mut OiTlsConfig); 4] = [
            |c| c.entry_port = 0,
            |c| c.backend_url = "ftp://backend.example.internal/".into(),
            |c| c.backend_url = "not a url".into(),
            |c| c.backend_host = "bad host name!".into(),
        ];
        for mutate in cases {
            let mut config = OiTlsConfig::default();
            mutate(&mut config);
            assert!(config.validate().is_err(), "{:?}", config);
        }
    }
}
