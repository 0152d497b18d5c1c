use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use oitls_shared::events::TracingSink;

mod config;
mod dns;
mod http;
mod route;
mod sequencer;

use config::OiTlsConfig;
use http::HttpRequest;
use sequencer::Sequencer;

#[derive(Parser)]
#[command(name = "oitls-client")]
#[command(author = "OI-TLS Team")]
#[command(version = "0.1.0")]
#[command(about = "Reach a backend over InnerTLS carried inside OuterTLS to an entry node", long_about = None)]
struct Cli {
    /// YAML configuration file [default: ./oitls-client.yml or ~/oitls-client.yml if present]
    #[arg(short, long, env = "OITLS_CONFIG")]
    config: Option<PathBuf>,

    /// Entry node hostname or IP [default: entry.example.internal]
    #[arg(long, env = "ENTRY_HOST")]
    entry_host: Option<String>,

    /// Entry node port [default: 443]
    #[arg(long)]
    entry_port: Option<u16>,

    /// InnerTLS server name [default: backend.example.internal]
    #[arg(long, env = "BACKEND_HOST")]
    backend_host: Option<String>,

    /// URL requested through the tunnel [default: https://backend.example.internal/healthz]
    #[arg(long, env = "BACKEND_URL")]
    backend_url: Option<String>,

    /// DNS server [default: 172.40.0.53:53]
    #[arg(long, env = "DNS_ADDR")]
    dns: Option<SocketAddr>,

    /// Default gateway [default: 172.40.0.254]
    #[arg(long, env = "GATEWAY")]
    gateway: Option<IpAddr>,

    /// Do not touch the routing table
    #[arg(long)]
    skip_route: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Result<OiTlsConfig> {
        let mut config = match self.config.or_else(OiTlsConfig::find_config) {
            Some(path) => OiTlsConfig::load(&path)?,
            None => OiTlsConfig::default(),
        };
        if let Some(v) = self.entry_host {
            config.entry_host = v;
        }
        if let Some(v) = self.entry_port {
            config.entry_port = v;
        }
        if let Some(v) = self.backend_host {
            config.backend_host = v;
        }
        if let Some(v) = self.backend_url {
            config.backend_url = v;
        }
        if let Some(v) = self.dns {
            config.dns = v;
        }
        if let Some(v) = self.gateway {
            config.gateway = v;
        }
        config.skip_route |= self.skip_route;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "oitls_client=debug,oitls_shared=debug"
    } else {
        "oitls_client=info,oitls_shared=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = cli.into_config()?;

    if config.skip_route {
        info!("Leaving routing table untouched");
    } else {
        route::set_default_route(config.gateway)
            .await
            .context("Route setup failed")?;
    }

    let entry_ip: IpAddr = match config.entry_host.parse() {
        Ok(ip) => ip,
        Err(_) => {
            let ip = dns::resolve_host(&config.entry_host, config.dns, config.dns_timeout())
                .await
                .with_context(|| format!("Failed to resolve entry host {}", config.entry_host))?;
            info!("Resolved {} -> {}", config.entry_host, ip);
            IpAddr::V4(ip)
        }
    };

    match dns::lookup_txt(config.dns, config.dns_timeout()).await {
        Ok(texts) => info!(name = dns::TXT_NAME, ?texts, "TXT lookup"),
        Err(e) => warn!("TXT lookup failed: {}", e),
    }

    let entry = SocketAddr::new(entry_ip, config.entry_port);
    let request = HttpRequest::get(&config.url()?, &config.user_agent)?;
    let sequencer = Sequencer::new(
        entry,
        &config.entry_host,
        &config.backend_host,
        Arc::new(TracingSink),
    )?;

    info!("Requesting {} via {}", config.backend_url, entry);
    let response = sequencer
        .run(&request)
        .await
        .context("Request failed")?;

    println!("{} {}", response.status, response.reason);
    println!("{}", response.body_text());
    Ok(())
}
