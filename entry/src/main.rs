use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use oitls_shared::events::{EventSink, Fanout, TracingSink};
use oitls_shared::tls;

mod config;
mod log_export;
mod metrics;
mod session;

use config::EntryConfig;
use log_export::{LogExportConfig, LogExporter};
use metrics::Metrics;
use session::SessionHandler;

#[derive(Parser)]
#[command(name = "oitls-entry")]
#[command(author = "OI-TLS Team")]
#[command(version = "0.1.0")]
#[command(about = "OI-TLS entry node: terminates OuterTLS and forwards InnerTLS to the backend", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "ENTRY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address for OuterTLS [default: 0.0.0.0:443]
    #[arg(short, long, env = "ENTRY_LISTEN")]
    listen: Option<SocketAddr>,

    /// Backend host:port [default: 172.41.0.20:8443]
    #[arg(short, long, env = "BACKEND_ADDR")]
    backend: Option<String>,

    /// OuterTLS certificate chain (PEM) [default: certs/entry.crt]
    #[arg(long, env = "ENTRY_CERT")]
    cert: Option<PathBuf>,

    /// OuterTLS private key (PEM) [default: certs/entry.key]
    #[arg(long, env = "ENTRY_KEY")]
    key: Option<PathBuf>,

    /// Seconds allowed for the OuterTLS handshake and first record, 0 = no limit
    #[arg(long)]
    handshake_timeout: Option<u64>,

    /// Serve /metrics and /health on this address
    #[arg(long, env = "ENTRY_METRICS")]
    metrics: Option<SocketAddr>,

    /// Write a JSON line per closed session into this directory
    #[arg(long)]
    session_log_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Result<EntryConfig> {
        let mut config = match &self.config {
            Some(path) => EntryConfig::load(path)?,
            None => EntryConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(cert) = self.cert {
            config.cert = cert;
        }
        if let Some(key) = self.key {
            config.key = key;
        }
        if let Some(secs) = self.handshake_timeout {
            config.handshake_timeout_secs = secs;
        }
        if self.metrics.is_some() {
            config.metrics_listen = self.metrics;
        }
        if let Some(dir) = self.session_log_dir {
            config.session_log = Some(LogExportConfig::new(dir));
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "oitls_entry=debug,oitls_shared=debug"
    } else {
        "oitls_entry=info,oitls_shared=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = cli.into_config()?;

    let server_config = tls::load_server_config(&config.cert, &config.key)
        .with_context(|| format!("Failed to load certificate {}", config.cert.display()))?;

    let metrics = Metrics::new();
    let mut sinks = Fanout::new()
        .with(Arc::new(TracingSink))
        .with(Arc::new(metrics.clone()));
    if let Some(log) = config.session_log.clone() {
        info!(dir = %log.dir.display(), "Session log enabled");
        sinks = sinks.with(Arc::new(LogExporter::new(log)));
    }
    let events: Arc<dyn EventSink> = Arc::new(sinks);

    let admin = match config.metrics_listen {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind metrics listener {}", addr))?;
            info!("Metrics on http://{}/metrics", addr);
            let app = metrics::router(metrics.clone());
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!("Metrics server failed: {}", e);
                }
            }))
        }
        None => None,
    };

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!(
        "OI-TLS entry on {} forwarding to {}",
        config.listen, config.backend
    );

    let handler = Arc::new(SessionHandler::new(
        config.backend.clone(),
        server_config,
        config.handshake_timeout(),
        events,
    ));

    session::serve(listener, handler, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;

    if let Some(admin) = admin {
        admin.abort();
    }
    info!(active = metrics.active_sessions(), "Entry node stopped");
    Ok(())
}
