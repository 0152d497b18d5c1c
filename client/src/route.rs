//! Default route installation.
//!
//! Runs `ip route replace default via <gateway>` before the client sends any
//! traffic. Uses full binary paths because minimal container images often
//! ship without a useful PATH.

use anyhow::{Context, Result};
use std::net::IpAddr;
use std::path::Path;
use tokio::process::Command;
use tracing::info;

/// Common locations for iproute2's `ip`.
const IP_PATHS: &[&str] = &["/usr/sbin/ip", "/sbin/ip", "/usr/bin/ip", "/bin/ip"];

/// Find the full path to a binary by checking common locations, falling
/// back to the bare name.
fn find_binary(candidates: &[&str]) -> String {
    candidates
        .iter()
        .find(|path| Path::new(path).exists())
        .map(|path| path.to_string())
        .or_else(|| {
            candidates
                .first()
                .and_then(|first| first.rsplit('/').next())
                .map(String::from)
        })
        .unwrap_or_else(|| "ip".to_string())
}

fn route_args(gateway: IpAddr) -> Vec<String> {
    let mut args = Vec::new();
    if gateway.is_ipv6() {
        args.push("-6".to_string());
    }
    args.extend(["route", "replace", "default", "via"].map(String::from));
    args.push(gateway.to_string());
    args
}

pub async fn set_default_route(gateway: IpAddr) -> Result<()> {
    let ip = find_binary(IP_PATHS);
    let args = route_args(gateway);
    info!("{} {}", ip, args.join(" "));

    let output = Command::new(&ip)
        .args(&args)
        .output()
        .await
        .with_context(|| format!("Failed to run {}", ip))?;

    if !output.status.success() {
        anyhow::bail!(
            "{} {} exited with {}: {}",
            ip,
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_args() {
        assert_eq!(
            route_args("172.40.0.254".parse().unwrap()).join(" "),
            "route replace default via 172.40.0.254"
        );
        assert_eq!(
            route_args("fd00::1".parse().unwrap()).join(" "),
            "-6 route replace default via fd00::1"
        );
    }

    #[test]
    fn test_find_binary_falls_back_to_bare_name() {
        assert_eq!(find_binary(&["/nonexistent/dir/ip"]), "ip");
        assert_eq!(find_binary(&["/nonexistent/ip", "/"]), "/");
    }
}
