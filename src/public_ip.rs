//! Own-address detection
//!
//! The monitor's public address is excluded from the peer list. Detection
//! falls through three sources: an external lookup service, the local
//! address the OS picks for an outbound UDP socket, and the host name.

use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::config::MonitorConfig;
use crate::types::UNKNOWN;

#[derive(Debug, Deserialize)]
struct LookupResponse {
    ip: String,
}

/// Detect the address peers would see for this host
pub async fn detect_public_ip(config: &MonitorConfig) -> String {
    if let Some(ip) = &config.server_ip {
        return ip.clone();
    }

    match lookup_external(&config.public_ip_url, config.public_ip_timeout()).await {
        Ok(ip) => return ip,
        Err(e) => debug!("External IP lookup failed: {}", e),
    }

    match outbound_interface_ip(&config.udp_probe_target).await {
        Ok(ip) => return ip.to_string(),
        Err(e) => debug!("Outbound interface lookup failed: {}", e),
    }

    match hostname_ip().await {
        Some(ip) => ip.to_string(),
        None => UNKNOWN.to_string(),
    }
}

async fn lookup_external(url: &str, timeout: Duration) -> anyhow::Result<String> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let response = client.get(url).send().await?.error_for_status()?;
    let body: LookupResponse = response.json().await?;
    let ip = body.ip.trim();
    if ip.is_empty() {
        anyhow::bail!("lookup service returned an empty address");
    }
    Ok(ip.to_string())
}

/// Source address the OS assigns for traffic to `target`; nothing is sent
async fn outbound_interface_ip(target: &str) -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(target).await?;
    Ok(socket.local_addr()?.ip())
}

async fn hostname_ip() -> Option<IpAddr> {
    let hostname = match std::env::var("HOSTNAME") {
        Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => tokio::fs::read_to_string("/etc/hostname")
            .await
            .ok()?
            .trim()
            .to_string(),
    };
    if hostname.is_empty() {
        return None;
    }

    resolve_ipv4(&hostname).await
}

/// First IPv4 address `host` resolves to
async fn resolve_ipv4(host: &str) -> Option<IpAddr> {
    let addrs: Vec<_> = tokio::net::lookup_host((host, 0)).await.ok()?.collect();
    addrs.into_iter().map(|addr| addr.ip()).find(IpAddr::is_ipv4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_override_skips_detection() {
        let config = MonitorConfig {
            server_ip: Some("198.51.100.20".to_string()),
            public_ip_url: "http://127.0.0.1:9/unused".to_string(),
            ..MonitorConfig::default()
        };
        assert_eq!(detect_public_ip(&config).await, "198.51.100.20");
    }

    #[tokio::test]
    async fn test_external_lookup_reads_ip_field() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let body = "{\"ip\":\"203.0.113.77\"}";
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });

        let ip = lookup_external(&format!("http://{}/", addr), Duration::from_secs(2)).await.unwrap();
        assert_eq!(ip, "203.0.113.77");
    }

    #[tokio::test]
    async fn test_resolve_ipv4_skips_ipv6() {
        let ip = resolve_ipv4("localhost").await.unwrap();
        assert!(ip.is_ipv4() && ip.is_loopback());

        let ip = resolve_ipv4("127.0.0.1").await;
        assert_eq!(ip, Some(IpAddr::from([127, 0, 0, 1])));

        assert!(resolve_ipv4("::1").await.is_none());
    }

    #[tokio::test]
    async fn test_external_lookup_failure_falls_through() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = MonitorConfig {
            public_ip_url: format!("http://127.0.0.1:{}/", port),
            udp_probe_target: "127.0.0.1:9".to_string(),
            ..MonitorConfig::default()
        };

        // The UDP fallback resolves to the loopback interface
        assert_eq!(detect_public_ip(&config).await, "127.0.0.1");
    }
}
