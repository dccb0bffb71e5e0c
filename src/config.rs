//! Monitor Configuration
//!
//! Configurable parameters for the ElectrumX monitor.
//! Defaults match a stock docker-compose deployment of the index server.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for the monitor service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    // === Index server ===

    /// Host the index server's JSON-RPC ports are reached on
    pub index_host: String,

    /// Variable holding the `tcp://host:port,ssl://host:port` service list
    pub services_env_var: String,

    /// Port assumed for a peer that advertises TCP without a number
    pub default_tcp_port: u16,

    /// Port assumed for a peer that advertises SSL without a number
    pub default_ssl_port: u16,

    /// Client name sent with `server.version`
    pub client_name: String,

    /// Protocol version sent with `server.version`
    pub protocol_version: String,

    // === Timeouts (milliseconds) ===

    /// `server.features` and `server.peers.subscribe`
    pub query_timeout_ms: u64,

    /// Supplemental and backfill reachability probes
    pub probe_timeout_ms: u64,

    /// Each runtime-context query
    pub runtime_timeout_ms: u64,

    // === Public address ===

    /// External IP lookup endpoint (JSON body with an `ip` field)
    pub public_ip_url: String,

    pub public_ip_timeout_ms: u64,

    /// Address used to learn the outbound interface when the lookup fails
    pub udp_probe_target: String,

    /// Operator-supplied public address; disables detection
    pub server_ip: Option<String>,

    // === Discovery ===

    /// Extra hosts probed by the heavy tier
    pub supplemental_hosts: Vec<String>,

    // === Runtime context ===

    /// Container running the index server
    pub container_name: String,

    /// Data directory measured for `db_size`
    pub data_dir: String,

    pub docker_binary: String,

    // === Cache ===

    pub light_ttl_secs: u64,

    pub heavy_ttl_secs: u64,

    /// Heavy-tier TTL while the cached peer list is empty
    pub empty_heavy_ttl_secs: u64,

    pub warm_retry_attempts: u32,

    pub warm_retry_delay_secs: u64,

    // === API ===

    pub api_port: u16,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            index_host: "electrumx".to_string(),
            services_env_var: "SERVICES".to_string(),
            default_tcp_port: 50001,
            default_ssl_port: 50002,
            client_name: "electrumx-monitor".to_string(),
            protocol_version: "1.4".to_string(),

            query_timeout_ms: 5000,
            probe_timeout_ms: 2000,
            runtime_timeout_ms: 2000,

            public_ip_url: "https://api.ipify.org?format=json".to_string(),
            public_ip_timeout_ms: 400,
            udp_probe_target: "8.8.8.8:80".to_string(),
            server_ip: None,

            supplemental_hosts: vec![],

            container_name: "electrumx-server".to_string(),
            data_dir: "/data".to_string(),
            docker_binary: "docker".to_string(),

            light_ttl_secs: 60,
            heavy_ttl_secs: 120,
            empty_heavy_ttl_secs: 15,
            warm_retry_attempts: 3,
            warm_retry_delay_secs: 10,

            api_port: 8080,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for CLI overrides

    pub fn with_api_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.api_port = port;
        }
        self
    }

    pub fn with_index_host(mut self, host: Option<String>) -> Self {
        if let Some(host) = host {
            self.index_host = host;
        }
        self
    }

    pub fn with_server_ip(mut self, ip: Option<String>) -> Self {
        if ip.is_some() {
            self.server_ip = ip;
        }
        self
    }

    /// Append hosts given on the command line after the configured ones
    pub fn with_supplemental_hosts(mut self, hosts: Vec<String>) -> Self {
        self.supplemental_hosts.extend(hosts);
        self
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn runtime_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime_timeout_ms)
    }

    pub fn public_ip_timeout(&self) -> Duration {
        Duration::from_millis(self.public_ip_timeout_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.light_ttl_secs == 0 {
            anyhow::bail!("light_ttl_secs must be greater than zero");
        }

        if self.empty_heavy_ttl_secs > self.heavy_ttl_secs {
            anyhow::bail!(
                "empty_heavy_ttl_secs ({}) must not exceed heavy_ttl_secs ({})",
                self.empty_heavy_ttl_secs,
                self.heavy_ttl_secs
            );
        }

        for (name, value) in [
            ("query_timeout_ms", self.query_timeout_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("runtime_timeout_ms", self.runtime_timeout_ms),
            ("public_ip_timeout_ms", self.public_ip_timeout_ms),
        ] {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }

        if self.index_host.trim().is_empty() {
            anyhow::bail!("index_host must not be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.light_ttl_secs, 60);
        assert_eq!(config.heavy_ttl_secs, 120);
        assert_eq!(config.empty_heavy_ttl_secs, 15);
        assert_eq!(config.public_ip_timeout(), Duration::from_millis(400));
        assert!(config.server_ip.is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = MonitorConfig::default();
        assert!(config.validate().is_ok());

        // Invalid: empty-list TTL longer than the regular one
        config.empty_heavy_ttl_secs = 600;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.probe_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_methods() {
        let config = MonitorConfig::default()
            .with_api_port(Some(9090))
            .with_index_host(Some("127.0.0.1".to_string()))
            .with_server_ip(None)
            .with_supplemental_hosts(vec!["electrum.example.org".to_string()]);

        assert_eq!(config.api_port, 9090);
        assert_eq!(config.index_host, "127.0.0.1");
        assert!(config.server_ip.is_none());
        assert_eq!(config.supplemental_hosts, vec!["electrum.example.org"]);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        std::fs::write(
            &path,
            "index_host = \"10.0.0.5\"\nsupplemental_hosts = [\"a.example\", \"b.example\"]\n",
        )
        .unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.index_host, "10.0.0.5");
        assert_eq!(config.supplemental_hosts.len(), 2);
        assert_eq!(config.heavy_ttl_secs, 120);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("monitor.toml");

        let config = MonitorConfig::default().with_server_ip(Some("203.0.113.7".to_string()));
        config.save(&path).unwrap();

        let loaded = MonitorConfig::load(&path).unwrap();
        assert_eq!(loaded.server_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(loaded.container_name, config.container_name);
    }
}
