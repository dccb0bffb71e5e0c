//! Core types shared by the acquisition pipeline, the cache and the API
//!
//! These types mirror what the dashboard consumes. All of them are plain
//! owned data so a cached value can be handed out by clone.

use serde::{Deserialize, Serialize};

/// Sentinel used for string fields whose sub-probe failed
pub const UNKNOWN: &str = "Unknown";

/// Number of genesis-hash characters kept in the short form
pub const GENESIS_PREFIX_LEN: usize = 16;

// =============================================================================
// PEERS
// =============================================================================

/// One known index-server peer
///
/// Identity is `host` alone. Port and reachability fields are filled in
/// progressively by whichever source observed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub host: String,
    pub tcp_port: Option<u16>,
    pub ssl_port: Option<u16>,
    pub tcp_reachable: Option<bool>,
    pub ssl_reachable: Option<bool>,
}

impl PeerRecord {
    /// Record as advertised by the index server (reachability unknown)
    pub fn advertised(host: impl Into<String>, tcp_port: Option<u16>, ssl_port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            tcp_port,
            ssl_port,
            tcp_reachable: None,
            ssl_reachable: None,
        }
    }

    /// Whether any transport has been confirmed reachable
    pub fn is_reachable(&self) -> bool {
        self.tcp_reachable == Some(true) || self.ssl_reachable == Some(true)
    }
}

// =============================================================================
// SERVER FEATURES
// =============================================================================

/// Subset of the `server.features` result the dashboard shows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFeatures {
    #[serde(default)]
    pub server_version: Option<String>,
    #[serde(default)]
    pub protocol_min: Option<String>,
    #[serde(default)]
    pub protocol_max: Option<String>,
    #[serde(default)]
    pub genesis_hash: Option<String>,
    #[serde(default)]
    pub hash_function: Option<String>,
    #[serde(default)]
    pub pruning: Option<u64>,
}

/// Shorten a genesis hash for display: first 16 characters plus `...`
pub fn truncate_genesis(hash: &str) -> String {
    if hash.is_empty() {
        return String::new();
    }
    let prefix: String = hash.chars().take(GENESIS_PREFIX_LEN).collect();
    format!("{}...", prefix)
}

// =============================================================================
// STATS SNAPSHOT
// =============================================================================

/// Aggregated result of one acquisition cycle
///
/// Every field starts at its "unknown" sentinel; a failing sub-probe leaves
/// its fields there and never aborts the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    // Server identity
    pub server_version: String,
    pub protocol_min: String,
    pub protocol_max: String,
    pub genesis_hash: String,
    pub genesis_hash_full: String,
    pub hash_function: String,
    pub pruning: Option<u64>,

    // Discovery configuration echo
    pub peer_discovery: String,
    pub peer_announce: String,

    pub active_servers: Vec<PeerRecord>,
    pub active_servers_count: usize,

    // Runtime metrics
    pub sessions: u32,
    pub uptime: u64,
    pub db_size: u64,

    // Network endpoints
    pub tcp_port: Option<u16>,
    pub ssl_port: Option<u16>,
    pub server_ip: String,
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self {
            server_version: UNKNOWN.to_string(),
            protocol_min: String::new(),
            protocol_max: String::new(),
            genesis_hash: String::new(),
            genesis_hash_full: String::new(),
            hash_function: String::new(),
            pruning: None,
            peer_discovery: "unknown".to_string(),
            peer_announce: "unknown".to_string(),
            active_servers: Vec::new(),
            active_servers_count: 0,
            sessions: 0,
            uptime: 0,
            db_size: 0,
            tcp_port: None,
            ssl_port: None,
            server_ip: UNKNOWN.to_string(),
        }
    }
}

impl StatsSnapshot {
    /// Copy identity fields from a `server.features` result
    pub fn apply_features(&mut self, features: &ServerFeatures) {
        if let Some(version) = &features.server_version {
            self.server_version = version.clone();
        }
        self.protocol_min = features.protocol_min.clone().unwrap_or_default();
        self.protocol_max = features.protocol_max.clone().unwrap_or_default();
        let full = features.genesis_hash.clone().unwrap_or_default();
        self.genesis_hash = truncate_genesis(&full);
        self.genesis_hash_full = full;
        self.hash_function = features.hash_function.clone().unwrap_or_default();
        self.pruning = features.pruning;
    }

    /// Replace the peer list, keeping the count in step
    pub fn set_active_servers(&mut self, servers: Vec<PeerRecord>) {
        self.active_servers_count = servers.len();
        self.active_servers = servers;
    }

    /// Whether the index server answered `server.features`
    pub fn is_server_known(&self) -> bool {
        self.server_version != UNKNOWN
    }
}

// =============================================================================
// CACHE TIERS
// =============================================================================

/// Acquisition depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Index-server self-reported data only
    Light,

    /// Light data plus supplemental host probing
    Heavy,
}

impl Tier {
    pub fn includes_supplemental_probes(&self) -> bool {
        matches!(self, Tier::Heavy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Light => "light",
            Tier::Heavy => "heavy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_defaults_are_sentinels() {
        let stats = StatsSnapshot::default();
        assert_eq!(stats.server_version, "Unknown");
        assert_eq!(stats.server_ip, "Unknown");
        assert_eq!(stats.protocol_min, "");
        assert_eq!(stats.sessions, 0);
        assert!(stats.pruning.is_none());
        assert!(!stats.is_server_known());
    }

    #[test]
    fn test_truncate_genesis() {
        let hash = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f";
        assert_eq!(truncate_genesis(hash), "000000000019d668...");
        assert_eq!(truncate_genesis("abc"), "abc...");
        assert_eq!(truncate_genesis(""), "");
    }

    #[test]
    fn test_apply_features() {
        let features: ServerFeatures = serde_json::from_value(serde_json::json!({
            "server_version": "ElectrumX 1.16.0",
            "protocol_min": "1.4",
            "protocol_max": "1.4.2",
            "genesis_hash": "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943",
            "hash_function": "sha256",
            "pruning": null,
            "hosts": {}
        }))
        .unwrap();

        let mut stats = StatsSnapshot::default();
        stats.apply_features(&features);

        assert_eq!(stats.server_version, "ElectrumX 1.16.0");
        assert_eq!(stats.protocol_max, "1.4.2");
        assert_eq!(stats.genesis_hash, "000000000933ea01...");
        assert_eq!(stats.genesis_hash_full.len(), 64);
        assert!(stats.is_server_known());
    }

    #[test]
    fn test_set_active_servers_updates_count() {
        let mut stats = StatsSnapshot::default();
        stats.set_active_servers(vec![
            PeerRecord::advertised("a.example", Some(50001), None),
            PeerRecord::advertised("b.example", None, Some(50002)),
        ]);
        assert_eq!(stats.active_servers_count, 2);
    }

    #[test]
    fn test_tier_serialization() {
        assert_eq!(serde_json::to_string(&Tier::Heavy).unwrap(), "\"heavy\"");
        assert!(Tier::Heavy.includes_supplemental_probes());
        assert!(!Tier::Light.includes_supplemental_probes());
    }

    #[test]
    fn test_peer_reachability() {
        let mut peer = PeerRecord::advertised("a.example", Some(50001), None);
        assert!(!peer.is_reachable());
        peer.ssl_reachable = Some(true);
        assert!(peer.is_reachable());
    }
}
