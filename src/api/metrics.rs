//! Metrics Collection
//!
//! Counters for cache behaviour and gauges mirroring the latest snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::types::{StatsSnapshot, Tier};

/// Per-tier cache counters and gauges of the tier's latest snapshot
#[derive(Default)]
pub struct TierCounters {
    /// Requests answered from a fresh entry
    pub hits: AtomicU64,

    /// Acquisitions started
    pub refreshes: AtomicU64,

    /// Acquisitions that produced nothing
    pub failures: AtomicU64,

    /// Failed refreshes answered with the previous snapshot
    pub stale_served: AtomicU64,

    /// Peers in the latest snapshot
    pub active_servers: AtomicU64,

    /// Established client sessions in the latest snapshot
    pub sessions: AtomicU64,

    /// Index server uptime from the latest snapshot
    pub index_uptime: AtomicU64,
}

impl TierCounters {
    /// hits, refreshes, failures, stale_served
    fn values(&self) -> [u64; 4] {
        [
            self.hits.load(Ordering::Relaxed),
            self.refreshes.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
            self.stale_served.load(Ordering::Relaxed),
        ]
    }

    /// active_servers, sessions, index_uptime
    fn gauges(&self) -> [u64; 3] {
        [
            self.active_servers.load(Ordering::Relaxed),
            self.sessions.load(Ordering::Relaxed),
            self.index_uptime.load(Ordering::Relaxed),
        ]
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "hits": self.hits.load(Ordering::Relaxed),
            "refreshes": self.refreshes.load(Ordering::Relaxed),
            "failures": self.failures.load(Ordering::Relaxed),
            "stale_served": self.stale_served.load(Ordering::Relaxed),
            "index_server": {
                "active_servers": self.active_servers.load(Ordering::Relaxed),
                "sessions": self.sessions.load(Ordering::Relaxed),
                "uptime_secs": self.index_uptime.load(Ordering::Relaxed),
            },
        })
    }
}

/// Metrics collector for the monitor
#[derive(Default)]
pub struct Metrics {
    /// Start time for uptime calculation
    start_time: Option<Instant>,

    pub light: TierCounters,
    pub heavy: TierCounters,

    /// Dashboard API requests served
    pub api_requests: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Monitor uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn tier(&self, tier: Tier) -> &TierCounters {
        match tier {
            Tier::Light => &self.light,
            Tier::Heavy => &self.heavy,
        }
    }

    pub fn inc_hit(&self, tier: Tier) {
        self.tier(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_refresh(&self, tier: Tier) {
        self.tier(tier).refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failure(&self, tier: Tier) {
        self.tier(tier).failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stale_served(&self, tier: Tier) {
        self.tier(tier).stale_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_api_requests(&self) {
        self.api_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Update `tier`'s gauges from a snapshot just stored under it
    pub fn observe_snapshot(&self, tier: Tier, stats: &StatsSnapshot) {
        let gauges = self.tier(tier);
        gauges
            .active_servers
            .store(stats.active_servers_count as u64, Ordering::Relaxed);
        gauges.sessions.store(stats.sessions as u64, Ordering::Relaxed);
        gauges.index_uptime.store(stats.uptime, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "# HELP electrumx_monitor_uptime_seconds Monitor uptime in seconds\n\
             # TYPE electrumx_monitor_uptime_seconds gauge\n\
             electrumx_monitor_uptime_seconds {}\n\n",
            self.uptime_secs()
        ));

        output.push_str(&format!(
            "# HELP electrumx_monitor_api_requests_total Dashboard API requests\n\
             # TYPE electrumx_monitor_api_requests_total counter\n\
             electrumx_monitor_api_requests_total {}\n\n",
            self.api_requests.load(Ordering::Relaxed)
        ));

        // Cache, one labelled series per tier
        let series = [
            ("cache_hits_total", "Requests served from a fresh cache entry"),
            ("cache_refreshes_total", "Acquisitions started"),
            ("cache_refresh_failures_total", "Acquisitions that produced nothing"),
            ("cache_stale_served_total", "Failed refreshes answered with stale data"),
        ];
        for (i, (name, help)) in series.iter().enumerate() {
            output.push_str(&format!(
                "# HELP electrumx_monitor_{name} {help}\n\
                 # TYPE electrumx_monitor_{name} counter\n"
            ));
            for tier in [Tier::Light, Tier::Heavy] {
                output.push_str(&format!(
                    "electrumx_monitor_{}{{tier=\"{}\"}} {}\n",
                    name,
                    tier.as_str(),
                    self.tier(tier).values()[i]
                ));
            }
            output.push('\n');
        }

        // Index server, as seen by each tier's latest snapshot
        let gauges = [
            ("active_servers", "Peers in the latest snapshot"),
            ("sessions", "Established client sessions"),
            ("index_uptime_seconds", "Index server uptime"),
        ];
        for (i, (name, help)) in gauges.iter().enumerate() {
            output.push_str(&format!(
                "# HELP electrumx_monitor_{name} {help}\n\
                 # TYPE electrumx_monitor_{name} gauge\n"
            ));
            for tier in [Tier::Light, Tier::Heavy] {
                output.push_str(&format!(
                    "electrumx_monitor_{}{{tier=\"{}\"}} {}\n",
                    name,
                    tier.as_str(),
                    self.tier(tier).gauges()[i]
                ));
            }
            output.push('\n');
        }

        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "api_requests": self.api_requests.load(Ordering::Relaxed),
            "cache": {
                "light": self.light.to_json(),
                "heavy": self.heavy.to_json(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerRecord;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.inc_hit(Tier::Light);
        metrics.inc_hit(Tier::Light);
        metrics.inc_refresh(Tier::Heavy);

        assert_eq!(metrics.light.hits.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.heavy.hits.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.heavy.refreshes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.inc_stale_served(Tier::Heavy);

        let mut stats = StatsSnapshot::default();
        stats.set_active_servers(vec![PeerRecord::advertised("a.example", Some(50001), None)]);
        stats.sessions = 12;
        metrics.observe_snapshot(Tier::Light, &stats);

        let output = metrics.to_prometheus();

        assert!(output.contains("electrumx_monitor_active_servers{tier=\"light\"} 1"));
        assert!(output.contains("electrumx_monitor_sessions{tier=\"light\"} 12"));
        assert!(output.contains("electrumx_monitor_active_servers{tier=\"heavy\"} 0"));
        assert!(output.contains("electrumx_monitor_cache_stale_served_total{tier=\"heavy\"} 1"));
        assert!(output.contains("electrumx_monitor_cache_stale_served_total{tier=\"light\"} 0"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        metrics.inc_failure(Tier::Light);
        metrics.inc_api_requests();

        let json = metrics.to_json();

        assert_eq!(json["cache"]["light"]["failures"], 1);
        assert_eq!(json["api_requests"], 1);
    }

    #[test]
    fn test_tier_gauges_do_not_overwrite_each_other() {
        let metrics = Metrics::new();

        let peers = |hosts: &[&str]| {
            hosts
                .iter()
                .map(|h| PeerRecord::advertised(*h, Some(50001), None))
                .collect::<Vec<_>>()
        };

        let mut heavy = StatsSnapshot::default();
        heavy.set_active_servers(peers(&["a.example", "b.example", "c.example"]));
        metrics.observe_snapshot(Tier::Heavy, &heavy);

        // A later light refresh must leave the heavy reading alone
        let mut light = StatsSnapshot::default();
        light.set_active_servers(peers(&["a.example"]));
        metrics.observe_snapshot(Tier::Light, &light);

        let output = metrics.to_prometheus();
        assert!(output.contains("electrumx_monitor_active_servers{tier=\"heavy\"} 3"));
        assert!(output.contains("electrumx_monitor_active_servers{tier=\"light\"} 1"));

        let json = metrics.to_json();
        assert_eq!(json["cache"]["heavy"]["index_server"]["active_servers"], 3);
        assert_eq!(json["cache"]["light"]["index_server"]["active_servers"], 1);
    }
}
