//! Stats Acquisition
//!
//! Runs one full probe cycle against the index server and assembles a
//! [`StatsSnapshot`].
//!
//! ## Cycle
//!
//! 1. Own public address (excluded from the peer list)
//! 2. `server.features` over the index server's TCP port
//! 3. `server.peers.subscribe`
//! 4. Merge of the advertised peers
//! 5. Heavy tier only: supplemental hosts, then reachability backfill
//! 6. Discovery/announce flags
//! 7. Uptime, data size and session count
//!
//! Each step reports a `Result` internally; failures are logged and leave
//! the step's fields at their defaults. Nothing aborts the snapshot.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::peers::{dedup_hosts, merge_peers, parse_peers_subscribe};
use crate::ports::{resolve_service_ports, ServicePorts};
use crate::probe::{ProbeClient, ProbeError, Transport};
use crate::public_ip::detect_public_ip;
use crate::runtime::{uptime_secs, DockerRuntimeProbe, RuntimeError, RuntimeProbe, PAIR_SEPARATOR};
use crate::types::{PeerRecord, ServerFeatures, StatsSnapshot};

/// Reachability probes in flight at once during backfill
const MAX_CONCURRENT_PROBES: usize = 16;

/// Variables holding the index server's discovery settings
const PEER_DISCOVERY_VAR: &str = "PEER_DISCOVERY";
const PEER_ANNOUNCE_VAR: &str = "PEER_ANNOUNCE";

/// Why a single acquisition step produced no value
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("index server TCP port is unknown")]
    PortUnknown,

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Anything that can produce a snapshot for the cache
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// `None` only when no snapshot could be built at all
    async fn acquire(&self, include_supplemental_probes: bool) -> Option<StatsSnapshot>;
}

/// Reachability checks against arbitrary peers
#[async_trait]
pub trait PeerProber: Send + Sync {
    async fn probe_tcp(&self, host: &str, port: u16) -> bool;
    async fn probe_tls(&self, host: &str, port: u16) -> bool;
}

/// [`PeerProber`] that opens real sockets
pub struct SocketProber {
    client: ProbeClient,
    timeout: Duration,
}

impl SocketProber {
    pub fn new(client: ProbeClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl PeerProber for SocketProber {
    async fn probe_tcp(&self, host: &str, port: u16) -> bool {
        self.client.probe_tcp(host, port, self.timeout).await
    }

    async fn probe_tls(&self, host: &str, port: u16) -> bool {
        self.client.probe_tls(host, port, self.timeout).await
    }
}

/// Split a `discovery|announce` pair, defaulting each side to `unknown`
pub fn parse_flag_pair(raw: &str) -> (String, String) {
    let mut parts = raw.splitn(2, PAIR_SEPARATOR).map(str::trim);
    let mut side = || {
        parts
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string()
    };
    let discovery = side();
    let announce = side();
    (discovery, announce)
}

/// Orchestrates acquisition cycles
pub struct StatsCollector {
    config: Arc<MonitorConfig>,
    client: ProbeClient,
    prober: Arc<dyn PeerProber>,
    runtime: Arc<dyn RuntimeProbe>,
}

impl StatsCollector {
    pub fn new(
        config: Arc<MonitorConfig>,
        client: ProbeClient,
        prober: Arc<dyn PeerProber>,
        runtime: Arc<dyn RuntimeProbe>,
    ) -> Self {
        Self {
            config,
            client,
            prober,
            runtime,
        }
    }

    /// Collector wired to real sockets and the docker runtime
    pub fn from_config(config: Arc<MonitorConfig>) -> Result<Self, ProbeError> {
        let client = ProbeClient::from_config(&config)?;
        let prober = Arc::new(SocketProber::new(client.clone(), config.probe_timeout()));
        let runtime = Arc::new(DockerRuntimeProbe::new(&config));
        Ok(Self::new(config, client, prober, runtime))
    }

    /// Run one cycle. Individual failures only leave defaults behind.
    pub async fn collect(&self, include_supplemental_probes: bool) -> StatsSnapshot {
        let mut stats = StatsSnapshot::default();

        let ports = resolve_service_ports(self.runtime.as_ref(), &self.config.services_env_var).await;
        stats.tcp_port = ports.tcp;
        stats.ssl_port = ports.ssl;
        if ports.tcp.is_none() {
            warn!("Index server TCP port could not be resolved; protocol queries skipped");
        }

        // 1. Own address
        stats.server_ip = detect_public_ip(&self.config).await;

        // 2. Identity
        match self.fetch_features(ports.tcp).await {
            Ok(features) => stats.apply_features(&features),
            Err(e) => warn!("server.features failed: {}", e),
        }

        // 3. Advertised peers
        let advertised = match self.fetch_peers(ports.tcp).await {
            Ok(peers) => peers,
            Err(e) => {
                warn!("server.peers.subscribe failed: {}", e);
                Vec::new()
            }
        };

        // 4. Merge
        let mut servers = merge_peers(&[advertised], &stats.server_ip);

        // 5. Supplemental hosts and backfill
        if include_supplemental_probes {
            let supplemental = self.probe_supplemental_hosts(ports).await;
            servers = merge_peers(&[servers, supplemental], &stats.server_ip);
            self.backfill_reachability(&mut servers).await;
        }
        stats.set_active_servers(servers);

        // 6. Discovery flags
        match self
            .runtime
            .read_env_pair(PEER_DISCOVERY_VAR, PEER_ANNOUNCE_VAR)
            .await
        {
            Ok(raw) => {
                let (discovery, announce) = parse_flag_pair(&raw);
                stats.peer_discovery = discovery;
                stats.peer_announce = announce;
            }
            Err(e) => warn!("Discovery flags unavailable: {}", e),
        }

        // 7. Runtime metrics
        let (uptime, db_size, sessions) = tokio::join!(
            self.read_uptime(),
            self.runtime.data_directory_size(),
            self.read_sessions(ports.tcp),
        );
        stats.uptime = uptime.unwrap_or_else(|e| {
            warn!("Uptime unavailable: {}", e);
            0
        });
        stats.db_size = db_size.unwrap_or_else(|e| {
            warn!("Data directory size unavailable: {}", e);
            0
        });
        stats.sessions = sessions.unwrap_or_else(|e| {
            warn!("Session count unavailable: {}", e);
            0
        });

        stats
    }

    async fn fetch_features(&self, tcp_port: Option<u16>) -> Result<ServerFeatures, StepError> {
        let port = tcp_port.ok_or(StepError::PortUnknown)?;
        let result = self
            .client
            .query(
                Transport::Tcp,
                &self.config.index_host,
                port,
                "server.features",
                serde_json::json!([]),
                self.config.query_timeout(),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn fetch_peers(&self, tcp_port: Option<u16>) -> Result<Vec<PeerRecord>, StepError> {
        let port = tcp_port.ok_or(StepError::PortUnknown)?;
        let result = self
            .client
            .query(
                Transport::Tcp,
                &self.config.index_host,
                port,
                "server.peers.subscribe",
                serde_json::json!([]),
                self.config.query_timeout(),
            )
            .await?;
        Ok(parse_peers_subscribe(
            &result,
            self.config.default_tcp_port,
            self.config.default_ssl_port,
        ))
    }

    /// Probe operator hosts on the index server's ports; keep the reachable ones
    async fn probe_supplemental_hosts(&self, ports: ServicePorts) -> Vec<PeerRecord> {
        let hosts = dedup_hosts(&self.config.supplemental_hosts);
        if hosts.is_empty() {
            return Vec::new();
        }
        if ports.tcp.is_none() && ports.ssl.is_none() {
            warn!("No index server ports resolved; {} supplemental hosts skipped", hosts.len());
            return Vec::new();
        }

        let verdicts = self
            .probe_many(hosts.iter().map(|host| (host.clone(), ports.tcp, ports.ssl)).collect())
            .await;

        hosts
            .into_iter()
            .zip(verdicts)
            .filter_map(|(host, (tcp_ok, ssl_ok))| {
                let record = PeerRecord {
                    tcp_port: ports.tcp.filter(|_| tcp_ok == Some(true)),
                    ssl_port: ports.ssl.filter(|_| ssl_ok == Some(true)),
                    tcp_reachable: tcp_ok,
                    ssl_reachable: ssl_ok,
                    host,
                };
                if !record.is_reachable() {
                    debug!("Supplemental host {} unreachable", record.host);
                    return None;
                }
                Some(record)
            })
            .collect()
    }

    /// Probe every record still missing a verdict, on its known or default port
    async fn backfill_reachability(&self, servers: &mut [PeerRecord]) {
        let targets: Vec<_> = servers
            .iter()
            .map(|peer| {
                let tcp = peer
                    .tcp_reachable
                    .is_none()
                    .then(|| peer.tcp_port.unwrap_or(self.config.default_tcp_port));
                let ssl = peer
                    .ssl_reachable
                    .is_none()
                    .then(|| peer.ssl_port.unwrap_or(self.config.default_ssl_port));
                (peer.host.clone(), tcp, ssl)
            })
            .collect();
        let ports: Vec<_> = targets.iter().map(|(_, tcp, ssl)| (*tcp, *ssl)).collect();

        let verdicts = self.probe_many(targets).await;

        let outcomes = ports.into_iter().zip(verdicts);
        for (peer, ((tcp_port, ssl_port), (tcp_ok, ssl_ok))) in servers.iter_mut().zip(outcomes) {
            if let (Some(port), Some(ok)) = (tcp_port, tcp_ok) {
                peer.tcp_reachable = Some(ok);
                if ok {
                    peer.tcp_port = Some(port);
                }
            }
            if let (Some(port), Some(ok)) = (ssl_port, ssl_ok) {
                peer.ssl_reachable = Some(ok);
                if ok {
                    peer.ssl_port = Some(port);
                }
            }
        }
    }

    /// TCP and TLS verdicts per `(host, tcp_port, ssl_port)`, in input order
    ///
    /// A transport without a port is not probed and yields `None`.
    async fn probe_many(
        &self,
        targets: Vec<(String, Option<u16>, Option<u16>)>,
    ) -> Vec<(Option<bool>, Option<bool>)> {
        stream::iter(targets)
            .map(|(host, tcp_port, ssl_port)| probe_host(self.prober.clone(), host, tcp_port, ssl_port))
            .buffered(MAX_CONCURRENT_PROBES)
            .collect()
            .await
    }

    async fn read_uptime(&self) -> Result<u64, RuntimeError> {
        let started = self.runtime.process_start_time().await?;
        Ok(uptime_secs(started, chrono::Utc::now()))
    }

    async fn read_sessions(&self, tcp_port: Option<u16>) -> Result<u32, StepError> {
        let port = tcp_port.ok_or(StepError::PortUnknown)?;
        Ok(self.runtime.established_session_count(port).await?)
    }
}

async fn probe_host(
    prober: Arc<dyn PeerProber>,
    host: String,
    tcp_port: Option<u16>,
    ssl_port: Option<u16>,
) -> (Option<bool>, Option<bool>) {
    let tcp = async {
        match tcp_port {
            Some(port) => Some(prober.probe_tcp(&host, port).await),
            None => None,
        }
    };
    let ssl = async {
        match ssl_port {
            Some(port) => Some(prober.probe_tls(&host, port).await),
            None => None,
        }
    };
    tokio::join!(tcp, ssl)
}

#[async_trait]
impl StatsSource for StatsCollector {
    async fn acquire(&self, include_supplemental_probes: bool) -> Option<StatsSnapshot> {
        let stats = self.collect(include_supplemental_probes).await;
        info!(
            "📊 Acquired stats ({}): {}, {} active servers, {} sessions",
            if include_supplemental_probes { "heavy" } else { "light" },
            stats.server_version,
            stats.active_servers_count,
            stats.sessions
        );
        Some(stats)
    }
}
