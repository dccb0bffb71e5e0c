//! Protocol Probe Client
//!
//! Talks newline-delimited JSON-RPC to index servers over TCP or TLS.
//!
//! ## Operations
//!
//! - `probe_tcp` / `probe_tls`: send `server.version` and report whether a
//!   `result` came back. Every failure collapses to `false`.
//! - `query`: one request/response round trip returning the `result`
//!   value, used for `server.features` and `server.peers.subscribe`.
//!
//! Each operation runs under a single timeout covering connect, handshake,
//! write and all reads.

pub mod framing;
pub mod tls;

use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::config::MonitorConfig;

/// Read attempts allowed for a liveness probe
pub const PROBE_MAX_READS: usize = 6;

/// Read attempts allowed for a query (peer lists can span many segments)
pub const QUERY_MAX_READS: usize = 512;

/// Request id used for `server.version` probes
const VERSION_REQUEST_ID: u64 = 0;

/// Request id used for queries
const QUERY_REQUEST_ID: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connect(std::io::Error),

    #[error("timed out")]
    Timeout,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(std::io::Error),

    #[error("connection closed before a response arrived")]
    Closed,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("response too large ({0} bytes)")]
    TooLarge(usize),
}

/// Transport used to reach a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Tls,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Tls => write!(f, "ssl"),
        }
    }
}

/// JSON-RPC client for index servers
#[derive(Clone)]
pub struct ProbeClient {
    client_name: String,
    protocol_version: String,
    tls: TlsConnector,
}

impl ProbeClient {
    pub fn new(client_name: impl Into<String>, protocol_version: impl Into<String>) -> Result<Self, ProbeError> {
        Ok(Self {
            client_name: client_name.into(),
            protocol_version: protocol_version.into(),
            tls: tls::insecure_connector()?,
        })
    }

    pub fn from_config(config: &MonitorConfig) -> Result<Self, ProbeError> {
        Self::new(config.client_name.clone(), config.protocol_version.clone())
    }

    /// Whether `host:port` answers `server.version` over plain TCP
    pub async fn probe_tcp(&self, host: &str, port: u16, timeout: Duration) -> bool {
        self.probe(Transport::Tcp, host, port, timeout).await
    }

    /// Whether `host:port` answers `server.version` over TLS
    pub async fn probe_tls(&self, host: &str, port: u16, timeout: Duration) -> bool {
        self.probe(Transport::Tls, host, port, timeout).await
    }

    async fn probe(&self, transport: Transport, host: &str, port: u16, timeout: Duration) -> bool {
        let params = serde_json::json!([self.client_name, self.protocol_version]);
        let request = framing::request_line(VERSION_REQUEST_ID, "server.version", params);

        match self.round_trip(transport, host, port, &request, PROBE_MAX_READS, timeout).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Probe {}://{}:{} failed: {}", transport, host, port, e);
                false
            }
        }
    }

    /// Issue `method` and return its `result`
    pub async fn query(
        &self,
        transport: Transport,
        host: &str,
        port: u16,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ProbeError> {
        let request = framing::request_line(QUERY_REQUEST_ID, method, params);
        self.round_trip(transport, host, port, &request, QUERY_MAX_READS, timeout).await
    }

    async fn round_trip(
        &self,
        transport: Transport,
        host: &str,
        port: u16,
        request: &[u8],
        max_reads: usize,
        timeout: Duration,
    ) -> Result<Value, ProbeError> {
        let attempt = async {
            let stream = TcpStream::connect((host, port))
                .await
                .map_err(ProbeError::Connect)?;

            match transport {
                Transport::Tcp => {
                    let mut stream = stream;
                    framing::exchange(&mut stream, request, max_reads).await
                }
                Transport::Tls => {
                    let mut stream = tls::handshake(&self.tls, host, stream).await?;
                    framing::exchange(&mut stream, request, max_reads).await
                }
            }
        };

        tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| ProbeError::Timeout)?
    }
}
