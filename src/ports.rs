//! Service Port Resolver
//!
//! Finds the TCP/SSL ports the index server listens on from its
//! `SERVICES`-style variable (`tcp://host:port,ssl://host:port,...`).
//! The index server's own runtime context is authoritative; our own
//! environment is the fallback.

use tracing::debug;

use crate::runtime::RuntimeProbe;

/// Ports parsed from a service list; `None` means not advertised
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServicePorts {
    pub tcp: Option<u16>,
    pub ssl: Option<u16>,
}

/// Parse a comma-separated service list. Malformed tokens are ignored.
pub fn parse_services(raw: &str) -> ServicePorts {
    let mut ports = ServicePorts::default();

    for token in raw.split(',').map(str::trim) {
        let slot = if token.starts_with("tcp://") {
            &mut ports.tcp
        } else if token.starts_with("ssl://") {
            &mut ports.ssl
        } else {
            continue;
        };

        if slot.is_some() {
            continue;
        }

        *slot = token
            .rsplit_once(':')
            .and_then(|(_, port)| port.trim().parse::<u16>().ok());
    }

    ports
}

/// Resolve the index server's ports, primary source first
pub async fn resolve_service_ports(runtime: &dyn RuntimeProbe, var: &str) -> ServicePorts {
    match runtime.read_env(var).await {
        Ok(raw) if !raw.trim().is_empty() => return parse_services(&raw),
        Ok(_) => debug!("{} is empty in the index server context", var),
        Err(e) => debug!("Could not read {} from the index server context: {}", var, e),
    }

    std::env::var(var)
        .map(|raw| parse_services(&raw))
        .unwrap_or_default()
}
