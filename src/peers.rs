//! Peer Merge Engine
//!
//! Combines peer lists from several sources into one list keyed by host.
//! The first confident observation of a field wins; later sources only
//! fill gaps. Output order is first-seen order.

use serde_json::Value;
use std::collections::HashMap;

use crate::types::PeerRecord;

/// Merge `lists` in order, dropping empty hosts and `self_host`
pub fn merge_peers(lists: &[Vec<PeerRecord>], self_host: &str) -> Vec<PeerRecord> {
    let self_host = self_host.trim();
    let mut merged: Vec<PeerRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in lists.iter().flatten() {
        let host = record.host.trim();
        if host.is_empty() || host == self_host {
            continue;
        }

        match index.get(host) {
            Some(&i) => fill_gaps(&mut merged[i], record),
            None => {
                index.insert(host.to_string(), merged.len());
                merged.push(PeerRecord {
                    host: host.to_string(),
                    ..record.clone()
                });
            }
        }
    }

    merged
}

/// Copy fields `existing` lacks from `incoming`
fn fill_gaps(existing: &mut PeerRecord, incoming: &PeerRecord) {
    if existing.tcp_port.is_none() {
        existing.tcp_port = incoming.tcp_port;
    }
    if existing.ssl_port.is_none() {
        existing.ssl_port = incoming.ssl_port;
    }
    if existing.tcp_reachable.is_none() {
        existing.tcp_reachable = incoming.tcp_reachable;
    }
    if existing.ssl_reachable.is_none() {
        existing.ssl_reachable = incoming.ssl_reachable;
    }
}

/// Order-preserving de-duplication of an operator host list
pub fn dedup_hosts<S: AsRef<str>>(hosts: &[S]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    hosts
        .iter()
        .map(|h| h.as_ref().trim())
        .filter(|h| !h.is_empty())
        .filter(|h| seen.insert(h.to_string()))
        .map(str::to_string)
        .collect()
}

/// Port advertised by a feature tag such as `t50001` or `s50002`
///
/// A bare prefix (`t`, `s`) means the protocol's default port.
fn tag_port(tag: &str, prefix: char, default_port: u16) -> Option<u16> {
    let rest = tag.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some(default_port);
    }
    if !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Build records from a `server.peers.subscribe` result
///
/// Each entry is `[ip, host, [feature tags...]]`; entries of any other
/// shape are skipped.
pub fn parse_peers_subscribe(result: &Value, default_tcp: u16, default_ssl: u16) -> Vec<PeerRecord> {
    let Some(entries) = result.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let host = entry.get(1)?.as_str()?;
            let tags = entry.get(2).and_then(Value::as_array);

            let mut tcp_port = None;
            let mut ssl_port = None;
            for tag in tags.into_iter().flatten().filter_map(Value::as_str) {
                if tcp_port.is_none() {
                    tcp_port = tag_port(tag, 't', default_tcp);
                }
                if ssl_port.is_none() {
                    ssl_port = tag_port(tag, 's', default_ssl);
                }
            }

            Some(PeerRecord::advertised(host, tcp_port, ssl_port))
        })
        .collect()
}
