//! Tiered Stats Cache
//!
//! Two independent entries, light and heavy, each refreshed on demand when
//! its TTL lapses. A refresh holds the tier's lock for the whole
//! acquisition, so concurrent callers on a cold tier share one cycle
//! instead of starting their own. The refresh task owns that lock and
//! stores its result even after the caller is gone. A failed refresh
//! serves the previous snapshot when there is one.

pub mod warmer;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::api::Metrics;
use crate::config::MonitorConfig;
use crate::stats::StatsSource;
use crate::types::{StatsSnapshot, Tier};

pub use warmer::spawn_warmer;

/// Time-to-live per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub light_ttl: Duration,
    pub heavy_ttl: Duration,

    /// Heavy TTL while the cached snapshot lists no servers
    pub empty_heavy_ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            light_ttl: Duration::from_secs(60),
            heavy_ttl: Duration::from_secs(120),
            empty_heavy_ttl: Duration::from_secs(15),
        }
    }
}

impl CachePolicy {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            light_ttl: Duration::from_secs(config.light_ttl_secs),
            heavy_ttl: Duration::from_secs(config.heavy_ttl_secs),
            empty_heavy_ttl: Duration::from_secs(config.empty_heavy_ttl_secs),
        }
    }

    /// TTL that applies to `stats` cached under `tier`
    pub fn ttl_for(&self, tier: Tier, stats: &StatsSnapshot) -> Duration {
        match tier {
            Tier::Light => self.light_ttl,
            Tier::Heavy if stats.active_servers_count == 0 => self.empty_heavy_ttl,
            Tier::Heavy => self.heavy_ttl,
        }
    }
}

/// One tier's slot
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    /// When `stats` was stored; `None` until the first success
    pub fetched_at: Option<Instant>,
    pub stats: Option<StatsSnapshot>,
}

impl CacheEntry {
    /// The cached snapshot if it is younger than its TTL
    fn fresh(&self, tier: Tier, policy: &CachePolicy) -> Option<&StatsSnapshot> {
        let fetched_at = self.fetched_at?;
        let stats = self.stats.as_ref()?;
        (fetched_at.elapsed() < policy.ttl_for(tier, stats)).then_some(stats)
    }
}

/// Stats cache in front of an acquisition source
pub struct StatsCache {
    source: Arc<dyn StatsSource>,
    policy: CachePolicy,
    light: Arc<Mutex<CacheEntry>>,
    heavy: Arc<Mutex<CacheEntry>>,
    metrics: Arc<Metrics>,
}

impl StatsCache {
    pub fn new(source: Arc<dyn StatsSource>, policy: CachePolicy, metrics: Arc<Metrics>) -> Self {
        Self {
            source,
            policy,
            light: Arc::new(Mutex::new(CacheEntry::default())),
            heavy: Arc::new(Mutex::new(CacheEntry::default())),
            metrics,
        }
    }

    fn slot(&self, tier: Tier) -> &Arc<Mutex<CacheEntry>> {
        match tier {
            Tier::Light => &self.light,
            Tier::Heavy => &self.heavy,
        }
    }

    /// Snapshot for `tier`, refreshing when stale or when `force_refresh`
    ///
    /// Returns an owned copy. `None` only when nothing was ever acquired
    /// for this tier. The refresh runs in its own task holding the tier's
    /// lock, so a caller that gives up waiting does not lose the result.
    pub async fn get(&self, tier: Tier, force_refresh: bool) -> Option<StatsSnapshot> {
        let entry = self.slot(tier).clone().lock_owned().await;

        if !force_refresh {
            if let Some(stats) = entry.fresh(tier, &self.policy) {
                self.metrics.inc_hit(tier);
                return Some(stats.clone());
            }
        }

        self.metrics.inc_refresh(tier);
        debug!("Refreshing {} stats (forced: {})", tier.as_str(), force_refresh);

        let refresh = tokio::spawn(refresh_slot(
            entry,
            self.source.clone(),
            self.metrics.clone(),
            tier,
        ));

        match refresh.await {
            Ok(result) => result,
            Err(e) => {
                error!("❌ {} refresh task aborted: {}", tier.as_str(), e);
                None
            }
        }
    }

    /// Current entry for `tier`, without refreshing
    #[cfg(test)]
    pub async fn peek(&self, tier: Tier) -> CacheEntry {
        self.slot(tier).lock().await.clone()
    }
}

/// Acquire into a locked slot; stores the result or falls back to the stale one
async fn refresh_slot(
    mut entry: OwnedMutexGuard<CacheEntry>,
    source: Arc<dyn StatsSource>,
    metrics: Arc<Metrics>,
    tier: Tier,
) -> Option<StatsSnapshot> {
    match acquire(source, tier).await {
        Some(stats) => {
            metrics.observe_snapshot(tier, &stats);
            entry.fetched_at = Some(Instant::now());
            entry.stats = Some(stats.clone());
            Some(stats)
        }
        None => {
            metrics.inc_failure(tier);
            match &entry.stats {
                Some(stale) => {
                    warn!("{} refresh failed, serving previous snapshot", tier.as_str());
                    metrics.inc_stale_served(tier);
                    Some(stale.clone())
                }
                None => {
                    warn!("{} refresh failed and nothing is cached", tier.as_str());
                    None
                }
            }
        }
    }
}

/// Run acquisition in its own task; a panic there counts as a failure
async fn acquire(source: Arc<dyn StatsSource>, tier: Tier) -> Option<StatsSnapshot> {
    let include = tier.includes_supplemental_probes();

    match tokio::spawn(async move { source.acquire(include).await }).await {
        Ok(result) => result,
        Err(e) => {
            error!("❌ {} acquisition aborted: {}", tier.as_str(), e);
            None
        }
    }
}
