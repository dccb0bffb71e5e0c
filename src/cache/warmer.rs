//! Startup cache warming
//!
//! Fills the light tier, then the heavy tier, with forced refreshes so the
//! first dashboard request is answered from cache. Runs as a supervised
//! background task; a crash is logged and never reaches the API.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::StatsCache;
use crate::types::Tier;

/// Which tiers ended up populated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub light: bool,
    pub heavy: bool,
}

/// Warm both tiers in order, retrying each up to `attempts` times
pub async fn warm(cache: Arc<StatsCache>, attempts: u32, retry_delay: Duration) -> WarmReport {
    let mut report = WarmReport::default();

    for tier in [Tier::Light, Tier::Heavy] {
        let attempts = attempts.max(1);
        let mut warmed = false;

        for attempt in 1..=attempts {
            if cache.get(tier, true).await.is_some() {
                info!("🔥 {} cache warmed (attempt {}/{})", tier.as_str(), attempt, attempts);
                warmed = true;
                break;
            }

            warn!("{} cache warm-up attempt {}/{} failed", tier.as_str(), attempt, attempts);
            if attempt < attempts {
                tokio::time::sleep(retry_delay).await;
            }
        }

        match tier {
            Tier::Light => report.light = warmed,
            Tier::Heavy => report.heavy = warmed,
        }
    }

    report
}

/// Spawn [`warm`] under a supervisor that logs if it dies
pub fn spawn_warmer(cache: Arc<StatsCache>, attempts: u32, retry_delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::spawn(warm(cache, attempts, retry_delay)).await {
            Ok(report) if report.light && report.heavy => {}
            Ok(report) => warn!("Cache warm-up incomplete: {:?}", report),
            Err(e) => error!("❌ Cache warmer crashed: {}", e),
        }
    })
}
