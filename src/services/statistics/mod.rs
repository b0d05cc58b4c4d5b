// ============================================
// Statistics Store
// ============================================
//
// The only mutable shared state in the serving path: per-item impression and
// click counters plus their IPW-debiased companions. `record` is linearizable
// per item; concurrent writers for the same item converge to the same final
// state as some serial order of those writes. There is no ordering guarantee
// across items.
//
// Backings:
//   - MemoryStatisticsStore: in-process map, default for serving and tests
//   - RedisStatisticsStore:  hash row per item, atomic Lua update

pub mod redis;

pub use self::redis::RedisStatisticsStore;

use crate::error::Result;
use crate::models::{FeedbackAction, GlobalStatistics, ItemStatistics};
use crate::services::position_bias::PositionBiasModel;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait StatisticsStore: Send + Sync {
    /// Atomically apply one feedback event to the item's row, creating the
    /// row on first contact. Clicks do not imply impressions; ingest sends
    /// both events. Skips count as examinations (impressions), likes only
    /// bump their own counter.
    async fn record(
        &self,
        item_id: &str,
        action: FeedbackAction,
        rank: u32,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Snapshot of one item's row; zeroed statistics for unknown items.
    async fn get(&self, item_id: &str) -> Result<ItemStatistics>;

    /// Batched snapshot: one read amplification unit, not N. Items without a
    /// row are simply absent from the map.
    async fn get_many(&self, item_ids: &[String]) -> Result<HashMap<String, ItemStatistics>>;

    /// Delete an item's row, atomically with catalog removal.
    async fn remove(&self, item_id: &str) -> Result<()>;

    /// Catalog-wide aggregates.
    async fn global_stats(&self) -> Result<GlobalStatistics>;
}

pub(crate) fn apply_event(
    stats: &mut ItemStatistics,
    action: FeedbackAction,
    weight: f64,
    timestamp: DateTime<Utc>,
) {
    match action {
        FeedbackAction::Impression | FeedbackAction::Skip => {
            stats.impression_count += 1;
            stats.debiased_impressions += weight;
        }
        FeedbackAction::Click => {
            stats.click_count += 1;
            stats.debiased_clicks += weight;
        }
        FeedbackAction::Like => {
            stats.like_count += 1;
        }
    }
    stats.last_event_at = match stats.last_event_at {
        Some(existing) => Some(existing.max(timestamp)),
        None => Some(timestamp),
    };
}

/// In-process store. The write lock serializes updates, which trivially
/// satisfies per-item linearizability; reads clone row snapshots so no field
/// tearing is observable.
pub struct MemoryStatisticsStore {
    rows: RwLock<HashMap<String, ItemStatistics>>,
    bias: PositionBiasModel,
}

impl MemoryStatisticsStore {
    pub fn new(bias: PositionBiasModel) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            bias,
        }
    }
}

impl Default for MemoryStatisticsStore {
    fn default() -> Self {
        Self::new(PositionBiasModel::default())
    }
}

#[async_trait]
impl StatisticsStore for MemoryStatisticsStore {
    async fn record(
        &self,
        item_id: &str,
        action: FeedbackAction,
        rank: u32,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let weight = self.bias.weight(rank);
        let mut rows = self.rows.write().await;
        let stats = rows.entry(item_id.to_string()).or_default();
        apply_event(stats, action, weight, timestamp);
        Ok(())
    }

    async fn get(&self, item_id: &str) -> Result<ItemStatistics> {
        let rows = self.rows.read().await;
        Ok(rows.get(item_id).cloned().unwrap_or_default())
    }

    async fn get_many(&self, item_ids: &[String]) -> Result<HashMap<String, ItemStatistics>> {
        let rows = self.rows.read().await;
        Ok(item_ids
            .iter()
            .filter_map(|id| rows.get(id).map(|stats| (id.clone(), stats.clone())))
            .collect())
    }

    async fn remove(&self, item_id: &str) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.remove(item_id);
        Ok(())
    }

    async fn global_stats(&self) -> Result<GlobalStatistics> {
        let rows = self.rows.read().await;
        let total_items = rows.len() as u64;
        let total_impressions: u64 = rows.values().map(|s| s.impression_count).sum();
        let total_clicks: u64 = rows.values().map(|s| s.click_count).sum();
        let global_ctr = if total_impressions > 0 {
            total_clicks as f64 / total_impressions as f64
        } else {
            0.0
        };
        Ok(GlobalStatistics {
            total_items,
            total_impressions,
            total_clicks,
            global_ctr,
        })
    }
}
