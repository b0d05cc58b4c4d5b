// ============================================
// Redis-backed Statistics Store
// ============================================
//
// One hash row per item:
//   item_stats:{item_id} -> { impressions, clicks, likes,
//                             debiased_impressions, debiased_clicks,
//                             last_event_at (unix millis) }
//
// `record` runs a single Lua script so the whole multi-field update is
// atomic on the server, which gives per-item linearizability across any
// number of writer processes. `get_many` pipelines HGETALLs into one round
// trip.

use super::StatisticsStore;
use crate::error::{Result, SearchError};
use crate::models::{FeedbackAction, GlobalStatistics, ItemStatistics};
use crate::services::position_bias::PositionBiasModel;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;

const KEY_PREFIX: &str = "item_stats";
const SCAN_CHUNK: usize = 200;

const RECORD_SCRIPT: &str = r#"
local key = KEYS[1]
redis.call('HINCRBY', key, 'impressions', ARGV[1])
redis.call('HINCRBY', key, 'clicks', ARGV[2])
redis.call('HINCRBY', key, 'likes', ARGV[3])
redis.call('HINCRBYFLOAT', key, 'debiased_impressions', ARGV[4])
redis.call('HINCRBYFLOAT', key, 'debiased_clicks', ARGV[5])
local last = redis.call('HGET', key, 'last_event_at')
if (not last) or tonumber(ARGV[6]) > tonumber(last) then
  redis.call('HSET', key, 'last_event_at', ARGV[6])
end
return redis.status_reply('OK')
"#;

pub struct RedisStatisticsStore {
    client: redis::Client,
    bias: PositionBiasModel,
    record_script: Script,
}

impl RedisStatisticsStore {
    pub fn new(client: redis::Client, bias: PositionBiasModel) -> Self {
        Self {
            client,
            bias,
            record_script: Script::new(RECORD_SCRIPT),
        }
    }

    pub fn open(url: &str, bias: PositionBiasModel) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| SearchError::ConfigurationInvalid(format!("invalid redis url: {}", e)))?;
        Ok(Self::new(client, bias))
    }

    fn key(item_id: &str) -> String {
        format!("{}:{}", KEY_PREFIX, item_id)
    }

    async fn connection(&self) -> std::result::Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn parse_row(fields: &HashMap<String, String>) -> ItemStatistics {
        let parse_u64 = |name: &str| {
            fields
                .get(name)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        };
        let parse_f64 = |name: &str| {
            fields
                .get(name)
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0)
        };
        let last_event_at = fields
            .get("last_event_at")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        ItemStatistics {
            impression_count: parse_u64("impressions"),
            click_count: parse_u64("clicks"),
            like_count: parse_u64("likes"),
            debiased_impressions: parse_f64("debiased_impressions"),
            debiased_clicks: parse_f64("debiased_clicks"),
            last_event_at,
        }
    }

    async fn fetch_rows(
        &self,
        conn: &mut MultiplexedConnection,
        keys: &[String],
    ) -> std::result::Result<Vec<HashMap<String, String>>, redis::RedisError> {
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.hgetall(key);
        }
        pipe.query_async(conn).await
    }
}

#[async_trait]
impl StatisticsStore for RedisStatisticsStore {
    async fn record(
        &self,
        item_id: &str,
        action: FeedbackAction,
        rank: u32,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let weight = self.bias.weight(rank);
        let (impressions, clicks, likes, debiased_impressions, debiased_clicks) = match action {
            FeedbackAction::Impression | FeedbackAction::Skip => (1i64, 0i64, 0i64, weight, 0.0),
            FeedbackAction::Click => (0, 1, 0, 0.0, weight),
            FeedbackAction::Like => (0, 0, 1, 0.0, 0.0),
        };

        let mut conn = self
            .connection()
            .await
            .map_err(|e| SearchError::StatisticsWriteFailed(e.to_string()))?;

        let _: () = self
            .record_script
            .key(Self::key(item_id))
            .arg(impressions)
            .arg(clicks)
            .arg(likes)
            .arg(debiased_impressions)
            .arg(debiased_clicks)
            .arg(timestamp.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| SearchError::StatisticsWriteFailed(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, item_id: &str) -> Result<ItemStatistics> {
        let mut conn = self
            .connection()
            .await
            .map_err(|e| SearchError::StatisticsReadFailed(e.to_string()))?;

        let fields: HashMap<String, String> = conn
            .hgetall(Self::key(item_id))
            .await
            .map_err(|e| SearchError::StatisticsReadFailed(e.to_string()))?;

        Ok(Self::parse_row(&fields))
    }

    async fn get_many(&self, item_ids: &[String]) -> Result<HashMap<String, ItemStatistics>> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut conn = self
            .connection()
            .await
            .map_err(|e| SearchError::StatisticsReadFailed(e.to_string()))?;

        let keys: Vec<String> = item_ids.iter().map(|id| Self::key(id)).collect();
        let rows = self
            .fetch_rows(&mut conn, &keys)
            .await
            .map_err(|e| SearchError::StatisticsReadFailed(e.to_string()))?;

        Ok(item_ids
            .iter()
            .zip(rows.iter())
            .filter(|(_, fields)| !fields.is_empty())
            .map(|(id, fields)| (id.clone(), Self::parse_row(fields)))
            .collect())
    }

    async fn remove(&self, item_id: &str) -> Result<()> {
        let mut conn = self
            .connection()
            .await
            .map_err(|e| SearchError::StatisticsWriteFailed(e.to_string()))?;

        let _: () = conn
            .del(Self::key(item_id))
            .await
            .map_err(|e| SearchError::StatisticsWriteFailed(e.to_string()))?;
        Ok(())
    }

    async fn global_stats(&self) -> Result<GlobalStatistics> {
        let mut conn = self
            .connection()
            .await
            .map_err(|e| SearchError::StatisticsReadFailed(e.to_string()))?;

        let mut keys: Vec<String> = Vec::new();
        {
            let mut iter: redis::AsyncIter<String> = conn
                .scan_match(format!("{}:*", KEY_PREFIX))
                .await
                .map_err(|e| SearchError::StatisticsReadFailed(e.to_string()))?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        let mut global = GlobalStatistics {
            total_items: keys.len() as u64,
            ..Default::default()
        };

        for chunk in keys.chunks(SCAN_CHUNK) {
            let rows = self
                .fetch_rows(&mut conn, chunk)
                .await
                .map_err(|e| SearchError::StatisticsReadFailed(e.to_string()))?;
            for fields in &rows {
                let stats = Self::parse_row(fields);
                global.total_impressions += stats.impression_count;
                global.total_clicks += stats.click_count;
            }
        }

        global.global_ctr = if global.total_impressions > 0 {
            global.total_clicks as f64 / global.total_impressions as f64
        } else {
            0.0
        };
        Ok(global)
    }
}
