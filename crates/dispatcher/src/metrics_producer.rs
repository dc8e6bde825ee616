use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use relay_core::{config_keys as keys, IntentQueue, RuntimeConfig};
use relay_domain::{KeySpace, KvStore};
use relay_errors::RelayResult;

use crate::producer::IntentProducer;

/// 指标快照来源
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn collect(&self, now: DateTime<Utc>) -> RelayResult<Value>;
}

/// 默认来源：队列统计与关键运行参数
pub struct QueueMetricsSource {
    queue: IntentQueue,
    config: RuntimeConfig,
}

impl QueueMetricsSource {
    pub fn new(queue: IntentQueue, config: RuntimeConfig) -> Self {
        Self { queue, config }
    }
}

#[async_trait]
impl MetricsSource for QueueMetricsSource {
    async fn collect(&self, now: DateTime<Utc>) -> RelayResult<Value> {
        let stats = self.queue.stats().await?;

        metrics::gauge!("relay_queue_pending").set(stats.pending as f64);
        metrics::gauge!("relay_queue_inflight").set(stats.inflight as f64);
        metrics::gauge!("relay_queue_done").set(stats.done as f64);
        metrics::gauge!("relay_queue_error").set(stats.error as f64);
        metrics::gauge!("relay_locks_held").set(stats.locked as f64);

        Ok(json!({
            "ts": now.timestamp(),
            "queue": stats,
            "bucket_balance": self.config.get_u64(keys::BUCKET_BALANCE, 0).await?,
            "buyback_enabled": self.config.get_bool(keys::BUYBACK_ENABLED, false).await?,
            "buyback_last_run_ts": self.config.get_i64(keys::BUYBACK_LAST_RUN_TS, 0).await?,
            "creator_usdc_months_remaining": self
                .config
                .get_u32(keys::CREATOR_USDC_MONTHS_REMAINING, 0)
                .await?,
            "creator_inpi_months_remaining": self
                .config
                .get_u32(keys::CREATOR_INPI_MONTHS_REMAINING, 0)
                .await?,
        }))
    }
}

/// 指标生产者：写入 `metrics:latest`，失败时写 `metrics:error` 并吞掉错误
pub struct MetricsProducer {
    source: Arc<dyn MetricsSource>,
    store: Arc<dyn KvStore>,
    keys: KeySpace,
}

impl MetricsProducer {
    pub fn new(source: Arc<dyn MetricsSource>, store: Arc<dyn KvStore>, keys: KeySpace) -> Self {
        Self {
            source,
            store,
            keys,
        }
    }
}

#[async_trait]
impl IntentProducer for MetricsProducer {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn tick(&self, now: DateTime<Utc>) -> RelayResult<Vec<String>> {
        match self.source.collect(now).await {
            Ok(snapshot) => {
                self.store
                    .put(&self.keys.metrics_latest(), &snapshot.to_string(), None)
                    .await?;
                debug!("指标快照已更新");
            }
            Err(e) => {
                warn!("采集指标失败: {}", e);
                let marker = json!({ "ts": now.timestamp(), "error": e.to_string() });
                if let Err(store_err) = self
                    .store
                    .put(&self.keys.metrics_error(), &marker.to_string(), None)
                    .await
                {
                    warn!("写入指标错误标记失败: {}", store_err);
                }
            }
        }
        Ok(Vec::new())
    }
}

/// 读取最近一次快照
pub async fn latest_snapshot(store: &dyn KvStore, keys: &KeySpace) -> RelayResult<Option<Value>> {
    match store.get(&keys.metrics_latest()).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}
