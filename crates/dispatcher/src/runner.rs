use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use relay_core::DistributedLock;
use relay_domain::{KeySpace, KvStore};

use crate::producer::IntentProducer;

/// 一次生产者运行的结果，错误已被吸收
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed { enqueued: Vec<String> },
    /// 锁被其他实例持有
    Skipped,
    Failed { error: String },
}

/// `jobs:error:<job>` 中保存的内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobErrorMarker {
    pub ts: i64,
    pub error: String,
}

/// 在分布式锁内执行生产者，并把失败记录为错误标记
#[derive(Clone)]
pub struct ProducerRunner {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    lock: DistributedLock,
    default_lock_ttl: Duration,
    error_marker_ttl: Duration,
}

impl ProducerRunner {
    pub fn new(
        store: Arc<dyn KvStore>,
        keys: KeySpace,
        lock: DistributedLock,
        default_lock_ttl: Duration,
        error_marker_ttl: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            lock,
            default_lock_ttl,
            error_marker_ttl,
        }
    }

    pub fn lock_name(producer: &dyn IntentProducer) -> String {
        format!("producer:{}", producer.name())
    }

    pub async fn run_once(&self, producer: &dyn IntentProducer, now: DateTime<Utc>) -> RunStatus {
        let name = producer.name().to_string();
        let ttl = producer.lock_ttl().unwrap_or(self.default_lock_ttl);
        let started = Instant::now();

        let result = self
            .lock
            .with_lock(&Self::lock_name(producer), ttl, producer.tick(now))
            .await;

        let status = match result {
            Ok(Some(Ok(enqueued))) => {
                if enqueued.is_empty() {
                    debug!("生产者 {} 本次无需入队", name);
                } else {
                    info!("生产者 {} 入队 {} 个意图", name, enqueued.len());
                }
                RunStatus::Completed { enqueued }
            }
            Ok(None) => {
                debug!("生产者 {} 的锁被其他实例持有，跳过", name);
                RunStatus::Skipped
            }
            Ok(Some(Err(e))) | Err(e) => {
                error!("生产者 {} 执行失败: {}", name, e);
                let error = e.to_string();
                self.record_error(&name, now, &error).await;
                RunStatus::Failed { error }
            }
        };

        let outcome = match &status {
            RunStatus::Completed { .. } => "completed",
            RunStatus::Skipped => "skipped",
            RunStatus::Failed { .. } => "failed",
        };
        metrics::counter!("relay_producer_runs_total", "producer" => name.clone(), "outcome" => outcome)
            .increment(1);
        metrics::histogram!("relay_producer_run_seconds", "producer" => name)
            .record(started.elapsed().as_secs_f64());
        status
    }

    async fn record_error(&self, job: &str, now: DateTime<Utc>, error: &str) {
        metrics::counter!("relay_producer_errors_total", "producer" => job.to_string()).increment(1);
        let marker = JobErrorMarker {
            ts: now.timestamp(),
            error: error.to_string(),
        };
        let encoded = match serde_json::to_string(&marker) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("序列化错误标记失败: {}", e);
                return;
            }
        };
        if let Err(e) = self
            .store
            .put(&self.keys.job_error(job), &encoded, Some(self.error_marker_ttl))
            .await
        {
            warn!("写入生产者 {} 的错误标记失败: {}", job, e);
        }
    }

    pub async fn last_error(&self, job: &str) -> Option<JobErrorMarker> {
        let raw = self.store.get(&self.keys.job_error(job)).await.ok()??;
        serde_json::from_str(&raw).ok()
    }
}
