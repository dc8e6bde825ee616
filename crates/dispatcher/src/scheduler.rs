use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use relay_config::{DispatcherConfig, ProducerSchedule, QueueConfig};
use relay_core::{DistributedLock, IntentQueue, RuntimeConfig};
use relay_domain::{KeySpace, KvStore};
use relay_errors::RelayResult;

use crate::buyback::BuybackProducer;
use crate::creator_stream::CreatorStreamProducer;
use crate::cron_utils::CronScheduler;
use crate::metrics_producer::{MetricsProducer, QueueMetricsSource};
use crate::producer::IntentProducer;
use crate::runner::{ProducerRunner, RunStatus};

struct ScheduledProducer {
    producer: Arc<dyn IntentProducer>,
    cron: CronScheduler,
}

/// 按CRON表达式驱动各生产者，每个生产者一个独立循环
pub struct ProducerScheduler {
    runner: ProducerRunner,
    jobs: Vec<Arc<ScheduledProducer>>,
}

impl ProducerScheduler {
    pub fn new(runner: ProducerRunner) -> Self {
        Self {
            runner,
            jobs: Vec::new(),
        }
    }

    /// 组装回购、创作者支付与指标三个生产者，跳过配置中禁用的
    pub fn from_config(
        store: Arc<dyn KvStore>,
        keys: KeySpace,
        queue_config: &QueueConfig,
        config: &DispatcherConfig,
        holder: &str,
    ) -> RelayResult<Self> {
        let queue = IntentQueue::new(store.clone(), keys.clone(), queue_config.clone());
        let runtime = RuntimeConfig::new(store.clone(), keys.clone());
        let runner = ProducerRunner::new(
            store.clone(),
            keys.clone(),
            DistributedLock::new(store.clone(), keys.clone(), holder),
            Duration::from_secs(config.lock_ttl_seconds),
            Duration::from_secs(config.error_marker_ttl_seconds),
        );

        let mut scheduler = Self::new(runner);
        let producers: [(&ProducerSchedule, Arc<dyn IntentProducer>); 3] = [
            (
                &config.buyback,
                Arc::new(BuybackProducer::new(queue.clone(), runtime.clone())),
            ),
            (
                &config.creator,
                Arc::new(CreatorStreamProducer::new(queue.clone(), runtime.clone())),
            ),
            (
                &config.metrics,
                Arc::new(MetricsProducer::new(
                    Arc::new(QueueMetricsSource::new(queue, runtime)),
                    store,
                    keys,
                )),
            ),
        ];

        for (schedule, producer) in producers {
            if schedule.enabled {
                scheduler.register(producer, &schedule.schedule)?;
            } else {
                info!("生产者 {} 已禁用", producer.name());
            }
        }
        Ok(scheduler)
    }

    pub fn register(&mut self, producer: Arc<dyn IntentProducer>, schedule: &str) -> RelayResult<()> {
        let cron = CronScheduler::new(schedule)?;
        info!(
            "注册生产者 {}: '{}' ({})",
            producer.name(),
            schedule,
            cron.get_frequency_description()
        );
        self.jobs.push(Arc::new(ScheduledProducer { producer, cron }));
        Ok(())
    }

    pub fn producer_names(&self) -> Vec<String> {
        self.jobs
            .iter()
            .map(|job| job.producer.name().to_string())
            .collect()
    }

    /// 立即按顺序执行所有生产者一次
    pub async fn run_all_once(&self) -> Vec<(String, RunStatus)> {
        let mut results = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            let status = self.runner.run_once(job.producer.as_ref(), Utc::now()).await;
            results.push((job.producer.name().to_string(), status));
        }
        results
    }

    /// 运行直到收到关闭信号；进行中的一次执行会先完成
    pub async fn run(self, shutdown: broadcast::Receiver<()>) {
        if self.jobs.is_empty() {
            warn!("没有启用的生产者，调度器空闲");
        }

        let mut tasks = JoinSet::new();
        for job in &self.jobs {
            tasks.spawn(run_job(
                self.runner.clone(),
                job.clone(),
                shutdown.resubscribe(),
            ));
        }
        drop(shutdown);

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("生产者循环异常退出: {}", e);
            }
        }
        info!("调度器已停止");
    }
}

async fn run_job(
    runner: ProducerRunner,
    job: Arc<ScheduledProducer>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let name = job.producer.name().to_string();
    info!("生产者 {} 循环启动", name);

    loop {
        let Some(wait) = job.cron.time_until_next_execution(Utc::now()) else {
            warn!("生产者 {} 无法计算下一次执行时间，退出", name);
            break;
        };
        let wait = wait.to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                runner.run_once(job.producer.as_ref(), Utc::now()).await;
            }
            _ = shutdown.recv() => {
                info!("生产者 {} 收到关闭信号", name);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::config_keys as keys;
    use relay_infrastructure::InMemoryKvStore;

    fn store() -> Arc<dyn KvStore> {
        Arc::new(InMemoryKvStore::new())
    }

    #[tokio::test]
    async fn test_from_config_skips_disabled_producers() {
        let mut config = DispatcherConfig::default();
        config.metrics.enabled = false;

        let scheduler = ProducerScheduler::from_config(
            store(),
            KeySpace::default(),
            &QueueConfig::default(),
            &config,
            "node-1",
        )
        .unwrap();
        assert_eq!(scheduler.producer_names(), vec!["buyback", "creator"]);
    }

    #[tokio::test]
    async fn test_invalid_schedule_is_rejected() {
        let mut config = DispatcherConfig::default();
        config.buyback.schedule = "every five minutes".to_string();
        let result = ProducerScheduler::from_config(
            store(),
            KeySpace::default(),
            &QueueConfig::default(),
            &config,
            "node-1",
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_all_once_enqueues_due_work() {
        let store = store();
        let runtime = RuntimeConfig::new(store.clone(), KeySpace::default());
        runtime.set(keys::BUYBACK_ENABLED, true).await.unwrap();
        runtime.set(keys::BUCKET_BALANCE, 100).await.unwrap();
        runtime.set(keys::CREATOR_USDC_MONTHLY, 10).await.unwrap();
        runtime
            .set(keys::CREATOR_USDC_MONTHS_REMAINING, 1)
            .await
            .unwrap();

        let scheduler = ProducerScheduler::from_config(
            store.clone(),
            KeySpace::default(),
            &QueueConfig::default(),
            &DispatcherConfig::default(),
            "node-1",
        )
        .unwrap();

        let results = scheduler.run_all_once().await;
        assert_eq!(results.len(), 3);
        for (_, status) in &results {
            assert!(matches!(status, RunStatus::Completed { .. }));
        }

        let queue = IntentQueue::new(store, KeySpace::default(), QueueConfig::default());
        assert_eq!(queue.stats().await.unwrap().pending, 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let scheduler = ProducerScheduler::from_config(
            store(),
            KeySpace::default(),
            &QueueConfig::default(),
            &DispatcherConfig::default(),
            "node-1",
        )
        .unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(scheduler.run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
