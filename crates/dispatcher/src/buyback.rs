use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use relay_core::{config_keys as keys, IntentQueue, RuntimeConfig};
use relay_domain::{BuybackOrder, IntentPayload};
use relay_errors::RelayResult;

use crate::producer::IntentProducer;

pub const DEFAULT_COOLDOWN_MINUTES: u64 = 60;
pub const DEFAULT_TWAP_SLICES: u32 = 6;
pub const DEFAULT_SPLIT_BURN_BPS: u32 = 5_000;
pub const DEFAULT_SPLIT_LP_BPS: u32 = 5_000;

/// 读取一次的回购参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuybackSettings {
    pub enabled: bool,
    pub cooldown_minutes: u64,
    pub min_threshold_usdc: u64,
    pub twap_slices: u32,
    pub split_burn_bps: u32,
    pub split_lp_bps: u32,
    pub bucket_balance: u64,
    pub last_run_ts: i64,
}

impl BuybackSettings {
    pub async fn load(config: &RuntimeConfig) -> RelayResult<Self> {
        Ok(Self {
            enabled: config.get_bool(keys::BUYBACK_ENABLED, false).await?,
            cooldown_minutes: config
                .get_u64(keys::BUYBACK_COOLDOWN_MINUTES, DEFAULT_COOLDOWN_MINUTES)
                .await?,
            min_threshold_usdc: config.get_u64(keys::BUYBACK_MIN_THRESHOLD_USDC, 0).await?,
            twap_slices: config
                .get_u32(keys::BUYBACK_TWAP_SLICES, DEFAULT_TWAP_SLICES)
                .await?,
            split_burn_bps: config
                .get_u32(keys::BUYBACK_SPLIT_BURN_BPS, DEFAULT_SPLIT_BURN_BPS)
                .await?,
            split_lp_bps: config
                .get_u32(keys::BUYBACK_SPLIT_LP_BPS, DEFAULT_SPLIT_LP_BPS)
                .await?,
            bucket_balance: config.get_u64(keys::BUCKET_BALANCE, 0).await?,
            last_run_ts: config.get_i64(keys::BUYBACK_LAST_RUN_TS, 0).await?,
        })
    }

    /// 同一轮回购的去重标识：上次运行时间与待回购余额都未变化即视为同一轮
    pub fn run_id(&self) -> String {
        format!("buyback:{}:{}", self.last_run_ts, self.bucket_balance)
    }

    /// 启用、冷却期已过、余额达到阈值且大于0时触发
    pub fn should_trigger(&self, now_ts: i64) -> bool {
        let cooldown_secs = self.cooldown_minutes.saturating_mul(60);
        let elapsed = now_ts.saturating_sub(self.last_run_ts);
        self.enabled
            && elapsed >= 0
            && elapsed as u64 >= cooldown_secs
            && self.bucket_balance > 0
            && self.bucket_balance >= self.min_threshold_usdc
    }
}

/// 回购生产者：把桶内全部USDC转为一个TWAP回购意图
pub struct BuybackProducer {
    queue: IntentQueue,
    config: RuntimeConfig,
}

impl BuybackProducer {
    pub fn new(queue: IntentQueue, config: RuntimeConfig) -> Self {
        Self { queue, config }
    }
}

#[async_trait]
impl IntentProducer for BuybackProducer {
    fn name(&self) -> &str {
        "buyback"
    }

    async fn tick(&self, now: DateTime<Utc>) -> RelayResult<Vec<String>> {
        let settings = BuybackSettings::load(&self.config).await?;
        let now_ts = now.timestamp();
        if !settings.should_trigger(now_ts) {
            debug!(
                "回购未触发: enabled={}, balance={}, threshold={}, last_run_ts={}",
                settings.enabled,
                settings.bucket_balance,
                settings.min_threshold_usdc,
                settings.last_run_ts
            );
            return Ok(Vec::new());
        }

        let payload = IntentPayload::BuybackTwapAndLp(BuybackOrder {
            usdc: settings.bucket_balance,
            twap_slices: settings.twap_slices,
            split_burn_bps: settings.split_burn_bps,
            split_lp_bps: settings.split_lp_bps,
        });

        // 入队后才清零；上次中断时同一标识不会再次入队，只补完状态更新
        let outcome = self
            .queue
            .enqueue_once(&settings.run_id(), &payload)
            .await?;
        self.config.set(keys::BUCKET_BALANCE, 0).await?;
        self.config.set(keys::BUYBACK_LAST_RUN_TS, now_ts).await?;

        let key = outcome.intent().key.clone();
        if !outcome.is_new() {
            warn!("回购 {} 已在上次运行中入队，仅重置状态", key);
            return Ok(Vec::new());
        }
        info!(
            "回购意图已入队: key={}, usdc={}",
            key, settings.bucket_balance
        );
        Ok(vec![key])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use relay_config::QueueConfig;
    use relay_domain::{IntentKind, KeySpace, KvStore};
    use relay_infrastructure::InMemoryKvStore;
    use std::sync::Arc;

    async fn setup(values: &[(&str, &str)]) -> (BuybackProducer, IntentQueue, RuntimeConfig) {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let queue = IntentQueue::new(store.clone(), KeySpace::default(), QueueConfig::default());
        let config = RuntimeConfig::new(store, KeySpace::default());
        for (name, value) in values {
            config.set(name, value).await.unwrap();
        }
        (
            BuybackProducer::new(queue.clone(), config.clone()),
            queue,
            config,
        )
    }

    fn at(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).unwrap()
    }

    const READY: &[(&str, &str)] = &[
        (keys::BUYBACK_ENABLED, "true"),
        (keys::BUYBACK_COOLDOWN_MINUTES, "10"),
        (keys::BUYBACK_MIN_THRESHOLD_USDC, "1000"),
        (keys::BUCKET_BALANCE, "5000"),
        (keys::BUYBACK_LAST_RUN_TS, "0"),
        (keys::BUYBACK_TWAP_SLICES, "4"),
        (keys::BUYBACK_SPLIT_BURN_BPS, "3000"),
        (keys::BUYBACK_SPLIT_LP_BPS, "7000"),
    ];

    #[tokio::test]
    async fn test_trigger_enqueues_whole_balance_and_resets() {
        let (producer, queue, config) = setup(READY).await;
        let now = at(1_700_000_000);

        let keys_out = producer.tick(now).await.unwrap();
        assert_eq!(keys_out.len(), 1);

        let lease = queue.lease(None).await.unwrap().unwrap();
        assert_eq!(lease.intent.kind, IntentKind::BuybackTwapAndLp);
        assert_eq!(
            lease.intent.decode_payload().unwrap(),
            IntentPayload::BuybackTwapAndLp(BuybackOrder {
                usdc: 5000,
                twap_slices: 4,
                split_burn_bps: 3000,
                split_lp_bps: 7000,
            })
        );

        assert_eq!(config.get_u64(keys::BUCKET_BALANCE, 99).await.unwrap(), 0);
        assert_eq!(
            config.get_i64(keys::BUYBACK_LAST_RUN_TS, 0).await.unwrap(),
            now.timestamp()
        );
    }

    #[tokio::test]
    async fn test_rerun_after_crash_before_reset_does_not_double_spend() {
        let (producer, queue, config) = setup(READY).await;
        let now = at(1_700_000_000);
        assert_eq!(producer.tick(now).await.unwrap().len(), 1);
        queue.lease(None).await.unwrap().unwrap();

        // 模拟入队后、清零前崩溃
        config.set(keys::BUCKET_BALANCE, 5000).await.unwrap();
        config.set(keys::BUYBACK_LAST_RUN_TS, 0).await.unwrap();

        assert!(producer.tick(at(now.timestamp() + 30)).await.unwrap().is_empty());
        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.pending, stats.inflight), (0, 1));
        assert_eq!(config.get_u64(keys::BUCKET_BALANCE, 99).await.unwrap(), 0);
        assert_eq!(
            config.get_i64(keys::BUYBACK_LAST_RUN_TS, 0).await.unwrap(),
            now.timestamp() + 30
        );
    }

    #[tokio::test]
    async fn test_below_threshold_does_nothing() {
        let (producer, queue, config) = setup(READY).await;
        config.set(keys::BUCKET_BALANCE, 999).await.unwrap();

        assert!(producer.tick(at(1_700_000_000)).await.unwrap().is_empty());
        assert_eq!(queue.stats().await.unwrap().pending, 0);
        assert_eq!(config.get_u64(keys::BUCKET_BALANCE, 0).await.unwrap(), 999);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_second_run() {
        let (producer, queue, config) = setup(READY).await;
        let first = at(1_700_000_000);
        assert_eq!(producer.tick(first).await.unwrap().len(), 1);

        config.set(keys::BUCKET_BALANCE, 8000).await.unwrap();
        assert!(producer.tick(at(first.timestamp() + 599)).await.unwrap().is_empty());
        assert_eq!(producer.tick(at(first.timestamp() + 600)).await.unwrap().len(), 1);
        assert_eq!(queue.stats().await.unwrap().pending, 2);
    }

    #[tokio::test]
    async fn test_disabled_or_empty_bucket() {
        let (producer, _, config) = setup(READY).await;
        config.set(keys::BUYBACK_ENABLED, "false").await.unwrap();
        assert!(producer.tick(at(1_700_000_000)).await.unwrap().is_empty());

        config.set(keys::BUYBACK_ENABLED, "true").await.unwrap();
        config.set(keys::BUYBACK_MIN_THRESHOLD_USDC, 0).await.unwrap();
        config.set(keys::BUCKET_BALANCE, 0).await.unwrap();
        assert!(producer.tick(at(1_700_000_000)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_split_surfaces_as_error() {
        let (producer, queue, config) = setup(READY).await;
        config.set(keys::BUYBACK_SPLIT_LP_BPS, 9000).await.unwrap();

        assert!(producer.tick(at(1_700_000_000)).await.is_err());
        assert_eq!(queue.stats().await.unwrap().pending, 0);
        // 余额未被清零
        assert_eq!(config.get_u64(keys::BUCKET_BALANCE, 0).await.unwrap(), 5000);
    }
}
