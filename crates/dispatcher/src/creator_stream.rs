use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use relay_core::{config_keys as keys, IntentQueue, RuntimeConfig};
use relay_domain::{CreatorPayout, IntentKind, IntentPayload, BPS_DENOMINATOR};
use relay_errors::{RelayError, RelayResult};

use crate::producer::IntentProducer;

/// 支付周期：固定30天
pub const PAYOUT_PERIOD_SECS: i64 = 30 * 24 * 3600;

/// 单条支付流的当前状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    pub enabled: bool,
    pub amount: u64,
    pub next_due_ts: i64,
    pub months_remaining: u32,
}

impl StreamState {
    pub fn is_due(&self, now_ts: i64) -> bool {
        self.enabled && self.months_remaining > 0 && now_ts >= self.next_due_ts
    }
}

/// 两条支付流的参数键
#[derive(Debug, Clone, Copy)]
struct StreamKeys {
    kind: IntentKind,
    enabled: &'static str,
    next_due_ts: &'static str,
    months_remaining: &'static str,
}

const USDC_STREAM: StreamKeys = StreamKeys {
    kind: IntentKind::CreatorPayoutUsdc,
    enabled: keys::CREATOR_USDC_ENABLED,
    next_due_ts: keys::CREATOR_USDC_NEXT_DUE_TS,
    months_remaining: keys::CREATOR_USDC_MONTHS_REMAINING,
};

const INPI_STREAM: StreamKeys = StreamKeys {
    kind: IntentKind::CreatorPayoutInpi,
    enabled: keys::CREATOR_INPI_ENABLED,
    next_due_ts: keys::CREATOR_INPI_NEXT_DUE_TS,
    months_remaining: keys::CREATOR_INPI_MONTHS_REMAINING,
};

/// 按基点计算INPI数量：`total_supply * bps / 10_000`
pub fn inpi_amount(total_supply: u64, bps: u32) -> u64 {
    let amount = u128::from(total_supply) * u128::from(bps) / u128::from(BPS_DENOMINATOR);
    u64::try_from(amount).unwrap_or(u64::MAX)
}

/// 创作者月度支付生产者，USDC与INPI两条流互相独立
pub struct CreatorStreamProducer {
    queue: IntentQueue,
    config: RuntimeConfig,
}

impl CreatorStreamProducer {
    pub fn new(queue: IntentQueue, config: RuntimeConfig) -> Self {
        Self { queue, config }
    }

    async fn load_state(&self, stream: StreamKeys) -> RelayResult<StreamState> {
        let amount = match stream.kind {
            IntentKind::CreatorPayoutInpi => {
                let supply = self.config.get_u64(keys::TOTAL_SUPPLY, 0).await?;
                let bps = self.config.get_u32(keys::CREATOR_INPI_BPS, 0).await?;
                inpi_amount(supply, bps)
            }
            _ => self.config.get_u64(keys::CREATOR_USDC_MONTHLY, 0).await?,
        };
        Ok(StreamState {
            enabled: self.config.get_bool(stream.enabled, true).await?,
            amount,
            next_due_ts: self.config.get_i64(stream.next_due_ts, 0).await?,
            months_remaining: self.config.get_u32(stream.months_remaining, 0).await?,
        })
    }

    async fn evaluate(&self, stream: StreamKeys, now_ts: i64) -> RelayResult<Option<String>> {
        let state = self.load_state(stream).await?;
        if !state.is_due(now_ts) {
            debug!(
                "{} 未到期: months_remaining={}, next_due_ts={}",
                stream.kind, state.months_remaining, state.next_due_ts
            );
            return Ok(None);
        }

        let remaining = state.months_remaining - 1;
        let payout = CreatorPayout {
            amount: state.amount,
            due_ts: state.next_due_ts,
            months_remaining: remaining,
        };
        let payload = match stream.kind {
            IntentKind::CreatorPayoutInpi => IntentPayload::CreatorPayoutInpi(payout.clone()),
            _ => IntentPayload::CreatorPayoutUsdc(payout.clone()),
        };

        let dedupe_id = format!("creator:{}:{}", stream.kind, state.next_due_ts);
        let outcome = self.queue.enqueue_once(&dedupe_id, &payload).await?;

        // 按最初入队的那一期推进，重复运行得到相同的状态
        let applied = match outcome.intent().decode_payload()? {
            IntentPayload::CreatorPayoutUsdc(recorded)
            | IntentPayload::CreatorPayoutInpi(recorded) => recorded,
            _ => payout,
        };
        self.config
            .set(stream.months_remaining, applied.months_remaining)
            .await?;
        self.config
            .set(stream.next_due_ts, applied.due_ts + PAYOUT_PERIOD_SECS)
            .await?;

        let key = outcome.intent().key.clone();
        if !outcome.is_new() {
            warn!("{} 第 {} 期已入队 ({})，仅推进状态", stream.kind, applied.due_ts, key);
            return Ok(None);
        }
        info!(
            "{} 支付意图已入队: key={}, amount={}, 剩余{}期",
            stream.kind, key, applied.amount, applied.months_remaining
        );
        Ok(Some(key))
    }
}

#[async_trait]
impl IntentProducer for CreatorStreamProducer {
    fn name(&self) -> &str {
        "creator"
    }

    async fn tick(&self, now: DateTime<Utc>) -> RelayResult<Vec<String>> {
        let now_ts = now.timestamp();
        let mut enqueued = Vec::new();
        let mut errors = Vec::new();

        for stream in [USDC_STREAM, INPI_STREAM] {
            match self.evaluate(stream, now_ts).await {
                Ok(Some(key)) => enqueued.push(key),
                Ok(None) => {}
                Err(e) => {
                    warn!("{} 支付流评估失败: {}", stream.kind, e);
                    errors.push(format!("{}: {}", stream.kind, e));
                }
            }
        }

        if errors.is_empty() {
            Ok(enqueued)
        } else {
            Err(RelayError::internal(format!(
                "creator stream failures (enqueued {}): {}",
                enqueued.len(),
                errors.join("; ")
            )))
        }
    }
}
