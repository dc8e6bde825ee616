use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_errors::{RelayError, RelayResult};

/// 基点分母
pub const BPS_DENOMINATOR: u64 = 10_000;

/// 意图类型（封闭集合），每种类型对应Worker侧唯一的外部操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentKind {
    /// TWAP分批回购，按比例销毁并注入流动性
    BuybackTwapAndLp,
    CreatorPayoutUsdc,
    CreatorPayoutInpi,
    /// 端到端探测，不产生任何外部副作用
    Ping,
}

impl IntentKind {
    pub const ALL: [IntentKind; 4] = [
        IntentKind::BuybackTwapAndLp,
        IntentKind::CreatorPayoutUsdc,
        IntentKind::CreatorPayoutInpi,
        IntentKind::Ping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::BuybackTwapAndLp => "BUYBACK_TWAP_AND_LP",
            IntentKind::CreatorPayoutUsdc => "CREATOR_PAYOUT_USDC",
            IntentKind::CreatorPayoutInpi => "CREATOR_PAYOUT_INPI",
            IntentKind::Ping => "PING",
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IntentKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RelayError::validation(format!("未知的意图类型: {s}")))
    }
}

/// 回购指令
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuybackOrder {
    /// 本次回购使用的全部USDC（桶余额）
    pub usdc: u64,
    pub twap_slices: u32,
    pub split_burn_bps: u32,
    pub split_lp_bps: u32,
}

/// 创作者月度支付
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatorPayout {
    pub amount: u64,
    /// 本期应付时间（Unix秒）
    pub due_ts: i64,
    /// 本期发放后剩余期数
    pub months_remaining: u32,
}

/// 按类型区分的意图负载，入队与分发时都会校验
#[derive(Debug, Clone, PartialEq)]
pub enum IntentPayload {
    BuybackTwapAndLp(BuybackOrder),
    CreatorPayoutUsdc(CreatorPayout),
    CreatorPayoutInpi(CreatorPayout),
    Ping(serde_json::Map<String, Value>),
}

impl IntentPayload {
    pub fn kind(&self) -> IntentKind {
        match self {
            IntentPayload::BuybackTwapAndLp(_) => IntentKind::BuybackTwapAndLp,
            IntentPayload::CreatorPayoutUsdc(_) => IntentKind::CreatorPayoutUsdc,
            IntentPayload::CreatorPayoutInpi(_) => IntentKind::CreatorPayoutInpi,
            IntentPayload::Ping(_) => IntentKind::Ping,
        }
    }

    pub fn validate(&self) -> RelayResult<()> {
        match self {
            IntentPayload::BuybackTwapAndLp(order) => {
                if order.usdc == 0 {
                    return Err(RelayError::validation("buyback usdc must be greater than 0"));
                }
                if order.twap_slices == 0 {
                    return Err(RelayError::validation(
                        "buyback twap_slices must be greater than 0",
                    ));
                }
                let split = u64::from(order.split_burn_bps) + u64::from(order.split_lp_bps);
                if split > BPS_DENOMINATOR {
                    return Err(RelayError::validation(format!(
                        "buyback split_burn_bps + split_lp_bps must not exceed {BPS_DENOMINATOR}, got {split}"
                    )));
                }
                Ok(())
            }
            IntentPayload::CreatorPayoutUsdc(payout) | IntentPayload::CreatorPayoutInpi(payout) => {
                if payout.amount == 0 {
                    return Err(RelayError::validation("payout amount must be greater than 0"));
                }
                Ok(())
            }
            IntentPayload::Ping(_) => Ok(()),
        }
    }

    pub fn to_value(&self) -> RelayResult<Value> {
        let value = match self {
            IntentPayload::BuybackTwapAndLp(order) => serde_json::to_value(order)?,
            IntentPayload::CreatorPayoutUsdc(payout) | IntentPayload::CreatorPayoutInpi(payout) => {
                serde_json::to_value(payout)?
            }
            IntentPayload::Ping(map) => Value::Object(map.clone()),
        };
        Ok(value)
    }

    /// 从存储/传输形式还原并校验负载
    pub fn from_parts(kind: IntentKind, payload: &Value) -> RelayResult<Self> {
        let decoded = match kind {
            IntentKind::BuybackTwapAndLp => {
                IntentPayload::BuybackTwapAndLp(decode_payload(kind, payload)?)
            }
            IntentKind::CreatorPayoutUsdc => {
                IntentPayload::CreatorPayoutUsdc(decode_payload(kind, payload)?)
            }
            IntentKind::CreatorPayoutInpi => {
                IntentPayload::CreatorPayoutInpi(decode_payload(kind, payload)?)
            }
            IntentKind::Ping => match payload {
                Value::Object(map) => IntentPayload::Ping(map.clone()),
                Value::Null => IntentPayload::Ping(serde_json::Map::new()),
                _ => return Err(RelayError::validation("PING payload must be an object")),
            },
        };
        decoded.validate()?;
        Ok(decoded)
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(kind: IntentKind, payload: &Value) -> RelayResult<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| RelayError::validation(format!("invalid {kind} payload: {e}")))
}

/// 一条待执行的链下操作意图，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub key: String,
    pub kind: IntentKind,
    pub payload: Value,
    pub created_ts: i64,
}

impl Intent {
    pub fn new(key: String, payload: &IntentPayload, created_ts: i64) -> RelayResult<Self> {
        Ok(Self {
            key,
            kind: payload.kind(),
            payload: payload.to_value()?,
            created_ts,
        })
    }

    pub fn decode_payload(&self) -> RelayResult<IntentPayload> {
        IntentPayload::from_parts(self.kind, &self.payload)
    }
}

/// 租约：Worker对意图的限时独占
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub lease_key: String,
    pub intent: Intent,
    pub leased_ts: i64,
    pub ttl_secs: u64,
}

impl Lease {
    pub fn expires_ts(&self) -> i64 {
        self.leased_ts + self.ttl_secs as i64
    }
}

/// Worker上报的执行结果
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Success(Value),
    Failure(String),
}

impl CompletionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CompletionOutcome::Success(_))
    }
}

/// 完成记录，`result` 与 `error` 恰有一个
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneRecord {
    pub lease_key: String,
    pub intent_key: String,
    pub kind: IntentKind,
    pub finished_ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DoneRecord {
    pub fn new(lease: &Lease, outcome: CompletionOutcome, finished_ts: i64) -> Self {
        let (result, error) = match outcome {
            CompletionOutcome::Success(value) => (Some(value), None),
            CompletionOutcome::Failure(message) => (None, Some(message)),
        };
        Self {
            lease_key: lease.lease_key.clone(),
            intent_key: lease.intent.key.clone(),
            kind: lease.intent.kind,
            finished_ts,
            result,
            error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// 按去重标识入队时写入的标记
///
/// `committed` 在意图写入成功后置为 `true`；为 `false` 说明上次可能在写入意图前中断。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueMarker {
    pub intent: Intent,
    pub committed: bool,
}

/// `enqueue_once` 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Enqueued(Intent),
    /// 同一标识此前已入队，携带最初的意图
    AlreadyEnqueued(Intent),
}

impl EnqueueOutcome {
    pub fn intent(&self) -> &Intent {
        match self {
            EnqueueOutcome::Enqueued(intent) | EnqueueOutcome::AlreadyEnqueued(intent) => intent,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, EnqueueOutcome::Enqueued(_))
    }
}

/// `complete` 的两种成功结果；未找到租约以 `RelayError::NotFound` 返回
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteOutcome {
    Completed { done_key: String },
    /// 幂等重放，未产生任何副作用
    Idempotent,
}

/// 各生命周期阶段的键数量，仅用于观测
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub inflight: u64,
    pub done: u64,
    pub error: u64,
    pub locked: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intent_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(IntentKind::BuybackTwapAndLp).unwrap(),
            json!("BUYBACK_TWAP_AND_LP")
        );
        assert_eq!("PING".parse::<IntentKind>().unwrap(), IntentKind::Ping);
        assert!("SWAP".parse::<IntentKind>().is_err());
    }

    #[test]
    fn test_buyback_validation() {
        let mut order = BuybackOrder {
            usdc: 5000,
            twap_slices: 6,
            split_burn_bps: 5000,
            split_lp_bps: 5000,
        };
        assert!(IntentPayload::BuybackTwapAndLp(order.clone()).validate().is_ok());

        order.split_lp_bps = 5001;
        assert!(IntentPayload::BuybackTwapAndLp(order.clone()).validate().is_err());

        order.split_lp_bps = 0;
        order.twap_slices = 0;
        assert!(IntentPayload::BuybackTwapAndLp(order).validate().is_err());
    }

    #[test]
    fn test_from_parts_rejects_wrong_shape() {
        let err = IntentPayload::from_parts(IntentKind::BuybackTwapAndLp, &json!({"amount": 1}))
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));

        let err = IntentPayload::from_parts(IntentKind::Ping, &json!([1, 2])).unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[test]
    fn test_from_parts_rejects_zero_payout() {
        let payload = json!({"amount": 0, "due_ts": 100, "months_remaining": 2});
        assert!(IntentPayload::from_parts(IntentKind::CreatorPayoutUsdc, &payload).is_err());
    }

    #[test]
    fn test_intent_decodes_its_payload() {
        let payload = IntentPayload::CreatorPayoutInpi(CreatorPayout {
            amount: 42,
            due_ts: 1_700_000_000,
            months_remaining: 11,
        });
        let intent = Intent::new("0000000000001-abc".to_string(), &payload, 1).unwrap();

        assert_eq!(intent.kind, IntentKind::CreatorPayoutInpi);
        assert_eq!(intent.decode_payload().unwrap(), payload);
    }

    #[test]
    fn test_done_record_has_exactly_one_outcome() {
        let intent = Intent::new(
            "0000000000001-abc".to_string(),
            &IntentPayload::Ping(serde_json::Map::new()),
            1,
        )
        .unwrap();
        let lease = Lease {
            lease_key: "L0000000000001-abc-1234".to_string(),
            intent,
            leased_ts: 2,
            ttl_secs: 1800,
        };

        let ok = DoneRecord::new(&lease, CompletionOutcome::Success(json!({"ok": true})), 3);
        let encoded = serde_json::to_value(&ok).unwrap();
        assert_eq!(encoded["result"], json!({"ok": true}));
        assert!(encoded.get("error").is_none());

        let failed = DoneRecord::new(&lease, CompletionOutcome::Failure("rpc timeout".into()), 3);
        assert!(failed.is_error());
        assert!(failed.result.is_none());
    }
}
