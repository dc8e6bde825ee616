//! Operator API 的请求与响应结构，Worker客户端共用

use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_domain::{IntentKind, Lease, QueueStats};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NextRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// 租出的意图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeasedIntentView {
    pub intent_key: String,
    pub kind: IntentKind,
    pub payload: Value,
    pub created_ts: i64,
    pub leased_ts: i64,
    pub expires_ts: i64,
}

impl From<&Lease> for LeasedIntentView {
    fn from(lease: &Lease) -> Self {
        Self {
            intent_key: lease.intent.key.clone(),
            kind: lease.intent.kind,
            payload: lease.intent.payload.clone(),
            created_ts: lease.intent.created_ts,
            leased_ts: lease.leased_ts,
            expires_ts: lease.expires_ts(),
        }
    }
}

/// 队列为空时 `key` 与 `intent` 均为 `null`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextResponse {
    pub ok: bool,
    /// 租约键，`complete` 时回传
    pub key: Option<String>,
    pub intent: Option<LeasedIntentView>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_key: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub idempotent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub ok: bool,
    pub metrics: Value,
    pub stats: QueueStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
    pub message: String,
}
