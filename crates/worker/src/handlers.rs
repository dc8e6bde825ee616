use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use relay_domain::{IntentKind, IntentPayload};
use relay_errors::RelayResult;

/// 执行某一类意图对应的外部操作
///
/// 返回 `Ok` 的值作为 `result` 上报（`null` 上报为 `{}`），`Err` 的消息作为 `error` 上报。
#[async_trait]
pub trait IntentHandler: Send + Sync {
    async fn handle(&self, intent_key: &str, payload: &IntentPayload) -> RelayResult<Value>;
}

/// 端到端探测，不产生副作用
pub struct PingHandler;

#[async_trait]
impl IntentHandler for PingHandler {
    async fn handle(&self, intent_key: &str, _payload: &IntentPayload) -> RelayResult<Value> {
        info!("PING {}", intent_key);
        Ok(json!({ "pong": true, "ts": chrono::Utc::now().timestamp() }))
    }
}

/// 只记录意图内容的处理器，用于演练环境
pub struct LoggingHandler;

#[async_trait]
impl IntentHandler for LoggingHandler {
    async fn handle(&self, intent_key: &str, payload: &IntentPayload) -> RelayResult<Value> {
        let body = payload.to_value()?;
        info!(
            "[dry-run] {} {} payload={}",
            payload.kind(),
            intent_key,
            body
        );
        Ok(json!({ "dry_run": true, "kind": payload.kind().as_str() }))
    }
}

/// 意图类型到处理器的映射
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<IntentKind, Arc<dyn IntentHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 默认只处理PING；`dry_run` 时其余类型交给 [`LoggingHandler`]
    pub fn with_defaults(dry_run: bool) -> Self {
        let mut registry = Self::new();
        registry.register(IntentKind::Ping, Arc::new(PingHandler));
        if dry_run {
            for kind in IntentKind::ALL {
                if kind != IntentKind::Ping {
                    registry.register(kind, Arc::new(LoggingHandler));
                }
            }
        }
        registry
    }

    /// 同一类型重复注册时覆盖旧的处理器
    pub fn register(&mut self, kind: IntentKind, handler: Arc<dyn IntentHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: IntentKind) -> Option<Arc<dyn IntentHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn supports(&self, kind: IntentKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// 按 `IntentKind::ALL` 的顺序返回
    pub fn supported_kinds(&self) -> Vec<IntentKind> {
        IntentKind::ALL
            .into_iter()
            .filter(|kind| self.supports(*kind))
            .collect()
    }
}
