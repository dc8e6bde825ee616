use std::sync::Arc;
use std::time::Duration;

use relay_domain::{KeySpace, KvStore};
use relay_errors::{RelayError, RelayResult};

pub const MAX_TOKEN_LEN: usize = 128;

/// 幂等标记：同一令牌在有效期内只会被标记一次
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn KvStore>, keys: KeySpace, ttl: Duration) -> Self {
        Self { store, keys, ttl }
    }

    pub fn validate_token(token: &str) -> RelayResult<()> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Err(RelayError::validation(format!(
                "idempotency token must be 1..={MAX_TOKEN_LEN} characters"
            )));
        }
        Ok(())
    }

    /// 返回 `true` 表示本次是首次出现
    pub async fn mark_if_absent(&self, token: &str) -> RelayResult<bool> {
        Self::validate_token(token)?;
        self.store
            .put_if_absent(&self.keys.idempotency(token), "1", Some(self.ttl))
            .await
    }

    pub async fn clear(&self, token: &str) -> RelayResult<bool> {
        Self::validate_token(token)?;
        self.store.delete(&self.keys.idempotency(token)).await
    }
}
