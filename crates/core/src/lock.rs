use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use relay_domain::{KeySpace, KvStore};
use relay_errors::RelayResult;

/// 基于存储TTL的互斥锁
///
/// 没有续期：持有者运行超过TTL后锁自动释放，其他实例可以重新获取。
/// `release` 只删除自己持有的锁，过期后被他人重新获取的锁保持不变。
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    holder: String,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KvStore>, keys: KeySpace, holder: impl Into<String>) -> Self {
        Self {
            store,
            keys,
            holder: holder.into(),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub async fn acquire(&self, name: &str, ttl: Duration) -> RelayResult<bool> {
        let acquired = self
            .store
            .put_if_absent(&self.keys.lock(name), &self.holder, Some(ttl))
            .await?;
        debug!("获取锁 {} (holder={}): {}", name, self.holder, acquired);
        Ok(acquired)
    }

    /// 返回是否释放了本实例持有的锁；已过期或已被他人持有时返回 `false`
    pub async fn release(&self, name: &str) -> RelayResult<bool> {
        let released = self
            .store
            .delete_if_value(&self.keys.lock(name), &self.holder)
            .await?;
        if !released {
            debug!("锁 {} 不再由 {} 持有，跳过释放", name, self.holder);
        }
        Ok(released)
    }

    /// 当前持有者，锁空闲时为 `None`
    pub async fn current_holder(&self, name: &str) -> RelayResult<Option<String>> {
        self.store.get(&self.keys.lock(name)).await
    }

    /// 在锁内执行 `fut`，锁被他人持有时返回 `Ok(None)` 且不执行
    pub async fn with_lock<F, T>(&self, name: &str, ttl: Duration, fut: F) -> RelayResult<Option<T>>
    where
        F: Future<Output = T>,
    {
        if !self.acquire(name, ttl).await? {
            debug!("锁 {} 已被占用，跳过", name);
            return Ok(None);
        }

        let output = fut.await;

        if let Err(e) = self.release(name).await {
            warn!("释放锁 {} 失败，将等待TTL过期: {}", name, e);
        }
        Ok(Some(output))
    }
}
