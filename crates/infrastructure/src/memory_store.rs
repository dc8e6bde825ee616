use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use relay_domain::ports::{KeyPage, KvStore};
use relay_errors::RelayResult;

use crate::store_metrics::StoreMetrics;

const BACKEND: &str = "memory";

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// 内存键值存储
///
/// 所有写操作在同一把写锁内完成，因此 `put_if_absent` 与 `take` 天然原子。
/// 过期条目惰性清理：读时视为不存在，写时顺带移除。
/// 只适用于单进程部署（`--mode all`）与测试。
#[derive(Debug, Clone, Default)]
pub struct InMemoryKvStore {
    entries: Arc<RwLock<BTreeMap<String, Entry>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前存活键数量
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 移除所有已过期条目，返回移除数量
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        let purged = before - entries.len();
        if purged > 0 {
            debug!("清理过期键 {} 个", purged);
        }
        purged
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> RelayResult<Option<String>> {
        let started = std::time::Instant::now();
        let now = Instant::now();
        let entries = self.entries.read().await;
        let value = entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone());
        StoreMetrics::record_operation(BACKEND, "get", started);
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> RelayResult<()> {
        let started = std::time::Instant::now();
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Entry::new(value, ttl));
        StoreMetrics::record_operation(BACKEND, "put", started);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> RelayResult<bool> {
        let started = std::time::Instant::now();
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let occupied = entries.get(key).is_some_and(|e| e.is_live(now));
        if !occupied {
            entries.insert(key.to_string(), Entry::new(value, ttl));
        }
        StoreMetrics::record_operation(BACKEND, "put_if_absent", started);
        Ok(!occupied)
    }

    async fn take(&self, key: &str) -> RelayResult<Option<String>> {
        let started = std::time::Instant::now();
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let value = entries
            .remove(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value);
        StoreMetrics::record_operation(BACKEND, "take", started);
        Ok(value)
    }

    async fn delete(&self, key: &str) -> RelayResult<bool> {
        let started = std::time::Instant::now();
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let existed = entries.remove(key).is_some_and(|e| e.is_live(now));
        StoreMetrics::record_operation(BACKEND, "delete", started);
        Ok(existed)
    }

    async fn delete_if_value(&self, key: &str, expected: &str) -> RelayResult<bool> {
        let started = std::time::Instant::now();
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let matches = entries
            .get(key)
            .is_some_and(|e| e.is_live(now) && e.value == expected);
        if matches {
            entries.remove(key);
        }
        StoreMetrics::record_operation(BACKEND, "delete_if_value", started);
        Ok(matches)
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> RelayResult<KeyPage> {
        let started = std::time::Instant::now();
        let now = Instant::now();
        let entries = self.entries.read().await;

        let lower = match cursor {
            Some(after) if after >= prefix => Bound::Excluded(after.to_string()),
            _ => Bound::Included(prefix.to_string()),
        };

        let mut keys: Vec<String> = entries
            .range((lower, Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .take(limit.saturating_add(1))
            .collect();

        let cursor = if keys.len() > limit {
            keys.truncate(limit);
            keys.last().cloned()
        } else {
            None
        };

        StoreMetrics::record_operation(BACKEND, "list", started);
        Ok(KeyPage { keys, cursor })
    }
}
