use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};

use relay_domain::ports::{KeyPage, KvStore};
use relay_errors::{RelayError, RelayResult};

use crate::store_metrics::StoreMetrics;

const BACKEND: &str = "redis";
const SCAN_COUNT: usize = 1000;

const DELETE_IF_VALUE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Redis键值存储
///
/// 原子原语映射：`put_if_absent` → `SET NX PX`，`take` → `GETDEL`（Redis 6.2+）。
/// `delete_if_value` 用Lua脚本比较后删除。
/// SCAN没有顺序，`list` 每页都要完整扫描一次前缀；`list_all` 与 `count_prefix`
/// 因此被覆盖为单次扫描。
#[derive(Clone)]
pub struct RedisKvStore {
    conn: ConnectionManager,
}

impl RedisKvStore {
    pub async fn connect(redis_url: &str, connect_timeout: Duration) -> RelayResult<Self> {
        info!("连接Redis存储: {}", redis_url);
        let client = Client::open(redis_url)
            .map_err(|e| RelayError::config_error(format!("无效的Redis URL: {e}")))?;

        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| RelayError::store(format!("连接Redis超时: {redis_url}")))?
            .map_err(|e| RelayError::store(format!("连接Redis失败: {e}")))?;

        let store = Self { conn };
        store.ping().await?;
        info!("Redis存储连接成功");
        Ok(store)
    }

    pub async fn ping(&self) -> RelayResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("ping", "", e))?;
        Ok(())
    }

    fn command_error(op: &'static str, key: &str, err: redis::RedisError) -> RelayError {
        error!("Redis {} 失败, key={}: {}", op, key, err);
        StoreMetrics::record_error(BACKEND, op);
        RelayError::from(err)
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        (ttl.as_millis() as u64).max(1)
    }

    /// 把前缀转为SCAN的glob模式，转义glob元字符
    fn match_pattern(prefix: &str) -> String {
        let mut pattern = String::with_capacity(prefix.len() + 1);
        for c in prefix.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('*');
        pattern
    }

    async fn scan_prefix(&self, prefix: &str) -> RelayResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = Self::match_pattern(prefix);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| Self::command_error("scan", prefix, e))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN可能重复返回同一个键
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> RelayResult<Option<String>> {
        let started = Instant::now();
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("get", key, e))?;
        StoreMetrics::record_operation(BACKEND, "get", started);
        Ok(value)
    }

    #[instrument(skip(self, value))]
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> RelayResult<()> {
        let started = Instant::now();
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(Self::ttl_millis(ttl));
        }
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("put", key, e))?;
        StoreMetrics::record_operation(BACKEND, "put", started);
        Ok(())
    }

    #[instrument(skip(self, value))]
    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> RelayResult<bool> {
        let started = Instant::now();
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(Self::ttl_millis(ttl));
        }
        let reply: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("put_if_absent", key, e))?;
        StoreMetrics::record_operation(BACKEND, "put_if_absent", started);
        debug!("SET NX {} -> {:?}", key, reply);
        Ok(reply.is_some())
    }

    #[instrument(skip(self))]
    async fn take(&self, key: &str) -> RelayResult<Option<String>> {
        let started = Instant::now();
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("take", key, e))?;
        StoreMetrics::record_operation(BACKEND, "take", started);
        Ok(value)
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> RelayResult<bool> {
        let started = Instant::now();
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("delete", key, e))?;
        StoreMetrics::record_operation(BACKEND, "delete", started);
        Ok(removed > 0)
    }

    #[instrument(skip(self, expected))]
    async fn delete_if_value(&self, key: &str, expected: &str) -> RelayResult<bool> {
        let started = Instant::now();
        let mut conn = self.conn.clone();
        let removed: i64 = redis::Script::new(DELETE_IF_VALUE_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("delete_if_value", key, e))?;
        StoreMetrics::record_operation(BACKEND, "delete_if_value", started);
        Ok(removed > 0)
    }

    #[instrument(skip(self))]
    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> RelayResult<KeyPage> {
        let started = Instant::now();
        let all = self.scan_prefix(prefix).await?;
        let mut keys: Vec<String> = all
            .into_iter()
            .filter(|k| cursor.map_or(true, |after| k.as_str() > after))
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

    #[instrument(skip(self))]
    async fn list_all(&self, prefix: &str, _page_size: usize) -> RelayResult<Vec<String>> {
        let started = Instant::now();
        let keys = self.scan_prefix(prefix).await?;
        StoreMetrics::record_operation(BACKEND, "list_all", started);
        Ok(keys)
    }

    #[instrument(skip(self))]
    async fn count_prefix(&self, prefix: &str, _page_size: usize) -> RelayResult<u64> {
        let started = Instant::now();
        let count = self.scan_prefix(prefix).await?.len() as u64;
        StoreMetrics::record_operation(BACKEND, "count_prefix", started);
        Ok(count)
    }
}
