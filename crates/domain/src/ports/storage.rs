use async_trait::async_trait;
use std::time::Duration;

use relay_errors::RelayResult;

/// 前缀列举的一页结果，键按字典序升序
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPage {
    pub keys: Vec<String>,
    /// 还有更多键时为本页最后一个键，传回 `list` 继续翻页
    pub cursor: Option<String>,
}

/// 共享键值存储接口
///
/// 只暴露协调所需的原子原语。`put_if_absent` 与 `take` 必须是原子的：
/// 分布式锁、幂等标记和租约独占全部依赖这两个操作，只提供最终一致
/// 读改写语义的存储不能用于本系统。
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> RelayResult<Option<String>>;

    /// 覆盖写入；`ttl` 为 `None` 表示永不过期
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> RelayResult<()>;

    /// 仅当键不存在时写入，返回是否写入成功
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>)
        -> RelayResult<bool>;

    /// 原子地读取并删除
    async fn take(&self, key: &str) -> RelayResult<Option<String>>;

    /// 删除键，返回键此前是否存在
    async fn delete(&self, key: &str) -> RelayResult<bool>;

    /// 仅当当前值等于 `expected` 时原子地删除，返回是否删除
    async fn delete_if_value(&self, key: &str, expected: &str) -> RelayResult<bool>;

    /// 按前缀分页列举键，`cursor` 为上一页返回的游标（不含）
    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> RelayResult<KeyPage>;

    /// 前缀下的全部键（升序）
    ///
    /// 默认实现逐页调用 `list`；无法高效按游标翻页的后端应覆盖此方法。
    async fn list_all(&self, prefix: &str, page_size: usize) -> RelayResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.list(prefix, cursor.as_deref(), page_size).await?;
            keys.extend(page.keys);
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(keys),
            }
        }
    }

    /// 统计前缀下的键数量
    async fn count_prefix(&self, prefix: &str, page_size: usize) -> RelayResult<u64> {
        let mut total = 0u64;
        let mut cursor: Option<String> = None;
        loop {
            let page = self.list(prefix, cursor.as_deref(), page_size).await?;
            total += page.keys.len() as u64;
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(total),
            }
        }
    }
}
