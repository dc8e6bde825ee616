use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use relay_errors::RelayResult;

/// 定时评估运行参数并按条件入队意图的作业
#[async_trait]
pub trait IntentProducer: Send + Sync {
    /// 作业名，同时用于锁名 `producer:<name>` 与错误标记 `jobs:error:<name>`
    fn name(&self) -> &str;

    /// 覆盖默认锁TTL
    fn lock_ttl(&self) -> Option<Duration> {
        None
    }

    /// 执行一次评估，返回本次入队的意图键
    async fn tick(&self, now: DateTime<Utc>) -> RelayResult<Vec<String>>;
}
