use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use relay_config::{StoreBackend, StoreConfig};
use relay_domain::ports::KvStore;
use relay_errors::RelayResult;

use crate::{InMemoryKvStore, RedisKvStore};

pub struct StoreFactory;

impl StoreFactory {
    pub async fn create(config: &StoreConfig) -> RelayResult<Arc<dyn KvStore>> {
        match config.backend {
            StoreBackend::Memory => {
                warn!("使用内存存储：数据不会持久化，且不能跨进程共享");
                Ok(Arc::new(InMemoryKvStore::new()))
            }
            StoreBackend::Redis => {
                info!("初始化Redis存储");
                let store = RedisKvStore::connect(
                    &config.redis_url,
                    Duration::from_secs(config.connection_timeout_seconds),
                )
                .await?;
                Ok(Arc::new(store))
            }
        }
    }
}
