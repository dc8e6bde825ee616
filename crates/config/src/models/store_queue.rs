use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 共享键值存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// 进程内存储，仅适用于单进程部署和测试
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    pub connection_timeout_seconds: u64,
    /// 所有键的统一前缀，便于多个环境共用一个Redis
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            connection_timeout_seconds: 10,
            key_prefix: String::new(),
        }
    }
}

impl ConfigValidator for StoreConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.backend == StoreBackend::Redis {
            ValidationUtils::validate_url(&self.redis_url, "store.redis_url")?;
        }
        ValidationUtils::validate_seconds(
            self.connection_timeout_seconds,
            "store.connection_timeout_seconds",
            300,
        )?;
        if self.key_prefix.contains(char::is_whitespace) {
            return Err(crate::ConfigError::Validation(
                "store.key_prefix cannot contain whitespace".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// 租约有效期，过期后租约被存储回收（不会重新入队）
    pub lease_ttl_seconds: u64,
    /// 完成记录保留时间
    pub done_ttl_seconds: u64,
    /// 幂等标记有效期
    pub idempotency_ttl_seconds: u64,
    /// 前缀扫描每页键数
    pub scan_page_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_ttl_seconds: 1800,
            done_ttl_seconds: 30 * 24 * 3600,
            idempotency_ttl_seconds: 300,
            scan_page_size: 100,
        }
    }
}

impl ConfigValidator for QueueConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_seconds(self.lease_ttl_seconds, "queue.lease_ttl_seconds", 86_400)?;
        ValidationUtils::validate_seconds(
            self.done_ttl_seconds,
            "queue.done_ttl_seconds",
            365 * 86_400,
        )?;
        ValidationUtils::validate_seconds(
            self.idempotency_ttl_seconds,
            "queue.idempotency_ttl_seconds",
            86_400,
        )?;
        ValidationUtils::validate_count(self.scan_page_size, "queue.scan_page_size", 10_000)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config_defaults_are_valid() {
        let config = QueueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lease_ttl_seconds, 1800);
        assert_eq!(config.idempotency_ttl_seconds, 300);
    }

    #[test]
    fn test_queue_config_validation() {
        let mut invalid = QueueConfig::default();
        invalid.lease_ttl_seconds = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = QueueConfig::default();
        invalid.scan_page_size = 0;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_store_config_requires_url_for_redis() {
        let mut config = StoreConfig::default();
        assert!(config.validate().is_ok());

        config.backend = StoreBackend::Redis;
        config.redis_url = "localhost".to_string();
        assert!(config.validate().is_err());

        config.redis_url = "redis://localhost:6379".to_string();
        assert!(config.validate().is_ok());
    }
}
