use crate::validation::{ConfigValidator, ValidationUtils};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// 单个生产者的调度设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerSchedule {
    pub enabled: bool,
    /// 六字段CRON表达式（含秒）
    pub schedule: String,
}

impl ProducerSchedule {
    pub fn new(schedule: &str) -> Self {
        Self {
            enabled: true,
            schedule: schedule.to_string(),
        }
    }
}

impl ConfigValidator for ProducerSchedule {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.schedule, "dispatcher.*.schedule")?;
        Schedule::from_str(&self.schedule).map_err(|e| {
            crate::ConfigError::Validation(format!(
                "Invalid schedule '{}': {}",
                self.schedule, e
            ))
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 生产者互斥锁的最长持有时间
    pub lock_ttl_seconds: u64,
    /// 生产者错误标记保留时间
    pub error_marker_ttl_seconds: u64,
    pub buyback: ProducerSchedule,
    pub creator: ProducerSchedule,
    pub metrics: ProducerSchedule,
    /// 启动时写入（仅在缺失时）的运行参数
    #[serde(default)]
    pub seed: BTreeMap<String, String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lock_ttl_seconds: 120,
            error_marker_ttl_seconds: 7 * 24 * 3600,
            buyback: ProducerSchedule::new("0 */5 * * * *"),
            creator: ProducerSchedule::new("0 0 * * * *"),
            metrics: ProducerSchedule::new("0 * * * * *"),
            seed: BTreeMap::new(),
        }
    }
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_seconds(self.lock_ttl_seconds, "dispatcher.lock_ttl_seconds", 3600)?;
        ValidationUtils::validate_seconds(
            self.error_marker_ttl_seconds,
            "dispatcher.error_marker_ttl_seconds",
            90 * 86_400,
        )?;
        self.buyback.validate()?;
        self.creator.validate()?;
        self.metrics.validate()?;

        for key in self.seed.keys() {
            ValidationUtils::validate_not_empty(key, "dispatcher.seed key")?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub worker_id: String,
    /// Operator API 基础地址
    pub api_url: String,
    pub api_token: String,
    pub hmac_secret: Option<String>,
    /// 只租用这些类型的意图；为空表示全部
    #[serde(default)]
    pub kinds: Vec<String>,
    /// 为回购与支付类型注册只记录日志的处理器，不执行外部操作
    #[serde(default)]
    pub dry_run: bool,
    pub poll_interval_ms: u64,
    pub max_backoff_ms: u64,
    pub complete_max_attempts: u32,
    pub request_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            worker_id: "worker-001".to_string(),
            api_url: "http://127.0.0.1:8080".to_string(),
            api_token: "change-this-operator-token-in-production".to_string(),
            hmac_secret: None,
            kinds: Vec::new(),
            dry_run: false,
            poll_interval_ms: 2000,
            max_backoff_ms: 60_000,
            complete_max_attempts: 5,
            request_timeout_seconds: 15,
        }
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.worker_id, "worker.worker_id")?;
        ValidationUtils::validate_url(&self.api_url, "worker.api_url")?;
        ValidationUtils::validate_not_empty(&self.api_token, "worker.api_token")?;

        if self.poll_interval_ms == 0 {
            return Err(crate::ConfigError::Validation(
                "worker.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_backoff_ms < self.poll_interval_ms {
            return Err(crate::ConfigError::Validation(
                "worker.max_backoff_ms must be greater than or equal to worker.poll_interval_ms"
                    .to_string(),
            ));
        }
        if self.complete_max_attempts == 0 {
            return Err(crate::ConfigError::Validation(
                "worker.complete_max_attempts must be greater than 0".to_string(),
            ));
        }
        ValidationUtils::validate_seconds(
            self.request_timeout_seconds,
            "worker.request_timeout_seconds",
            300,
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_config_validation() {
        let config = DispatcherConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid_config = config.clone();
        invalid_config.lock_ttl_seconds = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.buyback.schedule = "*/5 * * * *".to_string();
        assert!(invalid_config.validate().is_err());

        // 字段数正确但取值越界
        let mut invalid_config = config.clone();
        invalid_config.creator.schedule = "0 99 * * * *".to_string();
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.metrics.schedule = "0 * * * * * bogus".to_string();
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_worker_config_validation() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid_config = config.clone();
        invalid_config.worker_id = "".to_string();
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.max_backoff_ms = 10;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.api_url = "localhost:8080".to_string();
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_dispatcher_config_serialization() {
        let mut config = DispatcherConfig::default();
        config
            .seed
            .insert("buyback_enabled".to_string(), "true".to_string());

        let serialized = serde_json::to_string(&config).expect("Failed to serialize");
        let deserialized: DispatcherConfig =
            serde_json::from_str(&serialized).expect("Failed to deserialize");

        assert_eq!(deserialized.buyback.schedule, config.buyback.schedule);
        assert_eq!(deserialized.seed.get("buyback_enabled").map(String::as_str), Some("true"));
    }
}
