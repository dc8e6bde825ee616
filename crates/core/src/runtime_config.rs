use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info};

use relay_domain::{KeySpace, KvStore};
use relay_errors::{RelayError, RelayResult};

/// 运行参数键名（存储在 `cfg:<name>` 下的字符串）
pub mod config_keys {
    pub const BUYBACK_ENABLED: &str = "buyback_enabled";
    pub const BUYBACK_COOLDOWN_MINUTES: &str = "buyback_cooldown_minutes";
    pub const BUYBACK_MIN_THRESHOLD_USDC: &str = "buyback_min_threshold_usdc";
    pub const BUYBACK_TWAP_SLICES: &str = "buyback_twap_slices";
    pub const BUYBACK_SPLIT_BURN_BPS: &str = "buyback_split_burn_bps";
    pub const BUYBACK_SPLIT_LP_BPS: &str = "buyback_split_lp_bps";
    pub const BUCKET_BALANCE: &str = "bucket_balance";
    pub const BUYBACK_LAST_RUN_TS: &str = "buyback_last_run_ts";

    pub const CREATOR_USDC_ENABLED: &str = "creator_usdc_enabled";
    pub const CREATOR_USDC_MONTHLY: &str = "creator_usdc_monthly";
    pub const CREATOR_USDC_NEXT_DUE_TS: &str = "creator_usdc_next_due_ts";
    pub const CREATOR_USDC_MONTHS_REMAINING: &str = "creator_usdc_months_remaining";

    pub const CREATOR_INPI_ENABLED: &str = "creator_inpi_enabled";
    pub const CREATOR_INPI_BPS: &str = "creator_inpi_bps";
    pub const TOTAL_SUPPLY: &str = "total_supply";
    pub const CREATOR_INPI_NEXT_DUE_TS: &str = "creator_inpi_next_due_ts";
    pub const CREATOR_INPI_MONTHS_REMAINING: &str = "creator_inpi_months_remaining";
}

/// 共享存储中的运行参数读写
///
/// 值以不透明字符串保存，由调用方按需解析。缺失的键返回调用方给出的默认值，
/// 存在但无法解析的值视为校验错误。
#[derive(Clone)]
pub struct RuntimeConfig {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
}

impl RuntimeConfig {
    pub fn new(store: Arc<dyn KvStore>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    pub async fn get_raw(&self, name: &str) -> RelayResult<Option<String>> {
        self.store.get(&self.keys.config(name)).await
    }

    pub async fn get_parsed<T>(&self, name: &str, default: T) -> RelayResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get_raw(name).await? {
            Some(raw) => raw.trim().parse::<T>().map_err(|e| {
                RelayError::validation(format!("config {name}={raw:?} is invalid: {e}"))
            }),
            None => Ok(default),
        }
    }

    pub async fn get_u64(&self, name: &str, default: u64) -> RelayResult<u64> {
        self.get_parsed(name, default).await
    }

    pub async fn get_u32(&self, name: &str, default: u32) -> RelayResult<u32> {
        self.get_parsed(name, default).await
    }

    pub async fn get_i64(&self, name: &str, default: i64) -> RelayResult<i64> {
        self.get_parsed(name, default).await
    }

    /// 接受 `true/false/1/0/yes/no/on/off`（不区分大小写）
    pub async fn get_bool(&self, name: &str, default: bool) -> RelayResult<bool> {
        let Some(raw) = self.get_raw(name).await? else {
            return Ok(default);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(RelayError::validation(format!(
                "config {name}={raw:?} is not a boolean"
            ))),
        }
    }

    pub async fn set(&self, name: &str, value: impl Display) -> RelayResult<()> {
        debug!("写入运行参数 {}={}", name, value);
        self.store
            .put(&self.keys.config(name), &value.to_string(), None)
            .await
    }

    /// 写入缺失的参数，已有值保持不变，返回实际写入数量
    pub async fn seed(&self, values: &BTreeMap<String, String>) -> RelayResult<usize> {
        let mut written = 0;
        for (name, value) in values {
            if self
                .store
                .put_if_absent(&self.keys.config(name), value, None)
                .await?
            {
                written += 1;
            }
        }
        if written > 0 {
            info!("初始化运行参数 {} 项（共 {} 项）", written, values.len());
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_infrastructure::InMemoryKvStore;

    fn runtime() -> RuntimeConfig {
        RuntimeConfig::new(Arc::new(InMemoryKvStore::new()), KeySpace::default())
    }

    #[tokio::test]
    async fn test_defaults_when_missing() {
        let cfg = runtime();
        assert_eq!(cfg.get_u64(config_keys::BUCKET_BALANCE, 7).await.unwrap(), 7);
        assert!(!cfg.get_bool(config_keys::BUYBACK_ENABLED, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_parse_values() {
        let cfg = runtime();
        cfg.set(config_keys::BUCKET_BALANCE, 1500).await.unwrap();
        cfg.set(config_keys::BUYBACK_ENABLED, " On ").await.unwrap();
        cfg.set(config_keys::CREATOR_USDC_NEXT_DUE_TS, -5).await.unwrap();

        assert_eq!(cfg.get_u64(config_keys::BUCKET_BALANCE, 0).await.unwrap(), 1500);
        assert!(cfg.get_bool(config_keys::BUYBACK_ENABLED, false).await.unwrap());
        assert_eq!(
            cfg.get_i64(config_keys::CREATOR_USDC_NEXT_DUE_TS, 0).await.unwrap(),
            -5
        );
    }

    #[tokio::test]
    async fn test_invalid_value_is_validation_error() {
        let cfg = runtime();
        cfg.set(config_keys::BUCKET_BALANCE, "lots").await.unwrap();
        cfg.set(config_keys::BUYBACK_ENABLED, "maybe").await.unwrap();

        assert!(matches!(
            cfg.get_u64(config_keys::BUCKET_BALANCE, 0).await,
            Err(RelayError::Validation(_))
        ));
        assert!(cfg.get_bool(config_keys::BUYBACK_ENABLED, false).await.is_err());
    }

    #[tokio::test]
    async fn test_seed_keeps_existing_values() {
        let cfg = runtime();
        cfg.set(config_keys::BUCKET_BALANCE, 42).await.unwrap();

        let mut seed = BTreeMap::new();
        seed.insert(config_keys::BUCKET_BALANCE.to_string(), "0".to_string());
        seed.insert(config_keys::BUYBACK_TWAP_SLICES.to_string(), "6".to_string());

        assert_eq!(cfg.seed(&seed).await.unwrap(), 1);
        assert_eq!(cfg.get_u64(config_keys::BUCKET_BALANCE, 0).await.unwrap(), 42);
        assert_eq!(cfg.get_u32(config_keys::BUYBACK_TWAP_SLICES, 0).await.unwrap(), 6);
        assert_eq!(cfg.seed(&seed).await.unwrap(), 0);
    }
}
