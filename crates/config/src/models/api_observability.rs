use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    /// Worker 调用 `/ops/*` 时携带的 Bearer 凭证
    pub bearer_token: String,
    /// 请求体 HMAC-SHA256 签名密钥；未配置时不校验签名头
    pub hmac_secret: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bearer_token: "change-this-operator-token-in-production".to_string(),
            hmac_secret: None,
        }
    }
}

impl ConfigValidator for AuthConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.enabled {
            ValidationUtils::validate_not_empty(&self.bearer_token, "api.auth.bearer_token")?;

            if self.bearer_token.len() < 16 {
                return Err(crate::ConfigError::Validation(
                    "api.auth.bearer_token must be at least 16 characters long".to_string(),
                ));
            }

            if let Some(secret) = &self.hmac_secret {
                ValidationUtils::validate_not_empty(secret, "api.auth.hmac_secret")?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
    pub request_timeout_seconds: u64,
    pub max_request_size_kb: usize,
    pub auth: AuthConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
            cors_enabled: false,
            cors_origins: vec!["*".to_string()],
            request_timeout_seconds: 30,
            max_request_size_kb: 256,
            auth: AuthConfig::default(),
        }
    }
}

impl ConfigValidator for ApiConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.bind_address, "api.bind_address")?;

        if !self.bind_address.contains(':') {
            return Err(crate::ConfigError::Validation(
                "api.bind_address must be in format host:port".to_string(),
            ));
        }

        ValidationUtils::validate_seconds(
            self.request_timeout_seconds,
            "api.request_timeout_seconds",
            300,
        )?;
        ValidationUtils::validate_count(self.max_request_size_kb, "api.max_request_size_kb", 10_240)?;

        if self.cors_enabled && self.cors_origins.is_empty() {
            return Err(crate::ConfigError::Validation(
                "api.cors_origins cannot be empty when CORS is enabled".to_string(),
            ));
        }

        self.auth.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
    pub metrics_endpoint: String,
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_endpoint: "/metrics".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.metrics_enabled {
            ValidationUtils::validate_not_empty(
                &self.metrics_endpoint,
                "observability.metrics_endpoint",
            )?;
            if !self.metrics_endpoint.starts_with('/') {
                return Err(crate::ConfigError::Validation(
                    "observability.metrics_endpoint must start with '/'".to_string(),
                ));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(crate::ConfigError::Validation(format!(
                "Invalid log level: {}. Valid options: {:?}",
                self.log_level, valid_levels
            )));
        }

        Ok(())
    }
}
