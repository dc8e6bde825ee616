use thiserror::Error;

/// 中继系统统一错误类型
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("数据验证失败: {0}")]
    Validation(String),
    #[error("认证失败: {0}")]
    Auth(String),
    #[error("记录未找到: {key}")]
    NotFound { key: String },
    #[error("存储不可用: {0}")]
    Store(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn auth<S: Into<String>>(msg: S) -> Self {
        Self::Auth(msg.into())
    }
    pub fn not_found<S: Into<String>>(key: S) -> Self {
        Self::NotFound { key: key.into() }
    }
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// 机器可读的错误码，API响应中的 `error` 字段
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Validation(_) => "validation_error",
            RelayError::Auth(_) => "unauthorized",
            RelayError::NotFound { .. } => "not_found",
            RelayError::Store(_) => "store_unavailable",
            RelayError::Serialization(_) => "serialization_error",
            RelayError::Configuration(_) => "configuration_error",
            RelayError::Network(_) => "network_error",
            RelayError::Internal(_) => "internal_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::Store(_) | RelayError::Network(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::Configuration(_) | RelayError::Internal(_))
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for RelayError {
    fn from(err: anyhow::Error) -> Self {
        RelayError::Internal(err.to_string())
    }
}

impl From<redis::RedisError> for RelayError {
    fn from(err: redis::RedisError) -> Self {
        RelayError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests;
