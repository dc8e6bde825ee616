#[cfg(test)]
mod error_tests {
    use crate::*;

    #[test]
    fn test_relay_error_display() {
        let error = RelayError::not_found("lease:L1");
        assert_eq!(error.to_string(), "记录未找到: lease:L1");

        let error = RelayError::store("connection refused");
        assert_eq!(error.to_string(), "存储不可用: connection refused");

        let error = RelayError::validation("key is required");
        assert_eq!(error.to_string(), "数据验证失败: key is required");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(RelayError::validation("x").code(), "validation_error");
        assert_eq!(RelayError::auth("x").code(), "unauthorized");
        assert_eq!(RelayError::not_found("x").code(), "not_found");
        assert_eq!(RelayError::store("x").code(), "store_unavailable");
        assert_eq!(RelayError::internal("x").code(), "internal_error");
    }

    #[test]
    fn test_is_retryable() {
        assert!(RelayError::store("Temporary failure").is_retryable());
        assert!(RelayError::Network("Connection timeout".to_string()).is_retryable());

        assert!(!RelayError::not_found("lease:L1").is_retryable());
        assert!(!RelayError::validation("bad").is_retryable());
        assert!(!RelayError::auth("bad token").is_retryable());
    }

    #[test]
    fn test_is_fatal() {
        assert!(RelayError::config_error("missing secret").is_fatal());
        assert!(!RelayError::store("down").is_fatal());
    }

    #[test]
    fn test_from_serde_json() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let relay: RelayError = err.into();
        assert!(matches!(relay, RelayError::Serialization(_)));
    }
}
