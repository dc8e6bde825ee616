use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, warn};

use relay_errors::RelayError;

use crate::protocol::ErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("请求体格式错误: {0}")]
    BadRequest(String),

    #[error("认证失败: {0}")]
    Unauthorized(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Relay(err) => {
                let status = match err {
                    RelayError::Validation(_) => StatusCode::BAD_REQUEST,
                    RelayError::Auth(_) => StatusCode::UNAUTHORIZED,
                    RelayError::NotFound { .. } => StatusCode::NOT_FOUND,
                    RelayError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let code = match status {
                    StatusCode::INTERNAL_SERVER_ERROR => "internal_error",
                    _ => err.code(),
                };
                (status, code)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("请求处理失败: {}", self);
        } else {
            warn!("请求被拒绝 ({}): {}", status.as_u16(), self);
        }

        let body = ErrorBody {
            ok: false,
            error: code.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let cases = [
            (ApiError::from(RelayError::validation("x")), StatusCode::BAD_REQUEST, "validation_error"),
            (ApiError::from(RelayError::auth("x")), StatusCode::UNAUTHORIZED, "unauthorized"),
            (ApiError::from(RelayError::not_found("L1")), StatusCode::NOT_FOUND, "not_found"),
            (ApiError::from(RelayError::store("down")), StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
            (ApiError::from(RelayError::internal("boom")), StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            (
                ApiError::from(RelayError::Serialization("bad".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
            ),
            (ApiError::BadRequest("eof".into()), StatusCode::BAD_REQUEST, "validation_error"),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status_and_code(), (status, code));
        }
    }
}
