pub mod health;
pub mod metrics;
pub mod ops;
pub mod status;

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// 解析JSON请求体，空请求体视为默认值
pub(crate) fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}
